use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::XpReason;
use crate::streak::{self, StreakKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
        }
    }
}

/// Domain events emitted by the attendance, grading and admin collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    AttendanceMarked {
        status: AttendanceStatus,
        date: NaiveDate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AssignmentGraded {
        score: f64,
        max_score: f64,
        date: NaiveDate,
    },
    #[serde(rename_all = "camelCase")]
    ManualReward {
        amount: i64,
        #[serde(default)]
        note: String,
    },
}

/// What an event contributes before award rules run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEffect {
    pub xp: i64,
    pub reason: XpReason,
    pub note: Option<String>,
    pub streak: Option<(StreakKind, NaiveDate)>,
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::AttendanceMarked { .. } => "attendanceMarked",
            ProgressEvent::AssignmentGraded { .. } => "assignmentGraded",
            ProgressEvent::ManualReward { .. } => "manualReward",
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        match self {
            ProgressEvent::AttendanceMarked { subject_id, .. } => {
                if subject_id.as_deref().is_some_and(|s| s.trim().is_empty()) {
                    return Err(EngineError::InvalidEvent(
                        "subjectId must not be blank".to_string(),
                    ));
                }
            }
            ProgressEvent::AssignmentGraded {
                score, max_score, ..
            } => {
                if !score.is_finite() || !max_score.is_finite() {
                    return Err(EngineError::InvalidEvent(
                        "score and maxScore must be finite numbers".to_string(),
                    ));
                }
                if *max_score <= 0.0 {
                    return Err(EngineError::InvalidEvent(
                        "maxScore must be greater than zero".to_string(),
                    ));
                }
                if *score < 0.0 {
                    return Err(EngineError::InvalidEvent(
                        "score must not be negative".to_string(),
                    ));
                }
                if score > max_score {
                    return Err(EngineError::InvalidEvent(format!(
                        "score {} exceeds maxScore {}",
                        score, max_score
                    )));
                }
            }
            ProgressEvent::ManualReward { amount, .. } => {
                if *amount < 0 {
                    return Err(EngineError::InvalidEvent(
                        "manual reward amount must not be negative".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Attendance is naturally keyed by day, subject and status, so redelivery
    /// of the same mark is recognised without an explicit delivery key.
    pub fn natural_key(&self) -> Option<String> {
        match self {
            ProgressEvent::AttendanceMarked {
                status,
                date,
                subject_id,
            } => Some(format!(
                "attendance:{}:{}:{}",
                streak::format_date(*date),
                subject_id.as_deref().unwrap_or("-"),
                status.as_str()
            )),
            _ => None,
        }
    }

    pub fn effect(&self, config: &EngineConfig) -> EventEffect {
        match self {
            ProgressEvent::AttendanceMarked { status, date, .. } => {
                let (xp, counts) = match status {
                    AttendanceStatus::Present => (config.attendance.present_xp, true),
                    AttendanceStatus::Late => (
                        config.attendance.late_xp,
                        config.attendance.late_counts_for_streak,
                    ),
                    AttendanceStatus::Absent | AttendanceStatus::Excused => (0, false),
                };
                EventEffect {
                    xp,
                    reason: XpReason::Attendance,
                    note: None,
                    streak: counts.then_some((StreakKind::Attendance, *date)),
                }
            }
            ProgressEvent::AssignmentGraded {
                score,
                max_score,
                date,
            } => {
                let ratio = score / max_score;
                let xp = (config.assignment.max_xp as f64 * ratio).round() as i64;
                let counts = ratio * 100.0 >= config.assignment.streak_min_percent;
                EventEffect {
                    xp,
                    reason: XpReason::Assignment,
                    note: Some(format!("{}/{}", score, max_score)),
                    streak: counts.then_some((StreakKind::Assignment, *date)),
                }
            }
            ProgressEvent::ManualReward { amount, note } => EventEffect {
                xp: *amount,
                reason: XpReason::Manual,
                note: (!note.trim().is_empty()).then(|| note.clone()),
                streak: None,
            },
        }
    }
}
