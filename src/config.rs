use crate::db;
use crate::error::{EngineError, EngineResult};
use crate::streak::StreakKind;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const ENGINE_CONFIG_KEY: &str = "engine.config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceXp {
    pub present_xp: i64,
    pub late_xp: i64,
    pub late_counts_for_streak: bool,
}

impl Default for AttendanceXp {
    fn default() -> Self {
        Self {
            present_xp: 10,
            late_xp: 5,
            late_counts_for_streak: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignmentXp {
    /// XP for a perfect score; partial scores scale linearly.
    pub max_xp: i64,
    /// Minimum percentage for a graded assignment to count towards the streak.
    pub streak_min_percent: f64,
}

impl Default for AssignmentXp {
    fn default() -> Self {
        Self {
            max_xp: 20,
            streak_min_percent: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AwardTrigger {
    #[serde(rename_all = "camelCase")]
    StreakReached { kind: StreakKind, days: i64 },
    #[serde(rename_all = "camelCase")]
    TotalXpReached { xp: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardRule {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub xp_reward: i64,
    pub trigger: AwardTrigger,
    /// Streak rules only: award again in every new streak run.
    #[serde(default)]
    pub repeatable: bool,
    /// Links the award to a catalog badge (counts towards its usage guard).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub attendance: AttendanceXp,
    pub assignment: AssignmentXp,
    pub retry: RetryPolicy,
    pub rules: Vec<AwardRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attendance: AttendanceXp::default(),
            assignment: AssignmentXp::default(),
            retry: RetryPolicy::default(),
            rules: default_rules(),
        }
    }
}

fn default_rules() -> Vec<AwardRule> {
    vec![
        AwardRule {
            id: "streak:attendance:5".to_string(),
            title: "Perfect Week".to_string(),
            description: "Attended five days in a row".to_string(),
            xp_reward: 25,
            trigger: AwardTrigger::StreakReached {
                kind: StreakKind::Attendance,
                days: 5,
            },
            repeatable: true,
            badge_id: None,
        },
        AwardRule {
            id: "streak:assignment:3".to_string(),
            title: "On a Roll".to_string(),
            description: "Graded work on three consecutive days".to_string(),
            xp_reward: 15,
            trigger: AwardTrigger::StreakReached {
                kind: StreakKind::Assignment,
                days: 3,
            },
            repeatable: true,
            badge_id: None,
        },
        AwardRule {
            id: "xp:500".to_string(),
            title: "Rising Star".to_string(),
            description: "Earned 500 XP".to_string(),
            xp_reward: 0,
            trigger: AwardTrigger::TotalXpReached { xp: 500 },
            repeatable: false,
            badge_id: None,
        },
    ]
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let bad = |msg: String| -> EngineResult<()> { Err(EngineError::Configuration(msg)) };
        if self.attendance.present_xp < 0 || self.attendance.late_xp < 0 {
            return bad("attendance XP values must be non-negative".to_string());
        }
        if self.assignment.max_xp < 0 {
            return bad("assignment.maxXp must be non-negative".to_string());
        }
        if !(0.0..=100.0).contains(&self.assignment.streak_min_percent) {
            return bad("assignment.streakMinPercent must be between 0 and 100".to_string());
        }
        if self.retry.max_attempts == 0 {
            return bad("retry.maxAttempts must be at least 1".to_string());
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return bad("award rule id must not be empty".to_string());
            }
            if rule.id.starts_with("badge:") {
                return bad(format!("rule id {} uses the reserved badge: prefix", rule.id));
            }
            if !seen.insert(rule.id.as_str()) {
                return bad(format!("duplicate award rule id {}", rule.id));
            }
            if rule.xp_reward < 0 {
                return bad(format!("rule {} has a negative xpReward", rule.id));
            }
            match rule.trigger {
                AwardTrigger::StreakReached { days, .. } if days < 1 => {
                    return bad(format!("rule {} needs days >= 1", rule.id));
                }
                AwardTrigger::TotalXpReached { xp } if xp < 1 => {
                    return bad(format!("rule {} needs xp >= 1", rule.id));
                }
                AwardTrigger::TotalXpReached { .. } if rule.repeatable => {
                    return bad(format!("xp threshold rule {} cannot be repeatable", rule.id));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Missing keys fall back to defaults; a stored document that fails
/// validation is an error rather than silently replaced.
pub fn load(conn: &Connection) -> EngineResult<EngineConfig> {
    let stored = db::settings_get_json(conn, ENGINE_CONFIG_KEY)
        .map_err(|e| EngineError::PersistenceFailure(format!("{e:#}")))?;
    let config = match stored {
        Some(v) => serde_json::from_value::<EngineConfig>(v)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

pub fn save(conn: &Connection, config: &EngineConfig) -> EngineResult<()> {
    config.validate()?;
    let value = serde_json::to_value(config)?;
    db::settings_set_json(conn, ENGINE_CONFIG_KEY, &value)
        .map_err(|e| EngineError::PersistenceFailure(format!("{e:#}")))
}
