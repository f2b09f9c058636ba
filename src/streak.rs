use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreakKind {
    Attendance,
    Assignment,
}

impl StreakKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreakKind::Attendance => "attendance",
            StreakKind::Assignment => "assignment",
        }
    }

    fn columns(self) -> (&'static str, &'static str, &'static str) {
        match self {
            StreakKind::Attendance => (
                "attendance_streak",
                "attendance_last_date",
                "attendance_epoch",
            ),
            StreakKind::Assignment => (
                "assignment_streak",
                "assignment_last_date",
                "assignment_epoch",
            ),
        }
    }
}

/// One counter plus the last calendar day that counted. `epoch` increases
/// every time a new run starts, so repeatable milestones can be keyed by run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreakState {
    pub count: i64,
    pub last_date: Option<NaiveDate>,
    pub epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreakOutcome {
    Started,
    Advanced,
    SameDay,
    Reset,
    Stale,
}

impl StreakOutcome {
    pub fn changed(self) -> bool {
        matches!(
            self,
            StreakOutcome::Started | StreakOutcome::Advanced | StreakOutcome::Reset
        )
    }
}

pub fn advance(state: StreakState, date: NaiveDate) -> (StreakState, StreakOutcome) {
    let Some(last) = state.last_date else {
        return (
            StreakState {
                count: 1,
                last_date: Some(date),
                epoch: state.epoch + 1,
            },
            StreakOutcome::Started,
        );
    };
    match (date - last).num_days() {
        d if d < 0 => (state, StreakOutcome::Stale),
        0 => (state, StreakOutcome::SameDay),
        1 => (
            StreakState {
                count: state.count + 1,
                last_date: Some(date),
                epoch: state.epoch,
            },
            StreakOutcome::Advanced,
        ),
        _ => (
            StreakState {
                count: 1,
                last_date: Some(date),
                epoch: state.epoch + 1,
            },
            StreakOutcome::Reset,
        ),
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn load_state(conn: &Connection, student_id: &str, kind: StreakKind) -> EngineResult<StreakState> {
    let (count_col, date_col, epoch_col) = kind.columns();
    let sql = format!(
        "SELECT {}, {}, {} FROM student_progress WHERE student_id = ?",
        count_col, date_col, epoch_col
    );
    let row = conn
        .query_row(&sql, [student_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .optional()?;
    let Some((count, last_raw, epoch)) = row else {
        return Ok(StreakState::default());
    };
    let last_date = match last_raw {
        Some(raw) => Some(parse_date(&raw).ok_or_else(|| {
            EngineError::PersistenceFailure(format!(
                "stored {} date {:?} for student {} is malformed",
                kind.as_str(),
                raw,
                student_id
            ))
        })?),
        None => None,
    };
    Ok(StreakState {
        count,
        last_date,
        epoch,
    })
}

/// Expects the student's progress row to exist (see `progress::ensure_row`).
pub fn store_state(
    conn: &Connection,
    student_id: &str,
    kind: StreakKind,
    state: StreakState,
) -> EngineResult<()> {
    let (count_col, date_col, epoch_col) = kind.columns();
    let sql = format!(
        "UPDATE student_progress SET {} = ?, {} = ?, {} = ? WHERE student_id = ?",
        count_col, date_col, epoch_col
    );
    conn.execute(
        &sql,
        (
            state.count,
            state.last_date.map(format_date),
            state.epoch,
            student_id,
        ),
    )?;
    Ok(())
}

/// `UpdateStreak`: applies the three-way rule to the stored counter.
pub fn update_streak(
    conn: &Connection,
    student_id: &str,
    kind: StreakKind,
    date: NaiveDate,
) -> EngineResult<(StreakState, StreakOutcome)> {
    let current = load_state(conn, student_id, kind)?;
    let (next, outcome) = advance(current, date);
    if outcome.changed() {
        store_state(conn, student_id, kind, next)?;
    }
    tracing::debug!(
        student_id,
        kind = kind.as_str(),
        ?outcome,
        count = next.count,
        "streak updated"
    );
    Ok((next, outcome))
}
