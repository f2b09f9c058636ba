use crate::error::EngineResult;
use crate::ledger;
use crate::levels::{LevelTable, NextLevel};
use crate::streak::{self, StreakKind};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: String,
    pub total_xp: i64,
    pub level: i64,
    pub level_name: String,
    pub attendance_streak: i64,
    pub assignment_streak: i64,
    pub last_attendance_date: Option<NaiveDate>,
    pub last_assignment_date: Option<NaiveDate>,
    pub next_level: Option<NextLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub student_id: String,
    pub cached_xp: Option<i64>,
    pub ledger_xp: i64,
    pub diverged: bool,
}

pub fn ensure_row(conn: &Connection, student_id: &str, table: &LevelTable) -> EngineResult<()> {
    let base = table.resolve(0);
    conn.execute(
        "INSERT INTO student_progress(student_id, total_xp, level, level_name)
         VALUES(?, 0, ?, ?)
         ON CONFLICT(student_id) DO NOTHING",
        (student_id, base.level, &base.name),
    )?;
    Ok(())
}

pub fn cached_total(conn: &Connection, student_id: &str) -> EngineResult<Option<i64>> {
    let v = conn
        .query_row(
            "SELECT total_xp FROM student_progress WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(v)
}

/// Writes the ledger-derived total and its resolved level into the cache row.
pub fn store_total(
    conn: &Connection,
    student_id: &str,
    total_xp: i64,
    table: &LevelTable,
    now: &str,
) -> EngineResult<()> {
    let resolved = table.resolve(total_xp);
    conn.execute(
        "UPDATE student_progress
         SET total_xp = ?, level = ?, level_name = ?, updated_at = ?
         WHERE student_id = ?",
        (total_xp, resolved.level, &resolved.name, now, student_id),
    )?;
    Ok(())
}

/// Rebuilds the cached total from the ledger when they disagree.
pub fn reconcile(
    conn: &Connection,
    student_id: &str,
    table: &LevelTable,
    now: &str,
) -> EngineResult<ReconcileReport> {
    ensure_row(conn, student_id, table)?;
    let cached = cached_total(conn, student_id)?;
    let ledger_xp = ledger::total_xp(conn, student_id)?;
    let diverged = cached != Some(ledger_xp);
    if diverged {
        tracing::warn!(
            student_id,
            cached = ?cached,
            ledger_xp,
            "progress cache diverged from ledger; rebuilding"
        );
    }
    store_total(conn, student_id, ledger_xp, table, now)?;
    Ok(ReconcileReport {
        student_id: student_id.to_string(),
        cached_xp: cached,
        ledger_xp,
        diverged,
    })
}

/// Read-only view. XP comes from the ledger and the level is resolved on
/// every call, so a stale cache row can never leak out.
pub fn read(conn: &Connection, student_id: &str, table: &LevelTable) -> EngineResult<StudentProgress> {
    let total_xp = ledger::total_xp(conn, student_id)?;
    let attendance = streak::load_state(conn, student_id, StreakKind::Attendance)?;
    let assignment = streak::load_state(conn, student_id, StreakKind::Assignment)?;
    let resolved = table.resolve(total_xp);
    Ok(StudentProgress {
        student_id: student_id.to_string(),
        total_xp,
        level: resolved.level,
        level_name: resolved.name,
        attendance_streak: attendance.count,
        assignment_streak: assignment.count,
        last_attendance_date: attendance.last_date,
        last_assignment_date: assignment.last_date,
        next_level: table.next_level(total_xp),
    })
}
