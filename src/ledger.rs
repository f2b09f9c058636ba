use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum XpReason {
    Attendance,
    Assignment,
    Manual,
    Achievement,
}

impl XpReason {
    pub fn as_str(self) -> &'static str {
        match self {
            XpReason::Attendance => "ATTENDANCE",
            XpReason::Assignment => "ASSIGNMENT",
            XpReason::Manual => "MANUAL",
            XpReason::Achievement => "ACHIEVEMENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ATTENDANCE" => Some(XpReason::Attendance),
            "ASSIGNMENT" => Some(XpReason::Assignment),
            "MANUAL" => Some(XpReason::Manual),
            "ACHIEVEMENT" => Some(XpReason::Achievement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpLedgerEntry {
    pub id: String,
    pub student_id: String,
    pub seq: i64,
    pub amount: i64,
    pub reason: XpReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub occurred_at: String,
}

pub fn total_xp(conn: &Connection, student_id: &str) -> EngineResult<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM xp_ledger WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    Ok(total)
}

/// Appends one immutable entry. The caller holds the student's write
/// transaction; a racing writer from another process trips the
/// `(student_id, seq)` unique key and surfaces as a conflict.
pub fn append(
    conn: &Connection,
    student_id: &str,
    amount: i64,
    reason: XpReason,
    note: Option<&str>,
    occurred_at: &str,
) -> EngineResult<XpLedgerEntry> {
    let total = total_xp(conn, student_id)?;
    let Some(next_total) = total.checked_add(amount) else {
        return Err(EngineError::InvalidEvent(format!(
            "entry of {} overflows total XP (current {})",
            amount, total
        )));
    };
    if next_total < 0 {
        return Err(EngineError::InvalidEvent(format!(
            "entry of {} would take total XP below zero (current {})",
            amount, total
        )));
    }
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM xp_ledger WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO xp_ledger(id, student_id, seq, amount, reason, note, occurred_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            student_id,
            seq,
            amount,
            reason.as_str(),
            note,
            occurred_at,
        ),
    )?;
    Ok(XpLedgerEntry {
        id,
        student_id: student_id.to_string(),
        seq,
        amount,
        reason,
        note: note.map(|s| s.to_string()),
        occurred_at: occurred_at.to_string(),
    })
}

pub fn list_entries(conn: &Connection, student_id: &str) -> EngineResult<Vec<XpLedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, seq, amount, reason, note, occurred_at
         FROM xp_ledger
         WHERE student_id = ?
         ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, seq, amount, reason_raw, note, occurred_at)| {
            let reason = XpReason::parse(&reason_raw).ok_or_else(|| {
                EngineError::PersistenceFailure(format!(
                    "ledger entry {} has unknown reason {}",
                    id, reason_raw
                ))
            })?;
            Ok(XpLedgerEntry {
                id,
                student_id: student_id.to_string(),
                seq,
                amount,
                reason,
                note,
                occurred_at,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDigest {
    pub student_id: String,
    pub entry_count: usize,
    pub total_xp: i64,
    pub sha256: String,
}

/// SHA-256 over the ordered `(seq, amount, reason, occurredAt)` tuples.
/// Two replicas with the same history produce the same digest.
pub fn digest(conn: &Connection, student_id: &str) -> EngineResult<LedgerDigest> {
    let entries = list_entries(conn, student_id)?;
    let mut hasher = Sha256::new();
    let mut total = 0i64;
    for e in &entries {
        hasher.update(
            format!(
                "{}|{}|{}|{}\n",
                e.seq,
                e.amount,
                e.reason.as_str(),
                e.occurred_at
            )
            .as_bytes(),
        );
        total = total.checked_add(e.amount).ok_or_else(|| {
            EngineError::PersistenceFailure(format!(
                "ledger total for student {} overflows",
                student_id
            ))
        })?;
    }
    let sha256 = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    Ok(LedgerDigest {
        student_id: student_id.to_string(),
        entry_count: entries.len(),
        total_xp: total,
        sha256,
    })
}
