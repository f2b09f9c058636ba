use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;

/// Resolves student references on behalf of the engine. The roster itself is
/// owned by the student-management collaborator.
pub trait StudentDirectory: Send + Sync {
    fn contains(&self, conn: &Connection, student_id: &str) -> EngineResult<bool>;
}

/// Looks students up in the workspace `students` roster table.
#[derive(Debug, Default, Clone, Copy)]
pub struct RosterDirectory;

impl StudentDirectory for RosterDirectory {
    fn contains(&self, conn: &Connection, student_id: &str) -> EngineResult<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND active = 1",
                [student_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

/// Fixed set of ids, for embedding the engine behind another system's lookup.
#[derive(Debug, Default, Clone)]
pub struct FixedDirectory {
    ids: HashSet<String>,
}

impl FixedDirectory {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl StudentDirectory for FixedDirectory {
    fn contains(&self, _conn: &Connection, student_id: &str) -> EngineResult<bool> {
        Ok(self.ids.contains(student_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub display_name: String,
    pub active: bool,
}

pub fn register(
    conn: &Connection,
    student_id: &str,
    display_name: &str,
    active: bool,
    now: &str,
) -> EngineResult<RosterStudent> {
    if student_id.trim().is_empty() {
        return Err(EngineError::InvalidEvent("studentId must not be empty".to_string()));
    }
    conn.execute(
        "INSERT INTO students(id, display_name, active, created_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           display_name = excluded.display_name,
           active = excluded.active",
        (student_id, display_name.trim(), active as i64, now),
    )?;
    Ok(RosterStudent {
        id: student_id.to_string(),
        display_name: display_name.trim().to_string(),
        active,
    })
}

pub fn list(conn: &Connection) -> EngineResult<Vec<RosterStudent>> {
    let mut stmt =
        conn.prepare("SELECT id, display_name, active FROM students ORDER BY display_name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(RosterStudent {
                id: r.get(0)?,
                display_name: r.get(1)?,
                active: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
