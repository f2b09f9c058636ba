use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("unknown student: {0}")]
    UnknownStudent(String),

    #[error("badge {badge_id} is referenced by {usage_count} achievement(s)")]
    BadgeInUse { badge_id: String, usage_count: i64 },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("concurrent update for student {student_id} after {attempts} attempt(s)")]
    ConcurrencyConflict { student_id: String, attempts: u32 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidEvent(_) => "invalid_event",
            EngineError::UnknownStudent(_) => "unknown_student",
            EngineError::BadgeInUse { .. } => "badge_in_use",
            EngineError::NotFound { .. } => "not_found",
            EngineError::ConcurrencyConflict { .. } => "concurrency_conflict",
            EngineError::Configuration(_) => "config_invalid",
            EngineError::PersistenceFailure(_) => "persistence_failure",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict { .. })
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Lock contention and unique-key races surface as conflicts so the caller
/// retries the whole operation; anything else is a storage failure.
impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, _) = &e {
            let raced = match inner.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => true,
                ErrorCode::ConstraintViolation => matches!(
                    inner.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ),
                _ => false,
            };
            if raced {
                return EngineError::ConcurrencyConflict {
                    student_id: String::new(),
                    attempts: 0,
                };
            }
        }
        EngineError::PersistenceFailure(e.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(e: r2d2::Error) -> Self {
        EngineError::PersistenceFailure(format!("connection pool: {}", e))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_unique_failures_classify_as_conflicts() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(EngineError::from(busy).is_conflict());

        let unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            None,
        );
        assert!(EngineError::from(unique).is_conflict());

        let other = EngineError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(other.code(), "persistence_failure");
    }
}
