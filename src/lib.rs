//! Student progress and gamification engine: an append-only XP ledger,
//! derived levels, attendance/assignment streaks and idempotent awards.

pub mod awards;
pub mod backup;
pub mod badges;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod levels;
pub mod locks;
pub mod pool;
pub mod progress;
pub mod streak;
pub mod students;

pub use engine::{ApplyOutcome, Engine};
pub use error::{EngineError, EngineResult};
pub use events::{AttendanceStatus, ProgressEvent};
