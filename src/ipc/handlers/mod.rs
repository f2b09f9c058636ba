pub mod achievements;
pub mod backup;
pub mod badges;
pub mod core;
pub mod levels;
pub mod progress;
pub mod setup;
pub mod students;
