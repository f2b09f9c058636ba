use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

const PRUNE_AT: usize = 1024;

/// In-process keyed mutex: one slot per student, so writes for the same
/// student serialize while different students proceed in parallel.
#[derive(Default)]
pub struct StudentLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, student_id: &str) -> Arc<Mutex<()>> {
        if self.slots.len() >= PRUNE_AT {
            // Only the map itself holds idle slots.
            self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        self.slots
            .entry(student_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    pub fn with_student<T>(&self, student_id: &str, f: impl FnOnce() -> T) -> T {
        let slot = self.slot(student_id);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}
