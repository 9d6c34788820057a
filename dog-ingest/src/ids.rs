use std::sync::atomic::{AtomicU64, Ordering};

use crate::FileId;

/// Allocates file ids. Ids are never reused for the lifetime of the generator.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> FileId;
}

/// Atomic counter starting at 1
#[derive(Debug)]
pub struct MonotonicIds {
    next: AtomicU64,
}

impl MonotonicIds {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start counting from `first`, e.g. past ids persisted by an earlier session
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for MonotonicIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for MonotonicIds {
    fn next_id(&self) -> FileId {
        FileId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = MonotonicIds::new();
        assert_eq!(ids.next_id(), FileId(1));
        assert_eq!(ids.next_id(), FileId(2));

        let resumed = MonotonicIds::starting_at(100);
        assert_eq!(resumed.next_id(), FileId(100));
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(MonotonicIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
