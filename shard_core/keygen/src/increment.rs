use crate::{KeyGenerator, KeyGeneratorError};
use parking_lot::Mutex;

/// Single-process incrementing id source. Not coordinated across processes;
/// use snowflake for anything distributed.
pub struct IncrementGenerator {
    step: i64,
    current: Mutex<i64>,
}

impl IncrementGenerator {
    pub fn new(start: i64, step: i64) -> Self {
        Self {
            step,
            current: Mutex::new(start),
        }
    }
}

impl KeyGenerator for IncrementGenerator {
    fn next_id(&self) -> Result<i64, KeyGeneratorError> {
        let mut current = self.current.lock();
        *current += self.step;
        Ok(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_start_and_step() {
        let generator = IncrementGenerator::new(100, 10);
        assert_eq!(generator.next_id().unwrap(), 110);
        assert_eq!(generator.next_id().unwrap(), 120);
        assert_eq!(generator.next_id().unwrap(), 130);
    }

    #[test]
    fn test_no_duplicates_across_threads() {
        let generator = Arc::new(IncrementGenerator::new(0, 1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let generator = Arc::clone(&generator);
            handles.push(std::thread::spawn(move || {
                (0..500)
                    .map(|_| generator.next_id().unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("worker thread") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
