use crate::{KeyGenerator, KeyGeneratorError};
use uuid::Uuid;

/// Random 64-bit ids derived from a v4 UUID.
///
/// Not a UUID serializer: the first eight bytes of the random UUID become the
/// id, so version/variant bits land mid-word. The point is a cheap random
/// 64-bit value, nothing more.
pub struct UuidGenerator;

impl UuidGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UuidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for UuidGenerator {
    fn next_id(&self) -> Result<i64, KeyGeneratorError> {
        let uuid = Uuid::new_v4();
        let bytes = uuid.as_bytes();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        Ok(i64::from_be_bytes(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_distinct() {
        let generator = UuidGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generator.next_id().unwrap()));
        }
    }
}
