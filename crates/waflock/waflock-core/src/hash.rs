//! Name-to-identifier derivation.
//!
//! Independent processes find each other's lock only through this mapping, so
//! it must be stable across processes, runs and builds: a fixed-seed
//! MurmurHash3 (x86, 32-bit) over the name bytes, no per-process randomness.
//!
//! The identifier space is bounded and there is no collision detection. Two
//! distinct names that land on the same identifier share one kernel object.

use std::io::Cursor;
use std::num::NonZeroU32;

/// Seed shared by every process that derives identifiers ("WAFL").
pub const DEFAULT_HASH_SEED: u32 = 0x5741_464C;

/// Largest identifier space that still fits a System V `key_t` after the
/// backend shifts identifiers past `IPC_PRIVATE`.
pub const MAX_ID_RANGE: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameHasher {
    seed: u32,
}

impl NameHasher {
    pub const fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Maps `name` into `[0, range)`.
    ///
    /// The 32-bit digest is laid out the way the reference implementation
    /// writes it to memory (little-endian) and those four bytes are read back
    /// big-endian before reduction, which keeps identifiers compatible with
    /// locks created by other implementations of the same scheme.
    pub fn hash(&self, name: &[u8], range: NonZeroU32) -> u32 {
        let digest = self.digest(name);
        u32::from_be_bytes(digest.to_le_bytes()) % range.get()
    }

    pub(crate) fn digest(&self, name: &[u8]) -> u32 {
        // Reading from an in-memory slice cannot fail.
        murmur3::murmur3_32(&mut Cursor::new(name), self.seed).unwrap_or_default()
    }
}

impl Default for NameHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn digest_matches_reference_vector() {
        let hasher = NameHasher::new(0);
        assert_eq!(
            hasher.digest(b"The quick brown fox jumps over the lazy dog"),
            0x2e4f_f723
        );
    }

    #[test]
    fn digest_bytes_are_reread_big_endian() {
        let hasher = NameHasher::new(0);
        let name = b"The quick brown fox jumps over the lazy dog";
        assert_eq!(hasher.hash(name, range(u32::MAX)), 0x23f7_4f2e % u32::MAX);
    }

    #[test]
    fn seed_changes_identifier() {
        let a = NameHasher::new(1).hash(b"cfg-7", range(MAX_ID_RANGE));
        let b = NameHasher::new(2).hash(b"cfg-7", range(MAX_ID_RANGE));
        assert_ne!(a, b);
    }

    #[test]
    fn range_of_one_collapses_everything() {
        let hasher = NameHasher::default();
        assert_eq!(hasher.hash(b"a", range(1)), 0);
        assert_eq!(hasher.hash(b"b", range(1)), 0);
    }

    proptest! {
        #[test]
        fn identifier_is_deterministic_and_in_range(
            name in proptest::collection::vec(1u8..=255, 1..128),
            n in 1u32..=MAX_ID_RANGE,
        ) {
            let first = NameHasher::default().hash(&name, range(n));
            let second = NameHasher::new(DEFAULT_HASH_SEED).hash(&name, range(n));
            prop_assert_eq!(first, second);
            prop_assert!(first < n);
        }
    }
}
