//! Global string table: every live string is unique by content (spec §3
//! "String uniqueness" / §8 invariant).
//!
//! Keyed by `(hash, bytes)` as spec §3 specifies: bucket on our own FNV
//! hash rather than re-hashing through `ahash`, then disambiguate within
//! the bucket by byte comparison (the only place collisions matter).

use crate::value::StringId;
use ahash::AHashMap;

#[derive(Default)]
pub struct StringInterner {
    buckets: AHashMap<u64, Vec<(Box<str>, StringId)>>,
}

impl StringInterner {
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        let hash = crate::value::hash_bytes(s);
        self.buckets
            .get(&hash)?
            .iter()
            .find(|(bytes, _)| bytes.as_ref() == s)
            .map(|(_, id)| *id)
    }

    pub fn insert(&mut self, hash: u64, s: &str, id: StringId) {
        self.buckets.entry(hash).or_default().push((s.into(), id));
    }

    /// Drop the intern-table entry for a string being swept (spec §4.2
    /// SweepString: "freed strings must leave the intern table").
    pub fn remove(&mut self, hash: u64, s: &str) {
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.retain(|(bytes, _)| bytes.as_ref() != s);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_misses_on_an_empty_table() {
        let interner = StringInterner::default();
        assert_eq!(interner.lookup("hello"), None);
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut interner = StringInterner::default();
        let hash = crate::value::hash_bytes("hello");
        interner.insert(hash, "hello", StringId(7));
        assert_eq!(interner.lookup("hello"), Some(StringId(7)));
        assert_eq!(interner.lookup("goodbye"), None);
    }

    #[test]
    fn distinct_strings_hashing_into_the_same_bucket_are_disambiguated_by_bytes() {
        let mut interner = StringInterner::default();
        // Force a deliberate hash collision in the bucket map itself.
        interner.insert(1, "a", StringId(1));
        interner.insert(1, "b", StringId(2));
        assert_eq!(interner.lookup("a"), Some(StringId(1)));
        assert_eq!(interner.lookup("b"), Some(StringId(2)));
    }

    #[test]
    fn remove_drops_only_the_named_entry() {
        let mut interner = StringInterner::default();
        let hash = crate::value::hash_bytes("hello");
        interner.insert(hash, "hello", StringId(3));
        interner.remove(hash, "hello");
        assert_eq!(interner.lookup("hello"), None);
        assert_eq!(interner.len(), 0);
    }
}
