//! In-memory recency index over committed entries.

use indexmap::IndexMap;

use crate::key::CacheKey;

#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexEntry {
    pub size: u64,
    /// Readers currently holding the entry. Pinned entries are never evicted.
    pub pins: u32,
}

/// Least recently used first.
#[derive(Debug, Default)]
pub(crate) struct LruIndex {
    entries: IndexMap<CacheKey, IndexEntry>,
    total_bytes: u64,
}

impl LruIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }

    /// Insert or replace `key` as the most recently used entry.
    pub fn insert(&mut self, key: CacheKey, size: u64) {
        let pins = match self.entries.shift_remove(&key) {
            Some(old) => {
                self.total_bytes -= old.size;
                old.pins
            }
            None => 0,
        };
        self.total_bytes += size;
        self.entries.insert(key, IndexEntry { size, pins });
    }

    /// Mark `key` most recently used.
    pub fn touch(&mut self, key: &CacheKey) {
        if let Some(i) = self.entries.get_index_of(key) {
            let last = self.entries.len() - 1;
            self.entries.move_index(i, last);
        }
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Remove `key` if present and not pinned. Returns whether it was removed.
    pub fn remove_idle(&mut self, key: &CacheKey) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.pins == 0 => self.remove(key).is_some(),
            _ => false,
        }
    }

    pub fn pin(&mut self, key: &CacheKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.pins += 1;
                true
            }
            None => false,
        }
    }

    pub fn unpin(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.pins = entry.pins.saturating_sub(1);
        }
    }

    /// Oldest unpinned entries to drop so that the index fits within the
    /// bounds, skipping any key for which `busy` returns true.
    pub fn victims(
        &self,
        max_bytes: Option<u64>,
        max_entries: Option<usize>,
        busy: impl Fn(&CacheKey) -> bool,
    ) -> Vec<CacheKey> {
        let mut bytes = self.total_bytes;
        let mut count = self.entries.len();
        let over = |bytes: u64, count: usize| {
            max_bytes.is_some_and(|m| bytes > m) || max_entries.is_some_and(|m| count > m)
        };

        let mut victims = Vec::new();
        for (key, entry) in &self.entries {
            if !over(bytes, count) {
                break;
            }
            if entry.pins > 0 || busy(key) {
                continue;
            }
            bytes -= entry.size;
            count -= 1;
            victims.push(key.clone());
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Digest, EntryKind};

    fn key(n: u8) -> CacheKey {
        CacheKey::new(Digest([n; 32]), EntryKind::Fields, "t").unwrap()
    }

    #[test]
    fn test_lru_order() {
        let mut index = LruIndex::default();
        for n in 0..4 {
            index.insert(key(n), 10);
        }
        index.touch(&key(0));
        let victims = index.victims(Some(25), None, |_| false);
        assert_eq!(victims, vec![key(1), key(2)]);
        assert_eq!(index.total_bytes(), 40);
    }

    #[test]
    fn test_pinned_and_busy_skipped() {
        let mut index = LruIndex::default();
        for n in 0..3 {
            index.insert(key(n), 10);
        }
        assert!(index.pin(&key(0)));
        let victims = index.victims(None, Some(1), |k| *k == key(1));
        assert_eq!(victims, vec![key(2)]);
        index.unpin(&key(0));
        let victims = index.victims(None, Some(1), |_| false);
        assert_eq!(victims, vec![key(0), key(1)]);
    }

    #[test]
    fn test_replace_updates_size() {
        let mut index = LruIndex::default();
        index.insert(key(1), 10);
        index.insert(key(1), 4);
        assert_eq!(index.len(), 1);
        assert_eq!(index.total_bytes(), 4);
        assert_eq!(index.remove(&key(1)).map(|e| e.size), Some(4));
        assert_eq!(index.total_bytes(), 0);
    }

    #[test]
    fn test_remove_idle_respects_pins() {
        let mut index = LruIndex::default();
        index.insert(key(1), 10);
        assert!(index.pin(&key(1)));
        assert!(!index.remove_idle(&key(1)));
        assert_eq!(index.len(), 1);
        index.unpin(&key(1));
        assert!(index.remove_idle(&key(1)));
        assert!(!index.remove_idle(&key(1)));
        assert_eq!(index.total_bytes(), 0);
    }
}
