//! Hash-range indexing service
//!
//! Each server keeps its own copy of the range table; splits broadcast
//! structural edits to every member. Ranges are inclusive on both ends,
//! disjoint, and after initialization cover the full 32-bit space. The
//! boolean lock is advisory and only serializes the split protocol; it
//! never gates lookups.

use std::sync::Mutex;

use crate::common::hash;

/// One contiguous range of the bucket space owned by a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMapping {
    pub lo: u32,
    pub hi: u32,
    pub server: String,
}

#[derive(Default)]
struct Inner {
    /// Sorted by `lo`
    ranges: Vec<RangeMapping>,
    locked: bool,
}

/// Ordered set of hash ranges plus the advisory split lock
#[derive(Default)]
pub struct IndexingService {
    inner: Mutex<Inner>,
}

impl IndexingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping, keeping the table ordered by range start
    pub fn add_mapping(&self, lo: u32, hi: u32, server: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        let at = inner.ranges.partition_point(|range| range.lo < lo);
        inner.ranges.insert(
            at,
            RangeMapping {
                lo,
                hi,
                server: server.into(),
            },
        );
    }

    /// Remove the mapping exactly matching `[lo, hi]`
    pub fn remove_mapping(&self, lo: u32, hi: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .ranges
            .retain(|range| !(range.lo == lo && range.hi == hi));
    }

    /// Find the server owning `bucket`
    pub fn locate(&self, bucket: u32) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let at = inner.ranges.partition_point(|range| range.lo <= bucket);
        if at == 0 {
            return None;
        }
        let range = &inner.ranges[at - 1];
        (bucket <= range.hi).then(|| range.server.clone())
    }

    /// Find the server owning `key`
    pub fn locate_key(&self, key: &str) -> Option<String> {
        self.locate(hash::hash32(key))
    }

    /// The range currently owned by `addr`, or `(0, 0)` when it owns none
    pub fn range(&self, addr: &str) -> (u32, u32) {
        let inner = self.inner.lock().unwrap();
        inner
            .ranges
            .iter()
            .find(|range| range.server == addr)
            .map(|range| (range.lo, range.hi))
            .unwrap_or((0, 0))
    }

    /// Acquire the advisory split lock. Returns false (and leaves the lock
    /// held) when another split already holds it.
    pub fn try_lock(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.locked {
            false
        } else {
            inner.locked = true;
            true
        }
    }

    /// Release the advisory split lock
    pub fn unlock(&self) {
        self.inner.lock().unwrap().locked = false;
    }

    /// Snapshot of the current table, for logging and assertions
    pub fn mappings(&self) -> Vec<RangeMapping> {
        self.inner.lock().unwrap().ranges.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_single_range() {
        let service = IndexingService::new();
        service.add_mapping(0, u32::MAX, "a:1");

        assert_eq!(service.locate(0).as_deref(), Some("a:1"));
        assert_eq!(service.locate(u32::MAX).as_deref(), Some("a:1"));
        assert_eq!(service.locate_key("anything").as_deref(), Some("a:1"));
    }

    #[test]
    fn test_locate_after_split_edits() {
        let service = IndexingService::new();
        service.add_mapping(0, u32::MAX, "a:1");

        let mid = u32::MAX / 2;
        service.remove_mapping(0, u32::MAX);
        service.add_mapping(0, mid, "b:2");
        service.add_mapping(mid + 1, u32::MAX, "a:1");

        assert_eq!(service.locate(0).as_deref(), Some("b:2"));
        assert_eq!(service.locate(mid).as_deref(), Some("b:2"));
        assert_eq!(service.locate(mid + 1).as_deref(), Some("a:1"));
        assert_eq!(service.locate(u32::MAX).as_deref(), Some("a:1"));
    }

    #[test]
    fn test_locate_empty_table() {
        let service = IndexingService::new();
        assert_eq!(service.locate(7), None);
    }

    #[test]
    fn test_range_per_server() {
        let service = IndexingService::new();
        let mid = u32::MAX / 2;
        service.add_mapping(mid + 1, u32::MAX, "a:1");
        service.add_mapping(0, mid, "b:2");

        assert_eq!(service.range("a:1"), (mid + 1, u32::MAX));
        assert_eq!(service.range("b:2"), (0, mid));
        assert_eq!(service.range("c:3"), (0, 0));
    }

    #[test]
    fn test_mappings_stay_sorted() {
        let service = IndexingService::new();
        service.add_mapping(100, 200, "a:1");
        service.add_mapping(0, 99, "b:2");
        service.add_mapping(201, u32::MAX, "c:3");

        let table = service.mappings();
        assert_eq!(table[0].lo, 0);
        assert_eq!(table[1].lo, 100);
        assert_eq!(table[2].lo, 201);
    }

    #[test]
    fn test_lock_is_not_reentrant() {
        let service = IndexingService::new();
        assert!(service.try_lock());
        assert!(!service.try_lock());

        service.unlock();
        assert!(service.try_lock());
    }
}
