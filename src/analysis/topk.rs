//! Bounded selection of the largest items
//!
//! [`TopKSelector`] keeps the N heaviest items seen so far in a min-heap of
//! capacity N. A new item replaces the current minimum only when it is
//! strictly heavier, so among equal weights the earliest arrivals are kept.

use crate::error::ConfigError;
use crate::record::KeyRecord;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Anything that can be ranked by size
pub trait Weighted {
    fn weight(&self) -> u64;
}

impl Weighted for KeyRecord {
    fn weight(&self) -> u64 {
        self.size_bytes
    }
}

/// Heap slot: weight plus arrival sequence for a stable tiebreak
#[derive(Debug, Clone)]
struct Ranked<T> {
    weight: u64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    // Heavier ranks higher; on equal weight the earlier arrival ranks higher
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Keeps the N largest items by weight
#[derive(Debug, Clone)]
pub struct TopKSelector<T> {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked<T>>>,
    seen: u64,
}

impl<T: Weighted + Clone> TopKSelector<T> {
    /// Create a selector; the capacity must be positive
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidTopN { value: 0 });
        }
        Ok(Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
            seen: 0,
        })
    }

    /// Create from a signed count as typed by a user
    pub fn with_count(count: i64) -> Result<Self, ConfigError> {
        if count <= 0 {
            return Err(ConfigError::InvalidTopN { value: count });
        }
        Self::new(count as usize)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of items offered so far
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Smallest retained weight, if any
    pub fn min_weight(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(r)| r.weight)
    }

    /// Offer an item; returns true if it was retained
    pub fn add(&mut self, item: T) -> bool {
        let ranked = Ranked {
            weight: item.weight(),
            seq: self.seen,
            item,
        };
        self.seen += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(ranked));
            return true;
        }

        match self.heap.peek_mut() {
            Some(mut min) if ranked.weight > min.0.weight => {
                *min = Reverse(ranked);
                true
            }
            _ => false,
        }
    }

    /// Retained items, heaviest first; does not consume the selector
    pub fn snapshot(&self) -> Vec<T> {
        let mut ranked: Vec<&Ranked<T>> = self.heap.iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked.into_iter().map(|r| r.item.clone()).collect()
    }

    /// Consume the selector, returning items heaviest first
    pub fn into_sorted_vec(self) -> Vec<T> {
        // into_sorted_vec sorts ascending by Reverse, i.e. heaviest first
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| r.item)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::KeyType;

    fn rec(key: &str, size: u64) -> KeyRecord {
        KeyRecord::new(0, key, KeyType::String, size)
    }

    fn keys(records: &[KeyRecord]) -> Vec<&str> {
        records.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            TopKSelector::<KeyRecord>::new(0),
            Err(ConfigError::InvalidTopN { value: 0 })
        ));
        assert!(matches!(
            TopKSelector::<KeyRecord>::with_count(-3),
            Err(ConfigError::InvalidTopN { value: -3 })
        ));
    }

    #[test]
    fn test_capacity_two_scenario() {
        let mut top = TopKSelector::new(2).unwrap();
        top.add(rec("A", 100));
        top.add(rec("B", 50));
        top.add(rec("C", 200));
        top.add(rec("D", 10));

        let snapshot = top.snapshot();
        assert_eq!(keys(&snapshot), vec!["C", "A"]);
        assert_eq!(snapshot[0].size_bytes, 200);
        assert_eq!(snapshot[1].size_bytes, 100);
    }

    #[test]
    fn test_snapshot_is_repeatable() {
        let mut top = TopKSelector::new(3).unwrap();
        for (i, size) in [5u64, 1, 9, 7, 3].iter().enumerate() {
            top.add(rec(&format!("k{i}"), *size));
        }
        let first = top.snapshot();
        let second = top.snapshot();
        assert_eq!(first, second);
        assert_eq!(top.len(), 3);
        assert_eq!(top.into_sorted_vec(), first);
    }

    #[test]
    fn test_equal_size_does_not_evict() {
        let mut top = TopKSelector::new(2).unwrap();
        assert!(top.add(rec("first", 10)));
        assert!(top.add(rec("second", 10)));
        assert!(!top.add(rec("third", 10)));
        assert_eq!(keys(&top.snapshot()), vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_keys_are_kept() {
        let mut top = TopKSelector::new(5).unwrap();
        top.add(rec("same", 10));
        top.add(rec("same", 20));
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_bounded_selection_property() {
        // Deterministic pseudo-random sizes
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut all = Vec::new();
        let mut top = TopKSelector::new(10).unwrap();
        for i in 0..500 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let size = state % 1000;
            let r = rec(&format!("k{i}"), size);
            all.push(r.clone());
            top.add(r);
        }

        let snapshot = top.snapshot();
        assert_eq!(snapshot.len(), 10);
        assert!(snapshot.windows(2).all(|w| w[0].size_bytes >= w[1].size_bytes));

        let min = snapshot.last().unwrap().size_bytes;
        assert_eq!(top.min_weight(), Some(min));
        let retained: std::collections::HashSet<_> =
            snapshot.iter().map(|r| r.key.clone()).collect();
        assert!(all
            .iter()
            .filter(|r| !retained.contains(&r.key))
            .all(|r| r.size_bytes <= min));
    }

    #[test]
    fn test_fewer_inserts_than_capacity() {
        let mut top = TopKSelector::new(10).unwrap();
        top.add(rec("a", 1));
        top.add(rec("b", 2));
        assert_eq!(keys(&top.snapshot()), vec!["b", "a"]);
        assert_eq!(top.seen(), 2);
    }
}
