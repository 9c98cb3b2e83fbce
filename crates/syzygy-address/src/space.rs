//! `AddressSpace<A, V>`: an ordered map from non-overlapping address ranges to values.
//!
//! A `BTreeMap` keyed by each range's `start` address (rather than the
//! whole `AddressRange`) is used here instead of a `BTreeMap<AddressRange<A>,
//! V>` so that range queries can be driven directly off `A`, without
//! needing to manufacture a zero-size probe key (`AddressRange` never
//! allows `size == 0`, see `range.rs`). A balanced ordered map is enough
//! since queries are spatially local; no interval tree is needed.

use crate::range::AddressRange;
use core::ops::Add;
use std::collections::BTreeMap;

struct Entry<V> {
    size: u32,
    value: V,
}

/// A non-overlapping interval map. See module docs.
pub struct AddressSpace<A, V> {
    ranges: BTreeMap<A, Entry<V>>,
}

impl<A, V> AddressSpace<A, V>
where
    A: Copy + Ord + Add<u32, Output = A>,
{
    /// Create an empty address space.
    pub fn new() -> Self {
        AddressSpace {
            ranges: BTreeMap::new(),
        }
    }

    /// The number of stored ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True iff no ranges are stored.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Insert `value` at `range` unless an existing range intersects it.
    /// Returns `true` on success.
    pub fn insert(&mut self, range: AddressRange<A>, value: V) -> bool {
        if self.find_first_intersection(range).is_some() {
            return false;
        }
        self.ranges.insert(
            range.start(),
            Entry {
                size: range.size(),
                value,
            },
        );
        true
    }

    /// Remove the entry whose key equals `range` exactly. Returns `true` iff
    /// something was removed.
    pub fn remove_exact(&mut self, range: AddressRange<A>) -> bool {
        match self.ranges.get(&range.start()) {
            Some(entry) if entry.size == range.size() => {
                self.ranges.remove(&range.start());
                true
            }
            _ => false,
        }
    }

    /// Return the value stored for the range starting exactly at `start`,
    /// if any — a thin convenience over the address-keyed storage.
    pub fn get_at(&self, start: A) -> Option<&V> {
        self.ranges.get(&start).map(|e| &e.value)
    }

    /// The lowest-keyed stored range intersecting `range`, or `None`.
    ///
    /// Locates the first entry with key `>= range`'s start; if it or its
    /// predecessor intersects, returns it.
    pub fn find_first_intersection(
        &self,
        range: AddressRange<A>,
    ) -> Option<(AddressRange<A>, &V)> {
        if let Some((&start, entry)) = self.ranges.range(..range.start()).next_back() {
            let stored = AddressRange::new(start, entry.size);
            if stored.intersects(&range) {
                return Some((stored, &entry.value));
            }
        }
        if let Some((&start, entry)) = self.ranges.range(range.start()..).next() {
            let stored = AddressRange::new(start, entry.size);
            if stored.intersects(&range) {
                return Some((stored, &entry.value));
            }
        }
        None
    }

    /// The stored range that entirely contains `range`, if any.
    pub fn find_containing(&self, range: AddressRange<A>) -> Option<(AddressRange<A>, &V)> {
        self.find_first_intersection(range)
            .filter(|(stored, _)| stored.contains(&range))
    }

    /// All stored ranges intersecting `range`, in address order.
    pub fn find_intersecting(&self, range: AddressRange<A>) -> Vec<(AddressRange<A>, &V)> {
        let mut out = Vec::new();
        if let Some((&start, entry)) = self.ranges.range(..range.start()).next_back() {
            let stored = AddressRange::new(start, entry.size);
            if stored.intersects(&range) {
                out.push((stored, &entry.value));
            }
        }
        for (&start, entry) in self.ranges.range(range.start()..) {
            let stored = AddressRange::new(start, entry.size);
            if stored.start() >= range.end() {
                break;
            }
            if stored.intersects(&range) {
                out.push((stored, &entry.value));
            }
        }
        out
    }

    /// Iterate over every stored `(range, value)` pair in address order.
    pub fn iter(&self) -> impl Iterator<Item = (AddressRange<A>, &V)> {
        self.ranges
            .iter()
            .map(|(&start, entry)| (AddressRange::new(start, entry.size), &entry.value))
    }

    /// Mutably iterate over every stored `(range, value)` pair in address order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (AddressRange<A>, &mut V)> {
        self.ranges
            .iter_mut()
            .map(|(&start, entry)| (AddressRange::new(start, entry.size), &mut entry.value))
    }
}

impl<A, V> Default for AddressSpace<A, V>
where
    A: Copy + Ord + Add<u32, Output = A>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_overlap() {
        let mut s: AddressSpace<u32, &str> = AddressSpace::new();
        assert!(s.insert(AddressRange::new(0, 10), "a"));
        assert!(!s.insert(AddressRange::new(5, 10), "b"));
        assert!(s.insert(AddressRange::new(10, 10), "c"));
    }

    #[test]
    fn find_first_intersection_checks_predecessor_and_successor() {
        let mut s: AddressSpace<u32, &str> = AddressSpace::new();
        s.insert(AddressRange::new(0, 10), "a");
        s.insert(AddressRange::new(20, 10), "b");

        assert!(s.find_first_intersection(AddressRange::new(5, 1)).is_some());
        assert!(s.find_first_intersection(AddressRange::new(25, 1)).is_some());
        assert!(s.find_first_intersection(AddressRange::new(10, 10)).is_none());
    }

    #[test]
    fn find_containing() {
        let mut s: AddressSpace<u32, &str> = AddressSpace::new();
        s.insert(AddressRange::new(0, 10), "a");
        let (r, v) = s.find_containing(AddressRange::new(2, 4)).unwrap();
        assert_eq!(r.start(), 0);
        assert_eq!(*v, "a");
        assert!(s.find_containing(AddressRange::new(8, 4)).is_none());
    }

    #[test]
    fn find_intersecting_spans_multiple() {
        let mut s: AddressSpace<u32, i32> = AddressSpace::new();
        s.insert(AddressRange::new(0, 10), 1);
        s.insert(AddressRange::new(10, 10), 2);
        s.insert(AddressRange::new(20, 10), 3);
        s.insert(AddressRange::new(40, 10), 4);

        let hits = s.find_intersecting(AddressRange::new(5, 20));
        let vals: Vec<i32> = hits.iter().map(|(_, v)| **v).collect();
        assert_eq!(vals, vec![1, 2, 3]);
    }

    #[test]
    fn remove_exact_requires_exact_match() {
        let mut s: AddressSpace<u32, &str> = AddressSpace::new();
        s.insert(AddressRange::new(0, 10), "a");
        assert!(!s.remove_exact(AddressRange::new(0, 5)));
        assert!(s.remove_exact(AddressRange::new(0, 10)));
        assert!(s.is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn range_strat() -> impl Strategy<Value = AddressRange<u32>> {
        (0u32..200, 1u32..20).prop_map(|(start, size)| AddressRange::new(start, size))
    }

    proptest! {
        // Whatever order a batch of ranges is offered in, the stored set
        // never contains two ranges that intersect.
        #[test]
        fn stored_ranges_never_overlap(candidates in prop::collection::vec(range_strat(), 1..30)) {
            let mut s: AddressSpace<u32, ()> = AddressSpace::new();
            for r in candidates {
                s.insert(r, ());
            }
            let stored: Vec<AddressRange<u32>> = s.iter().map(|(r, _)| r).collect();
            for i in 0..stored.len() {
                for j in (i + 1)..stored.len() {
                    prop_assert!(!stored[i].intersects(&stored[j]));
                }
            }
        }

        // A range accepted by `insert` is always reachable afterwards
        // through both `get_at` and `find_first_intersection`.
        #[test]
        fn accepted_insert_is_findable(r in range_strat()) {
            let mut s: AddressSpace<u32, u8> = AddressSpace::new();
            prop_assert!(s.insert(r, 7));
            prop_assert_eq!(s.get_at(r.start()).copied(), Some(7));
            prop_assert!(s.find_first_intersection(r).is_some());
        }

        // Rejecting an overlapping insert never mutates the map.
        #[test]
        fn rejected_insert_leaves_map_unchanged(
            first in range_strat(),
            second in range_strat(),
        ) {
            let mut s: AddressSpace<u32, u8> = AddressSpace::new();
            prop_assert!(s.insert(first, 1));
            if first.intersects(&second) && second.start() != first.start() {
                let before: Vec<(u32, u32)> = s.iter().map(|(r, _)| (r.start(), r.size())).collect();
                prop_assert!(!s.insert(second, 2));
                let after: Vec<(u32, u32)> = s.iter().map(|(r, _)| (r.start(), r.size())).collect();
                prop_assert_eq!(before, after);
            }
        }
    }
}
