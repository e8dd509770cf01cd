//! Grouped views: per-ordinal record positions in CSR layout, and the lazy rating
//! lists and group streams built on top of them.

use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

use crate::dao::RecordSource;
use crate::error::PackError;
use crate::keys::SortedKeyIndex;
use crate::types::Rating;

/// Record positions grouped by a dense ordinal.
///
/// `offsets` has one entry per group plus a terminating entry; group `g` owns
/// `positions[offsets[g]..offsets[g + 1]]`. Within a group, positions ascend
/// (insertion order of the underlying records).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIndex {
    offsets: Vec<u32>,
    positions: Vec<u32>,
}

impl Default for GroupIndex {
    fn default() -> Self {
        GroupIndex {
            offsets: vec![0],
            positions: Vec::new(),
        }
    }
}

impl GroupIndex {
    /// Groups record indices `0..len` by `group_of(index)`, which must be `< group_count`.
    ///
    /// Two passes over the records: count, then scatter into prefix-sum offsets.
    pub fn build<F>(group_count: usize, len: usize, group_of: F) -> Self
    where
        F: Fn(usize) -> u32,
    {
        let mut offsets = vec![0u32; group_count + 1];
        for i in 0..len {
            offsets[group_of(i) as usize + 1] += 1;
        }
        for g in 0..group_count {
            offsets[g + 1] += offsets[g];
        }

        let mut cursor: Vec<u32> = offsets[..group_count].to_vec();
        let mut positions = vec![0u32; len];
        for i in 0..len {
            let g = group_of(i) as usize;
            positions[cursor[g] as usize] = i as u32;
            cursor[g] += 1;
        }

        GroupIndex { offsets, positions }
    }

    /// Assembles a group index from already-grouped position lists.
    pub fn from_groups<I, G>(groups: I) -> Result<Self, PackError>
    where
        I: IntoIterator<Item = G>,
        G: AsRef<[u32]>,
    {
        let mut offsets = vec![0u32];
        let mut positions = Vec::new();
        for group in groups {
            positions.extend_from_slice(group.as_ref());
            let end = u32::try_from(positions.len())
                .map_err(|_| PackError::CapacityExceeded(positions.len()))?;
            offsets.push(end);
        }
        Ok(GroupIndex { offsets, positions })
    }

    /// Keeps the positions accepted by `keep` and drops groups left empty.
    ///
    /// Returns the ordinals of the surviving groups alongside the filtered index.
    pub fn filter<F>(&self, keep: F) -> (Vec<usize>, GroupIndex)
    where
        F: Fn(u32) -> bool,
    {
        let mut kept = Vec::new();
        let mut offsets = vec![0u32];
        let mut positions = Vec::new();
        for ord in 0..self.group_count() {
            let before = positions.len();
            positions.extend(self.group(ord).iter().copied().filter(|&p| keep(p)));
            if positions.len() > before {
                kept.push(ord);
                // Bounded by `self.positions.len()`, whose offsets already fit in u32.
                offsets.push(positions.len() as u32);
            }
        }
        (kept, GroupIndex { offsets, positions })
    }

    pub fn group_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of positions across all groups.
    pub fn total(&self) -> usize {
        self.positions.len()
    }

    /// Positions belonging to `ordinal`; empty if the ordinal is out of range.
    #[inline]
    pub fn group(&self, ordinal: usize) -> &[u32] {
        if ordinal >= self.group_count() {
            return &[];
        }
        let start = self.offsets[ordinal] as usize;
        let end = self.offsets[ordinal + 1] as usize;
        &self.positions[start..end]
    }

    pub fn group_len(&self, ordinal: usize) -> usize {
        self.group(ordinal).len()
    }

    /// Every position, in group order.
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }
}

#[derive(Clone, Copy)]
enum Positions<'a> {
    All(usize),
    Subset(&'a [u32]),
}

/// A lazily-decoded list of ratings addressed by record position.
///
/// Cheap to copy; decoding happens on access through the owning [`RecordSource`].
#[derive(Clone, Copy)]
pub struct RatingList<'a> {
    source: &'a dyn RecordSource,
    positions: Positions<'a>,
}

impl<'a> RatingList<'a> {
    /// Every record `0..len` of `source`.
    pub fn all(source: &'a dyn RecordSource, len: usize) -> Self {
        RatingList {
            source,
            positions: Positions::All(len),
        }
    }

    /// The records of `source` at `positions`, in that order.
    pub fn subset(source: &'a dyn RecordSource, positions: &'a [u32]) -> Self {
        RatingList {
            source,
            positions: Positions::Subset(positions),
        }
    }

    pub fn empty(source: &'a dyn RecordSource) -> Self {
        Self::subset(source, &[])
    }

    pub fn len(&self) -> usize {
        match self.positions {
            Positions::All(n) => n,
            Positions::Subset(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record position of the `i`-th element.
    #[inline]
    pub fn position(&self, i: usize) -> Option<usize> {
        match self.positions {
            Positions::All(n) => (i < n).then_some(i),
            Positions::Subset(p) => p.get(i).map(|&x| x as usize),
        }
    }

    pub fn get(&self, i: usize) -> Option<Rating> {
        self.position(i).map(|pos| self.source.rating_at(pos))
    }

    pub fn iter(&self) -> RatingIter<'a> {
        RatingIter {
            list: *self,
            front: 0,
            back: self.len(),
        }
    }

    pub fn to_vec(&self) -> Vec<Rating> {
        self.iter().collect()
    }
}

impl std::fmt::Debug for RatingList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for RatingList<'a> {
    type Item = Rating;
    type IntoIter = RatingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Single-pass iterator over a [`RatingList`].
#[derive(Clone)]
pub struct RatingIter<'a> {
    list: RatingList<'a>,
    front: usize,
    back: usize,
}

impl Iterator for RatingIter<'_> {
    type Item = Rating;

    #[inline]
    fn next(&mut self) -> Option<Rating> {
        if self.front >= self.back {
            return None;
        }
        let r = self.list.get(self.front);
        self.front += 1;
        r
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl DoubleEndedIterator for RatingIter<'_> {
    fn next_back(&mut self) -> Option<Rating> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.list.get(self.back)
    }
}

impl ExactSizeIterator for RatingIter<'_> {}
impl FusedIterator for RatingIter<'_> {}

/// The ratings sharing one user (or item) id.
#[derive(Debug, Clone, Copy)]
pub struct RatingGroup<'a> {
    pub id: i64,
    pub ratings: RatingList<'a>,
}

impl RatingGroup<'_> {
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

impl<'a> IntoIterator for RatingGroup<'a> {
    type Item = Rating;
    type IntoIter = RatingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.ratings.iter()
    }
}

/// Streams groups in ascending key order.
pub struct GroupStream<'a> {
    source: &'a dyn RecordSource,
    keys: &'a SortedKeyIndex,
    groups: &'a GroupIndex,
    next: usize,
}

impl<'a> GroupStream<'a> {
    pub fn new(source: &'a dyn RecordSource, keys: &'a SortedKeyIndex, groups: &'a GroupIndex) -> Self {
        GroupStream {
            source,
            keys,
            groups,
            next: 0,
        }
    }
}

impl<'a> Iterator for GroupStream<'a> {
    type Item = RatingGroup<'a>;

    fn next(&mut self) -> Option<RatingGroup<'a>> {
        if self.next >= self.groups.group_count() || self.next >= self.keys.len() {
            return None;
        }
        let ord = self.next;
        self.next += 1;
        Some(RatingGroup {
            id: self.keys.id_of(ord),
            ratings: RatingList::subset(self.source, self.groups.group(ord)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let total = self.groups.group_count().min(self.keys.len());
        let n = total.saturating_sub(self.next);
        (n, Some(n))
    }
}

impl ExactSizeIterator for GroupStream<'_> {}
impl FusedIterator for GroupStream<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource(Vec<Rating>);

    impl RecordSource for VecSource {
        fn record_count(&self) -> usize {
            self.0.len()
        }

        fn rating_at(&self, index: usize) -> Rating {
            self.0[index]
        }
    }

    #[test]
    fn build_groups_by_key_in_insertion_order() {
        let keys = [2u32, 0, 2, 1, 0, 2];
        let g = GroupIndex::build(4, keys.len(), |i| keys[i]);
        assert_eq!(g.group_count(), 4);
        assert_eq!(g.group(0), &[1, 4]);
        assert_eq!(g.group(1), &[3]);
        assert_eq!(g.group(2), &[0, 2, 5]);
        assert!(g.group(3).is_empty());
        assert!(g.group(99).is_empty());
        assert_eq!(g.total(), 6);
    }

    #[test]
    fn from_groups_matches_build() {
        let keys = [1u32, 0, 1];
        let built = GroupIndex::build(2, 3, |i| keys[i]);
        let assembled = GroupIndex::from_groups(vec![vec![1u32], vec![0, 2]]).unwrap();
        assert_eq!(built, assembled);
    }

    #[test]
    fn filter_drops_emptied_groups() {
        let keys = [2u32, 0, 2, 1, 0, 2];
        let g = GroupIndex::build(3, keys.len(), |i| keys[i]);
        let (kept, filtered) = g.filter(|p| p != 3 && p < 5);
        assert_eq!(kept, vec![0, 2]);
        assert_eq!(filtered.group_count(), 2);
        assert_eq!(filtered.group(0), &[1, 4]);
        assert_eq!(filtered.group(1), &[0, 2]);
        assert_eq!(filtered.total(), 4);

        let (none, empty) = g.filter(|_| false);
        assert!(none.is_empty());
        assert_eq!(empty, GroupIndex::default());
    }

    #[test]
    fn empty_group_index() {
        let g = GroupIndex::default();
        assert_eq!(g.group_count(), 0);
        assert!(g.group(0).is_empty());
    }

    #[test]
    fn rating_list_iterates_subset() {
        let src = VecSource(vec![
            Rating::new(1, 10, 1.0),
            Rating::new(2, 20, 2.0),
            Rating::new(3, 30, 3.0),
        ]);
        let positions = [2u32, 0];
        let list = RatingList::subset(&src, &positions);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).unwrap().user, 3);
        assert_eq!(list.position(1), Some(0));
        assert!(list.get(2).is_none());
        let rev: Vec<i64> = list.iter().rev().map(|r| r.user).collect();
        assert_eq!(rev, vec![1, 3]);

        let all = RatingList::all(&src, 3);
        assert_eq!(all.iter().len(), 3);
        assert!(RatingList::empty(&src).is_empty());
    }

    #[test]
    fn group_stream_walks_keys() {
        let src = VecSource(vec![Rating::new(5, 1, 1.0), Rating::new(9, 1, 2.0), Rating::new(5, 2, 3.0)]);
        let keys = SortedKeyIndex::from_keys([5, 9]);
        let groups = GroupIndex::build(2, 3, |i| keys.ordinal_of(src.0[i].user).unwrap() as u32);
        let stream = GroupStream::new(&src, &keys, &groups);
        assert_eq!(stream.len(), 2);
        let collected: Vec<(i64, usize)> = stream.map(|g| (g.id, g.len())).collect();
        assert_eq!(collected, vec![(5, 2), (9, 1)]);
    }
}
