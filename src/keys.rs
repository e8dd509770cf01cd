//! Key interning: dense 0-based ordinals for sparse 64-bit identifiers.
//!
//! [`SortedKeyIndex`] is the frozen form: a sorted, deduplicated array searched by
//! binary search, so ordinals follow ascending identifier order. [`KeyInterner`] is
//! the incremental form used while a store is being built; it hands out ordinals in
//! first-seen order and is converted into a sorted index (plus a remap table) once.

use crate::error::PackError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable, sorted key index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedKeyIndex {
    keys: Vec<i64>,
}

impl SortedKeyIndex {
    /// Builds an index from arbitrary identifiers; duplicates are collapsed.
    pub fn from_keys<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        let mut keys: Vec<i64> = ids.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self { keys }
    }

    /// Wraps keys that are already strictly ascending.
    pub(crate) fn from_sorted_unchecked(keys: Vec<i64>) -> Self {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        Self { keys }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up the ordinal of `id`, returning `None` if it was never interned.
    #[inline]
    pub fn try_ordinal(&self, id: i64) -> Option<usize> {
        self.keys.binary_search(&id).ok()
    }

    /// Looks up the ordinal of `id`.
    ///
    /// # Errors
    /// Returns [`PackError::KeyNotFound`] if `id` is not in the index.
    pub fn ordinal_of(&self, id: i64) -> Result<usize, PackError> {
        self.try_ordinal(id).ok_or(PackError::KeyNotFound(id))
    }

    /// Returns the identifier at `ordinal`.
    ///
    /// # Panics
    /// Panics if `ordinal >= self.len()`.
    #[inline]
    pub fn id_of(&self, ordinal: usize) -> i64 {
        assert!(
            ordinal < self.keys.len(),
            "ordinal {} out of range for key index of size {}",
            ordinal,
            self.keys.len()
        );
        self.keys[ordinal]
    }

    pub fn contains(&self, id: i64) -> bool {
        self.try_ordinal(id).is_some()
    }

    /// First ordinal whose key is `>= id`.
    pub fn lower_bound(&self, id: i64) -> usize {
        self.keys.partition_point(|&k| k < id)
    }

    /// First ordinal whose key is `> id`.
    pub fn upper_bound(&self, id: i64) -> usize {
        self.keys.partition_point(|&k| k <= id)
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = i64> + '_ {
        self.keys.iter().copied()
    }
}

/// Incremental interner handing out ordinals in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct KeyInterner {
    ordinals: HashMap<i64, u32>,
    keys: Vec<i64>,
}

impl KeyInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ordinal for `id`, assigning the next free one if it is new.
    pub fn intern(&mut self, id: i64) -> u32 {
        if let Some(&ord) = self.ordinals.get(&id) {
            return ord;
        }
        let ord = self.keys.len() as u32;
        self.ordinals.insert(id, ord);
        self.keys.push(id);
        ord
    }

    pub fn get(&self, id: i64) -> Option<u32> {
        self.ordinals.get(&id).copied()
    }

    /// Identifier for an interned ordinal.
    pub fn id_of(&self, ordinal: u32) -> i64 {
        self.keys[ordinal as usize]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Freezes the interner into a sorted index.
    ///
    /// The returned table maps each first-seen ordinal to its sorted ordinal:
    /// `remap[old] == index.ordinal_of(id_of(old))`.
    pub fn freeze(self) -> (SortedKeyIndex, Vec<u32>) {
        let mut sorted = self.keys;
        sorted.sort_unstable();
        let mut remap = vec![0u32; sorted.len()];
        for (new_ord, key) in sorted.iter().enumerate() {
            remap[self.ordinals[key] as usize] = new_ord as u32;
        }
        (SortedKeyIndex::from_sorted_unchecked(sorted), remap)
    }
}
