//! The packed rating store, its builder, and the record cursor.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::chunks::{ColumnStore, MAX_ROWS};
use crate::dao::{RatingDao, RecordSource};
use crate::error::PackError;
use crate::format::check_timestamp;
use crate::groups::{GroupIndex, RatingList};
use crate::keys::{KeyInterner, SortedKeyIndex};
use crate::telemetry::{noop_event_listener, PackEvent, PackEventListener};
use crate::types::{ItemId, Rating, Timestamp, UserId, Value};

/// Accumulates ratings and freezes them into a [`PackedRatingStore`].
///
/// Ids are interned as they arrive; ordinals are provisional (first-seen order) until
/// [`build`](Self::build) sorts the key indexes and rewrites the stored ordinals once.
/// Record indices returned by [`add`](Self::add) stay valid across the build as long as
/// no slot was released.
pub struct PackedRatingBuilder {
    columns: ColumnStore,
    users: KeyInterner,
    items: KeyInterner,
    free: BTreeSet<usize>,
    built: bool,
    event_listener: Arc<dyn PackEventListener>,
}

impl Default for PackedRatingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PackedRatingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedRatingBuilder")
            .field("len", &self.len())
            .field("users", &self.users.len())
            .field("items", &self.items.len())
            .field("free", &self.free.len())
            .field("built", &self.built)
            .finish()
    }
}

impl PackedRatingBuilder {
    pub fn new() -> Self {
        PackedRatingBuilder {
            columns: ColumnStore::new(),
            users: KeyInterner::new(),
            items: KeyInterner::new(),
            free: BTreeSet::new(),
            built: false,
            event_listener: noop_event_listener(),
        }
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn PackEventListener>) -> Self {
        self.event_listener = listener;
        self
    }

    /// Number of live rows (released slots excluded).
    pub fn len(&self) -> usize {
        self.columns.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Appends a rating and returns its record index.
    ///
    /// Released slots are reused lowest-first before the store grows.
    pub fn add(
        &mut self,
        user: UserId,
        item: ItemId,
        value: Value,
        timestamp: Option<Timestamp>,
    ) -> Result<usize, PackError> {
        self.ensure_open()?;
        check_timestamp(timestamp)?;
        if self.free.is_empty() && self.columns.len() >= MAX_ROWS {
            return Err(PackError::CapacityExceeded(self.columns.len()));
        }
        let u = self.users.intern(user);
        let i = self.items.intern(item);
        match self.free.pop_first() {
            Some(index) => {
                self.columns.set(index, u, i, value, timestamp);
                Ok(index)
            }
            None => Ok(self.columns.push(u, i, value, timestamp)),
        }
    }

    pub fn add_rating(&mut self, rating: Rating) -> Result<usize, PackError> {
        self.add(rating.user, rating.item, rating.value, rating.timestamp)
    }

    /// Adds every rating of `ratings`.
    pub fn extend<I: IntoIterator<Item = Rating>>(&mut self, ratings: I) -> Result<(), PackError> {
        for r in ratings {
            self.add_rating(r)?;
        }
        Ok(())
    }

    /// Overwrites the live row at `index`.
    pub fn set(
        &mut self,
        index: usize,
        user: UserId,
        item: ItemId,
        value: Value,
        timestamp: Option<Timestamp>,
    ) -> Result<(), PackError> {
        self.ensure_open()?;
        self.ensure_live(index)?;
        check_timestamp(timestamp)?;
        let u = self.users.intern(user);
        let i = self.items.intern(item);
        self.columns.set(index, u, i, value, timestamp);
        Ok(())
    }

    /// Frees the row at `index` for reuse by a later `add`.
    pub fn release(&mut self, index: usize) -> Result<(), PackError> {
        self.ensure_open()?;
        self.ensure_live(index)?;
        if index + 1 == self.columns.len() {
            self.columns.truncate(index);
            // Trailing free slots collapse as well.
            while let Some(&last) = self.free.last() {
                if last + 1 != self.columns.len() {
                    break;
                }
                self.free.pop_last();
                self.columns.truncate(last);
            }
        } else {
            self.free.insert(index);
        }
        Ok(())
    }

    /// Reads back the live row at `index`.
    pub fn get(&self, index: usize) -> Option<Rating> {
        if index >= self.columns.len() || self.free.contains(&index) {
            return None;
        }
        let row = self.columns.get(index);
        Some(Rating {
            user: self.users.id_of(row.user),
            item: self.items.id_of(row.item),
            value: row.value,
            timestamp: row.timestamp,
        })
    }

    /// Repacks, then shuffles all rows uniformly (Fisher-Yates).
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), PackError> {
        self.ensure_open()?;
        self.repack();
        for i in (1..self.columns.len()).rev() {
            let j = rng.random_range(0..=i);
            self.columns.swap(i, j);
        }
        Ok(())
    }

    /// Freezes the builder into an immutable store.
    ///
    /// # Panics
    /// If the builder was already frozen by [`build_in_place`](Self::build_in_place).
    pub fn build(mut self) -> PackedRatingStore {
        assert!(
            !self.built,
            "rating builder already built; use the store returned by build_in_place"
        );
        self.repack();
        let listener = self.event_listener.clone();
        let (user_ids, user_map) = self.users.freeze();
        let (item_ids, item_map) = self.items.freeze();
        self.columns.remap_ordinals(&user_map, &item_map);
        let store = PackedRatingStore::from_parts(self.columns, user_ids, item_ids);
        listener.on_event(PackEvent::StoreBuilt {
            ratings: store.len(),
            users: store.user_ids.len(),
            items: store.item_ids.len(),
        });
        store
    }

    /// Builds without consuming the builder; every later mutation fails with
    /// [`PackError::AlreadyBuilt`].
    pub fn build_in_place(&mut self) -> Result<PackedRatingStore, PackError> {
        self.ensure_open()?;
        let taken = PackedRatingBuilder {
            columns: std::mem::take(&mut self.columns),
            users: std::mem::take(&mut self.users),
            items: std::mem::take(&mut self.items),
            free: std::mem::take(&mut self.free),
            built: false,
            event_listener: self.event_listener.clone(),
        };
        self.built = true;
        Ok(taken.build())
    }

    // Moves rows from the end into released slots until the store is dense.
    fn repack(&mut self) {
        while let Some(&hole) = self.free.first() {
            let last = self.columns.len() - 1;
            if self.free.remove(&last) {
                self.columns.truncate(last);
                continue;
            }
            self.free.pop_first();
            self.columns.copy_row(last, hole);
            self.columns.truncate(last);
        }
    }

    fn ensure_open(&self) -> Result<(), PackError> {
        if self.built {
            Err(PackError::AlreadyBuilt)
        } else {
            Ok(())
        }
    }

    fn ensure_live(&self, index: usize) -> Result<(), PackError> {
        if index >= self.columns.len() {
            return Err(PackError::IndexOutOfRange {
                index,
                len: self.columns.len(),
            });
        }
        if self.free.contains(&index) {
            return Err(PackError::InvalidArgument(format!(
                "record {} has already been released",
                index
            )));
        }
        Ok(())
    }
}

/// Immutable, densely indexed rating store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedRatingStore {
    columns: ColumnStore,
    user_ids: SortedKeyIndex,
    item_ids: SortedKeyIndex,
    user_groups: GroupIndex,
    item_groups: GroupIndex,
}

impl PackedRatingStore {
    pub fn builder() -> PackedRatingBuilder {
        PackedRatingBuilder::new()
    }

    /// Builds a store holding every rating of `ratings`, duplicates included.
    pub fn from_ratings<I: IntoIterator<Item = Rating>>(ratings: I) -> Result<Self, PackError> {
        let mut builder = PackedRatingBuilder::new();
        builder.extend(ratings)?;
        Ok(builder.build())
    }

    /// Builds a store keeping one rating per `(user, item)` pair: the one with the
    /// greatest timestamp, the later one in input order on ties.
    pub fn from_latest<I: IntoIterator<Item = Rating>>(ratings: I) -> Result<Self, PackError> {
        let mut all: Vec<Rating> = ratings.into_iter().collect();
        all.sort_by_key(|r| r.timestamp);

        let mut slots: HashMap<(UserId, ItemId), usize> = HashMap::new();
        let mut latest: Vec<Rating> = Vec::new();
        for r in all {
            match slots.get(&(r.user, r.item)) {
                Some(&slot) => latest[slot] = r,
                None => {
                    slots.insert((r.user, r.item), latest.len());
                    latest.push(r);
                }
            }
        }
        Self::from_ratings(latest)
    }

    pub(crate) fn from_parts(columns: ColumnStore, user_ids: SortedKeyIndex, item_ids: SortedKeyIndex) -> Self {
        let len = columns.len();
        let (user_groups, item_groups) = rayon::join(
            || GroupIndex::build(user_ids.len(), len, |i| columns.user(i)),
            || GroupIndex::build(item_ids.len(), len, |i| columns.item(i)),
        );
        PackedRatingStore {
            columns,
            user_ids,
            item_ids,
            user_groups,
            item_groups,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True if at least one stored rating carries a timestamp.
    pub fn has_timestamps(&self) -> bool {
        self.columns.has_timestamps()
    }

    /// A cursor positioned at `index`; check [`RatingCursor::is_valid`] before reading.
    pub fn get_entry(&self, index: usize) -> RatingCursor<'_> {
        RatingCursor { store: self, index }
    }

    /// Owned copy of record `index`, or `None` if it is out of range.
    pub fn entry(&self, index: usize) -> Option<IndexedRating> {
        let cursor = self.get_entry(index);
        cursor.is_valid().then(|| cursor.to_indexed())
    }

    /// Every record in index order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = IndexedRating> + '_ {
        (0..self.len()).map(move |i| self.get_entry(i).to_indexed())
    }

    /// Records by `user` in insertion order; empty for an unknown user.
    pub fn user_entries(&self, user: UserId) -> impl Iterator<Item = IndexedRating> + '_ {
        let positions = match self.user_ids.try_ordinal(user) {
            Some(ord) => self.user_groups.group(ord),
            None => &[],
        };
        positions.iter().map(move |&p| self.get_entry(p as usize).to_indexed())
    }

    /// Records of `item` in insertion order; empty for an unknown item.
    pub fn item_entries(&self, item: ItemId) -> impl Iterator<Item = IndexedRating> + '_ {
        let positions = match self.item_ids.try_ordinal(item) {
            Some(ord) => self.item_groups.group(ord),
            None => &[],
        };
        positions.iter().map(move |&p| self.get_entry(p as usize).to_indexed())
    }

    /// Approximate heap footprint of the columns and indexes, in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.columns.heap_bytes()
            + (self.user_ids.len() + self.item_ids.len()) * 8
            + (self.user_groups.total() + self.item_groups.total()) * 4
            + (self.user_groups.group_count() + self.item_groups.group_count() + 2) * 4
    }

    /// Structural self-check for stores that did not come out of a builder.
    pub(crate) fn check_structure(&self) -> Result<(), String> {
        if !self.columns.is_well_formed() {
            return Err("column chunks do not match the record count".to_string());
        }
        for (side, ids) in [("user", &self.user_ids), ("item", &self.item_ids)] {
            if ids.keys().windows(2).any(|w| w[0] >= w[1]) {
                return Err(format!("{} ids are not strictly ascending", side));
            }
        }
        let n = self.len();
        for (side, ids, groups) in [
            ("user", &self.user_ids, &self.user_groups),
            ("item", &self.item_ids, &self.item_groups),
        ] {
            if groups.group_count() != ids.len() || groups.total() != n {
                return Err(format!(
                    "{} groups ({} groups, {} positions) do not match {} ids and {} records",
                    side,
                    groups.group_count(),
                    groups.total(),
                    ids.len(),
                    n
                ));
            }
            if groups.positions().iter().any(|&p| p as usize >= n) {
                return Err(format!("{} groups reference records past {}", side, n));
            }
        }
        for i in 0..n {
            let row = self.columns.get(i);
            if row.user as usize >= self.user_ids.len() || row.item as usize >= self.item_ids.len() {
                return Err(format!("record {} has an ordinal past its key index", i));
            }
        }
        Ok(())
    }
}

impl RecordSource for PackedRatingStore {
    fn record_count(&self) -> usize {
        self.len()
    }

    fn rating_at(&self, index: usize) -> Rating {
        self.get_entry(index).rating()
    }
}

impl RatingDao for PackedRatingStore {
    fn user_ids(&self) -> &SortedKeyIndex {
        &self.user_ids
    }

    fn item_ids(&self) -> &SortedKeyIndex {
        &self.item_ids
    }

    fn user_groups(&self) -> &GroupIndex {
        &self.user_groups
    }

    fn item_groups(&self) -> &GroupIndex {
        &self.item_groups
    }

    fn all_ratings(&self) -> RatingList<'_> {
        RatingList::all(self, self.len())
    }
}

/// Repositionable read cursor over a [`PackedRatingStore`].
///
/// Accessors panic when the cursor is not [valid](Self::is_valid).
#[derive(Debug, Clone, Copy)]
pub struct RatingCursor<'a> {
    store: &'a PackedRatingStore,
    index: usize,
}

impl<'a> RatingCursor<'a> {
    pub fn seek(&mut self, index: usize) {
        self.index = index;
    }

    /// Moves to the next record; returns whether the cursor is still valid.
    pub fn advance(&mut self) -> bool {
        self.index = self.index.saturating_add(1);
        self.is_valid()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_valid(&self) -> bool {
        self.index < self.store.len()
    }

    pub fn user_ordinal(&self) -> usize {
        self.store.columns.user(self.index) as usize
    }

    pub fn item_ordinal(&self) -> usize {
        self.store.columns.item(self.index) as usize
    }

    pub fn user_id(&self) -> UserId {
        self.store.user_ids.id_of(self.user_ordinal())
    }

    pub fn item_id(&self) -> ItemId {
        self.store.item_ids.id_of(self.item_ordinal())
    }

    pub fn value(&self) -> Value {
        self.store.columns.value(self.index)
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.store.columns.timestamp(self.index)
    }

    pub fn rating(&self) -> Rating {
        let row = self.store.columns.get(self.index);
        Rating {
            user: self.store.user_ids.id_of(row.user as usize),
            item: self.store.item_ids.id_of(row.item as usize),
            value: row.value,
            timestamp: row.timestamp,
        }
    }

    /// Detaches the current record from the cursor.
    pub fn to_indexed(&self) -> IndexedRating {
        let row = self.store.columns.get(self.index);
        IndexedRating {
            index: self.index,
            user_ordinal: row.user as usize,
            item_ordinal: row.item as usize,
            rating: Rating {
                user: self.store.user_ids.id_of(row.user as usize),
                item: self.store.item_ids.id_of(row.item as usize),
                value: row.value,
                timestamp: row.timestamp,
            },
        }
    }
}

/// An owned record together with its position and ordinals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedRating {
    pub index: usize,
    pub user_ordinal: usize,
    pub item_ordinal: usize,
    pub rating: Rating,
}

impl IndexedRating {
    pub fn user_id(&self) -> UserId {
        self.rating.user
    }

    pub fn item_id(&self) -> ItemId {
        self.rating.item
    }

    pub fn value(&self) -> Value {
        self.rating.value
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.rating.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::CHUNK_SIZE;
    use crate::types::SortOrder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_builder() -> PackedRatingBuilder {
        let mut b = PackedRatingBuilder::new();
        b.add(42, 7, 4.0, Some(10)).unwrap();
        b.add(39, 7, 3.5, Some(11)).unwrap();
        b.add(42, 3, 2.0, None).unwrap();
        b
    }

    #[test]
    fn add_returns_sequential_indices() {
        let mut b = PackedRatingBuilder::new();
        for k in 0..10 {
            assert_eq!(b.add(k, k * 2, k as f64, None).unwrap(), k as usize);
        }
        assert_eq!(b.len(), 10);
    }

    #[test]
    fn build_sorts_ordinals_and_keeps_indices() {
        let store = sample_builder().build();
        assert_eq!(store.len(), 3);
        assert_eq!(store.user_ids().keys(), &[39, 42]);
        assert_eq!(store.item_ids().keys(), &[3, 7]);

        let c = store.get_entry(0);
        assert_eq!(c.user_id(), 42);
        assert_eq!(c.user_ordinal(), 1);
        assert_eq!(c.item_ordinal(), 1);
        assert_eq!(c.timestamp(), Some(10));

        let e = store.entry(2).unwrap();
        assert_eq!(e.rating, Rating::new(42, 3, 2.0));
        assert!(store.entry(3).is_none());
    }

    #[test]
    fn cursor_seeks_and_reports_validity() {
        let store = sample_builder().build();
        let mut c = store.get_entry(0);
        assert!(c.is_valid());
        c.seek(1);
        assert_eq!(c.value(), 3.5);
        assert!(c.advance());
        assert!(!c.advance());
        c.seek(usize::MAX);
        assert!(!c.is_valid());
        assert!(!c.advance());
    }

    #[test]
    fn released_slots_are_reused_lowest_first() {
        let mut b = PackedRatingBuilder::new();
        for k in 0..5 {
            b.add(k, 1, 1.0, None).unwrap();
        }
        b.release(3).unwrap();
        b.release(1).unwrap();
        assert_eq!(b.len(), 3);
        assert!(b.get(1).is_none());
        assert_eq!(b.add(10, 1, 1.0, None).unwrap(), 1);
        assert_eq!(b.add(11, 1, 1.0, None).unwrap(), 3);
        assert_eq!(b.add(12, 1, 1.0, None).unwrap(), 5);
    }

    #[test]
    fn release_rejects_bad_indices() {
        let mut b = sample_builder();
        assert!(matches!(
            b.release(9),
            Err(PackError::IndexOutOfRange { index: 9, len: 3 })
        ));
        b.release(0).unwrap();
        assert!(matches!(b.release(0), Err(PackError::InvalidArgument(_))));
    }

    #[test]
    fn releasing_the_tail_shrinks_the_builder() {
        let mut b = sample_builder();
        b.release(1).unwrap();
        b.release(2).unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b.add(1, 1, 1.0, None).unwrap(), 1);
    }

    #[test]
    fn build_repacks_released_slots() {
        let mut b = PackedRatingBuilder::new();
        for k in 0..6 {
            b.add(k, 100 + k, k as f64, None).unwrap();
        }
        b.release(0).unwrap();
        b.release(2).unwrap();
        let store = b.build();
        assert_eq!(store.len(), 4);
        let mut users: Vec<i64> = store.stream_all().map(|r| r.user).collect();
        users.sort_unstable();
        assert_eq!(users, vec![1, 3, 4, 5]);
        // Unreferenced ids from released rows stay interned.
        assert!(store.user_ids().contains(0));
        assert!(store.user_ratings(0).unwrap().is_empty());
    }

    #[test]
    fn set_overwrites_a_live_row() {
        let mut b = sample_builder();
        b.set(1, 5, 5, 5.0, Some(5)).unwrap();
        assert_eq!(b.get(1), Some(Rating::with_timestamp(5, 5, 5.0, 5)));
        assert!(b.set(7, 5, 5, 5.0, None).is_err());
    }

    #[test]
    fn built_builder_rejects_mutation() {
        let mut b = sample_builder();
        let store = b.build_in_place().unwrap();
        assert_eq!(store.len(), 3);
        assert!(b.is_built());
        assert!(matches!(b.add(1, 1, 1.0, None), Err(PackError::AlreadyBuilt)));
        assert!(matches!(b.release(0), Err(PackError::AlreadyBuilt)));
        assert!(matches!(b.build_in_place(), Err(PackError::AlreadyBuilt)));
    }

    #[test]
    fn shuffle_permutes_rows() {
        let mut b = PackedRatingBuilder::new();
        for k in 0..200 {
            b.add(k, k, k as f64, None).unwrap();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        b.shuffle(&mut rng).unwrap();
        let store = b.build();
        let users: Vec<i64> = store.stream_all().map(|r| r.user).collect();
        let mut sorted = users.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..200).collect::<Vec<_>>());
        assert_ne!(users, sorted);
    }

    #[test]
    fn from_latest_keeps_newest_rating_per_pair() {
        let store = PackedRatingStore::from_latest(vec![
            Rating::with_timestamp(1, 1, 1.0, 30),
            Rating::with_timestamp(1, 1, 2.0, 10),
            Rating::with_timestamp(1, 2, 3.0, 5),
            Rating::with_timestamp(1, 2, 4.0, 5),
        ])
        .unwrap();
        assert_eq!(store.len(), 2);
        let v = store.user_rating_vector(1);
        assert_eq!(v[&1], 1.0);
        assert_eq!(v[&2], 4.0);
    }

    #[test]
    fn grouped_entries_follow_insertion_order() {
        let store = sample_builder().build();
        let idx: Vec<usize> = store.user_entries(42).map(|e| e.index).collect();
        assert_eq!(idx, vec![0, 2]);
        assert_eq!(store.item_entries(7).count(), 2);
        assert_eq!(store.user_entries(1000).count(), 0);
    }

    #[test]
    #[should_panic(expected = "already built")]
    fn build_after_build_in_place_panics() {
        let mut b = sample_builder();
        b.build_in_place().unwrap();
        b.build();
    }

    #[test]
    fn reserved_timestamp_is_rejected() {
        let mut b = sample_builder();
        assert!(matches!(
            b.add(1, 1, 1.0, Some(i64::MIN)),
            Err(PackError::InvalidArgument(_))
        ));
        assert_eq!(b.len(), 3);
        assert!(matches!(
            b.set(0, 1, 1, 1.0, Some(i64::MIN)),
            Err(PackError::InvalidArgument(_))
        ));
        assert_eq!(b.get(0), Some(Rating::with_timestamp(42, 7, 4.0, 10)));

        let store = PackedRatingStore::from_ratings(vec![Rating::with_timestamp(1, 2, 3.0, i64::MIN + 1)]).unwrap();
        assert_eq!(store.get_entry(0).timestamp(), Some(i64::MIN + 1));
        assert!(PackedRatingStore::from_ratings(vec![Rating::with_timestamp(1, 2, 3.0, i64::MIN)]).is_err());
    }

    #[test]
    fn stream_sorted_orders() {
        let store = PackedRatingStore::from_ratings(vec![
            Rating::with_timestamp(2, 20, 1.0, 30),
            Rating::with_timestamp(1, 20, 2.0, 10),
            Rating::new(2, 10, 3.0),
            Rating::with_timestamp(1, 10, 4.0, 10),
        ])
        .unwrap();

        let any: Vec<f64> = store.stream_sorted(SortOrder::Any).map(|r| r.value).collect();
        assert_eq!(any, vec![1.0, 2.0, 3.0, 4.0]);

        let by_time: Vec<(Option<i64>, f64)> = store
            .stream_sorted(SortOrder::Timestamp)
            .map(|r| (r.timestamp, r.value))
            .collect();
        assert_eq!(
            by_time,
            vec![(None, 3.0), (Some(10), 2.0), (Some(10), 4.0), (Some(30), 1.0)]
        );

        let by_user: Vec<(i64, f64)> = store.stream_sorted(SortOrder::User).map(|r| (r.user, r.value)).collect();
        assert_eq!(by_user, vec![(1, 2.0), (1, 4.0), (2, 1.0), (2, 3.0)]);

        let by_item: Vec<(i64, f64)> = store.stream_sorted(SortOrder::Item).map(|r| (r.item, r.value)).collect();
        assert_eq!(by_item, vec![(10, 3.0), (10, 4.0), (20, 1.0), (20, 2.0)]);
    }

    #[test]
    fn heap_bytes_grows_by_whole_chunks() {
        let empty = PackedRatingStore::from_ratings(Vec::new()).unwrap();
        let one = PackedRatingStore::from_ratings(vec![Rating::new(1, 1, 1.0)]).unwrap();
        let full = PackedRatingStore::from_ratings((0..CHUNK_SIZE as i64).map(|k| Rating::new(k, 1, 1.0))).unwrap();
        assert!(one.heap_bytes() > empty.heap_bytes());
        // One chunk either way; only the key and group tables differ.
        assert_eq!(
            full.heap_bytes() - one.heap_bytes(),
            (CHUNK_SIZE - 1) * 8 + 2 * (CHUNK_SIZE - 1) * 4 + (CHUNK_SIZE - 1) * 4
        );
    }

    #[test]
    fn store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PackedRatingStore>();
    }
}
