//! Read-side query interface shared by in-memory stores, pack readers and windowed views.

use std::collections::{BTreeMap, BTreeSet};

use crate::groups::{GroupIndex, GroupStream, RatingGroup, RatingIter, RatingList};
use crate::keys::SortedKeyIndex;
use crate::types::{ItemId, Rating, SortOrder, UserId, Value};

/// Random access to decoded ratings by record position.
pub trait RecordSource: Send + Sync {
    /// Number of addressable records.
    fn record_count(&self) -> usize;

    /// Decodes the record at `index`.
    ///
    /// # Panics
    /// Implementations panic if `index >= record_count()`.
    fn rating_at(&self, index: usize) -> Rating;
}

/// Query interface over a set of ratings grouped by user and by item.
///
/// Implementors supply the key indexes and group tables; everything else is derived.
/// Lookups of unknown ids never fail: `*_ratings` return `None`, vector and set
/// lookups return empty collections.
pub trait RatingDao: RecordSource {
    fn user_ids(&self) -> &SortedKeyIndex;
    fn item_ids(&self) -> &SortedKeyIndex;

    /// Positions grouped by user ordinal.
    fn user_groups(&self) -> &GroupIndex;

    /// Positions grouped by item ordinal.
    fn item_groups(&self) -> &GroupIndex;

    /// Every rating visible through this view, in storage order.
    fn all_ratings(&self) -> RatingList<'_>;

    fn rating_count(&self) -> usize {
        self.all_ratings().len()
    }

    fn stream_all(&self) -> RatingIter<'_> {
        self.all_ratings().iter()
    }

    fn stream_by_user(&self) -> GroupStream<'_>
    where
        Self: Sized,
    {
        GroupStream::new(self, self.user_ids(), self.user_groups())
    }

    fn stream_by_item(&self) -> GroupStream<'_>
    where
        Self: Sized,
    {
        GroupStream::new(self, self.item_ids(), self.item_groups())
    }

    /// Ratings by `user` in storage order, or `None` if the user is unknown.
    fn user_ratings(&self, user: UserId) -> Option<RatingGroup<'_>>
    where
        Self: Sized,
    {
        let ord = self.user_ids().try_ordinal(user)?;
        Some(RatingGroup {
            id: user,
            ratings: RatingList::subset(self, self.user_groups().group(ord)),
        })
    }

    /// Ratings of `item` in storage order, or `None` if the item is unknown.
    fn item_ratings(&self, item: ItemId) -> Option<RatingGroup<'_>>
    where
        Self: Sized,
    {
        let ord = self.item_ids().try_ordinal(item)?;
        Some(RatingGroup {
            id: item,
            ratings: RatingList::subset(self, self.item_groups().group(ord)),
        })
    }

    /// Ratings by `user`; empty for an unknown user.
    fn ratings_for_user(&self, user: UserId) -> RatingList<'_>
    where
        Self: Sized,
    {
        self.user_ratings(user)
            .map(|g| g.ratings)
            .unwrap_or_else(|| RatingList::empty(self))
    }

    /// Ratings of `item`; empty for an unknown item.
    fn ratings_for_item(&self, item: ItemId) -> RatingList<'_>
    where
        Self: Sized,
    {
        self.item_ratings(item)
            .map(|g| g.ratings)
            .unwrap_or_else(|| RatingList::empty(self))
    }

    /// Item → value for `user`. A later duplicate of the same item overwrites an earlier one.
    fn user_rating_vector(&self, user: UserId) -> BTreeMap<ItemId, Value>
    where
        Self: Sized,
    {
        self.ratings_for_user(user)
            .iter()
            .map(|r| (r.item, r.value))
            .collect()
    }

    /// User → value for `item`. A later duplicate of the same user overwrites an earlier one.
    fn item_rating_vector(&self, item: ItemId) -> BTreeMap<UserId, Value>
    where
        Self: Sized,
    {
        self.ratings_for_item(item)
            .iter()
            .map(|r| (r.user, r.value))
            .collect()
    }

    fn users_for_item(&self, item: ItemId) -> BTreeSet<UserId>
    where
        Self: Sized,
    {
        self.ratings_for_item(item).iter().map(|r| r.user).collect()
    }

    fn items_for_user(&self, user: UserId) -> BTreeSet<ItemId>
    where
        Self: Sized,
    {
        self.ratings_for_user(user).iter().map(|r| r.item).collect()
    }

    /// Streams every rating in the requested order.
    fn stream_sorted(&self, order: SortOrder) -> Box<dyn Iterator<Item = Rating> + '_>
    where
        Self: Sized,
    {
        match order {
            SortOrder::Any => Box::new(self.stream_all()),
            SortOrder::User => Box::new(self.stream_by_user().flat_map(|g| g.ratings.iter())),
            SortOrder::Item => Box::new(self.stream_by_item().flat_map(|g| g.ratings.iter())),
            SortOrder::Timestamp => {
                let mut all: Vec<Rating> = self.stream_all().collect();
                // Stable: equal timestamps keep storage order; `None` sorts first.
                all.sort_by_key(|r| r.timestamp);
                Box::new(all.into_iter())
            }
        }
    }
}
