use serde::{Deserialize, Serialize};

/// External user identifier.
pub type UserId = i64;

/// External item identifier.
pub type ItemId = i64;

/// Timestamp type (seconds since epoch by convention; the store does not interpret it).
pub type Timestamp = i64;

/// Rating value type.
pub type Value = f64;

/// A single (user, item, value[, timestamp]) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user: UserId,
    pub item: ItemId,
    pub value: Value,
    pub timestamp: Option<Timestamp>,
}

impl Rating {
    /// Creates a rating without a timestamp.
    pub fn new(user: UserId, item: ItemId, value: Value) -> Self {
        Rating {
            user,
            item,
            value,
            timestamp: None,
        }
    }

    /// Creates a timestamped rating.
    pub fn with_timestamp(user: UserId, item: ItemId, value: Value, timestamp: Timestamp) -> Self {
        Rating {
            user,
            item,
            value,
            timestamp: Some(timestamp),
        }
    }

    /// Returns a copy of this rating with the timestamp removed.
    pub fn without_timestamp(self) -> Self {
        Rating {
            timestamp: None,
            ..self
        }
    }
}

/// Iteration orders supported by [`crate::dao::RatingDao::stream_sorted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Storage order.
    Any,
    /// Stable sort by timestamp; ratings without a timestamp come first.
    Timestamp,
    /// Grouped by ascending user id, storage order within a user.
    User,
    /// Grouped by ascending item id, storage order within an item.
    Item,
}
