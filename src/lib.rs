#![doc = include_str!("../README.md")]
// Declare modules
pub mod chunks;
pub mod compression;
pub mod config;
pub mod dao;
pub mod error;
pub mod format;
pub mod groups;
pub mod ingest;
pub mod keys;
pub mod pack;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod validate;

/// Whole-file compression modes (gzip, zstd) with magic-byte detection.
pub use crate::compression::CompressionMode;
/// Writer defaults for packing delimited text.
pub use crate::config::PackConfig;
/// Query interface shared by stores, pack readers and windowed views.
pub use crate::dao::{RatingDao, RecordSource};
/// Error type for store and pack-file operations.
pub use crate::error::PackError;
/// Pack file flags and header.
pub use crate::format::{PackFlags, PackHeader};
/// Grouped rating views.
pub use crate::groups::{GroupIndex, RatingGroup, RatingList};
/// Sorted, dense key index.
pub use crate::keys::SortedKeyIndex;
/// Pack file writer, reader, and time-windowed view.
pub use crate::pack::{PackReader, PackSummary, PackWriter, WindowedView};
/// In-memory packed store, its builder, and the record cursor.
pub use crate::store::{IndexedRating, PackedRatingBuilder, PackedRatingStore, RatingCursor};
/// Structured event hook for observability.
pub use crate::telemetry::{PackEvent, PackEventListener};
/// A single rating and the scalar aliases it is made of.
pub use crate::types::{ItemId, Rating, SortOrder, Timestamp, UserId, Value};
/// Pack validation entry points.
pub use crate::validate::{validate_pack, ValidationReport, Violation};
