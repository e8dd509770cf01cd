//! Chunked column storage for rating rows.
//!
//! Rows live in fixed-capacity chunks of [`CHUNK_SIZE`] parallel slots (user ordinal,
//! item ordinal, value, optional timestamp). Growth appends a whole chunk; chunks that
//! already exist are never moved or reallocated, so a record index decomposes into
//! `(index >> CHUNK_SHIFT, index & CHUNK_MASK)` for the lifetime of the store.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{Timestamp, Value};

/// log2 of the chunk capacity.
pub const CHUNK_SHIFT: u32 = 12;
/// Slots per chunk.
pub const CHUNK_SIZE: usize = 1 << CHUNK_SHIFT;
/// Mask extracting the in-chunk offset from a record index.
pub const CHUNK_MASK: usize = CHUNK_SIZE - 1;

/// Largest number of rows a column store can address (positions are stored as `u32`).
pub const MAX_ROWS: usize = u32::MAX as usize;

// Timestamp slot value meaning "no timestamp".
const NO_TIMESTAMP: Timestamp = i64::MIN;

/// Chunk holding record `index`.
#[inline]
pub fn chunk_of(index: usize) -> usize {
    index >> CHUNK_SHIFT
}

/// Offset of record `index` within its chunk.
#[inline]
pub fn element_of(index: usize) -> usize {
    index & CHUNK_MASK
}

/// One decoded row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row {
    pub user: u32,
    pub item: u32,
    pub value: Value,
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chunk {
    users: Box<[u32]>,
    items: Box<[u32]>,
    values: Box<[Value]>,
    // Allocated on the first timestamped write into this chunk.
    timestamps: Option<Box<[Timestamp]>>,
}

impl Chunk {
    fn new() -> Self {
        Chunk {
            users: vec![0; CHUNK_SIZE].into_boxed_slice(),
            items: vec![0; CHUNK_SIZE].into_boxed_slice(),
            values: vec![0.0; CHUNK_SIZE].into_boxed_slice(),
            timestamps: None,
        }
    }

    #[inline]
    fn write(&mut self, e: usize, user: u32, item: u32, value: Value, ts: Option<Timestamp>) {
        self.users[e] = user;
        self.items[e] = item;
        self.values[e] = value;
        match (ts, &mut self.timestamps) {
            (Some(t), Some(col)) => col[e] = t,
            (Some(t), None) => {
                let mut col = vec![NO_TIMESTAMP; CHUNK_SIZE].into_boxed_slice();
                col[e] = t;
                self.timestamps = Some(col);
            }
            (None, Some(col)) => col[e] = NO_TIMESTAMP,
            (None, None) => {}
        }
    }

    #[inline]
    fn timestamp(&self, e: usize) -> Option<Timestamp> {
        match &self.timestamps {
            Some(col) if col[e] != NO_TIMESTAMP => Some(col[e]),
            _ => None,
        }
    }
}

/// Arena of fixed-capacity column chunks.
///
/// Bounds are checked by `assert!` on every accessor; callers (the builder and the
/// record cursor) are expected to have validated the index already.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStore {
    chunks: Vec<Chunk>,
    len: usize,
    has_timestamps: bool,
}

impl ColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of allocated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// True once any row has been written with a timestamp.
    pub fn has_timestamps(&self) -> bool {
        self.has_timestamps
    }

    /// Appends a row and returns its index.
    pub fn push(&mut self, user: u32, item: u32, value: Value, ts: Option<Timestamp>) -> usize {
        let index = self.len;
        debug_assert!(index < MAX_ROWS, "column store full");
        let ci = chunk_of(index);
        if ci == self.chunks.len() {
            self.chunks.push(Chunk::new());
        }
        self.chunks[ci].write(element_of(index), user, item, value, ts);
        self.has_timestamps |= ts.is_some();
        self.len += 1;
        index
    }

    /// Overwrites the row at `index`.
    pub fn set(&mut self, index: usize, user: u32, item: u32, value: Value, ts: Option<Timestamp>) {
        self.check(index);
        self.chunks[chunk_of(index)].write(element_of(index), user, item, value, ts);
        self.has_timestamps |= ts.is_some();
    }

    #[inline]
    pub fn get(&self, index: usize) -> Row {
        self.check(index);
        let chunk = &self.chunks[chunk_of(index)];
        let e = element_of(index);
        Row {
            user: chunk.users[e],
            item: chunk.items[e],
            value: chunk.values[e],
            timestamp: chunk.timestamp(e),
        }
    }

    #[inline]
    pub fn user(&self, index: usize) -> u32 {
        self.check(index);
        self.chunks[chunk_of(index)].users[element_of(index)]
    }

    #[inline]
    pub fn item(&self, index: usize) -> u32 {
        self.check(index);
        self.chunks[chunk_of(index)].items[element_of(index)]
    }

    #[inline]
    pub fn value(&self, index: usize) -> Value {
        self.check(index);
        self.chunks[chunk_of(index)].values[element_of(index)]
    }

    #[inline]
    pub fn timestamp(&self, index: usize) -> Option<Timestamp> {
        self.check(index);
        self.chunks[chunk_of(index)].timestamp(element_of(index))
    }

    /// Copies row `from` over row `to`.
    pub fn copy_row(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let row = self.get(from);
        self.set(to, row.user, row.item, row.value, row.timestamp);
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        let a = self.get(i);
        let b = self.get(j);
        self.set(i, b.user, b.item, b.value, b.timestamp);
        self.set(j, a.user, a.item, a.value, a.timestamp);
    }

    /// Drops rows past `len`, releasing chunks that become entirely unused.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        self.len = len;
        let needed = if len == 0 { 0 } else { chunk_of(len - 1) + 1 };
        self.chunks.truncate(needed);
    }

    /// Rewrites every live user and item ordinal through the given tables.
    pub fn remap_ordinals(&mut self, user_map: &[u32], item_map: &[u32]) {
        let len = self.len;
        self.chunks
            .par_iter_mut()
            .enumerate()
            .for_each(|(ci, chunk)| {
                let live = (len - ci * CHUNK_SIZE).min(CHUNK_SIZE);
                for u in &mut chunk.users[..live] {
                    *u = user_map[*u as usize];
                }
                for i in &mut chunk.items[..live] {
                    *i = item_map[*i as usize];
                }
            });
    }

    /// True if every chunk has full-width columns and the chunk count matches `len`.
    ///
    /// Only deserialized stores can violate this.
    pub fn is_well_formed(&self) -> bool {
        let needed = if self.len == 0 { 0 } else { chunk_of(self.len - 1) + 1 };
        self.chunks.len() == needed
            && self.chunks.iter().all(|c| {
                c.users.len() == CHUNK_SIZE
                    && c.items.len() == CHUNK_SIZE
                    && c.values.len() == CHUNK_SIZE
                    && c.timestamps.as_ref().map_or(true, |t| t.len() == CHUNK_SIZE)
            })
    }

    /// Approximate heap footprint in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| {
                let base = CHUNK_SIZE * (4 + 4 + 8);
                base + c.timestamps.as_ref().map_or(0, |_| CHUNK_SIZE * 8)
            })
            .sum()
    }

    #[inline]
    fn check(&self, index: usize) {
        assert!(
            index < self.len,
            "row index {} out of range for column store of size {}",
            index,
            self.len
        );
    }
}
