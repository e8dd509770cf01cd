//! On-disk layout of rating pack files.
//!
//! All integers are little-endian.
//!
//! ```text
//! header (40 bytes)
//!   magic        [u8; 8]  "LKPACK01"
//!   version      u32
//!   flags        u16
//!   reserved     u16      (zero)
//!   rating_count u64
//!   user_count   u32
//!   item_count   u32
//!   body_crc32   u32      CRC32 of everything after the header
//!   header_crc32 u32      CRC32 of the preceding 36 header bytes
//! ratings        rating_count records:
//!   user i64, item i64, value f64[, timestamp i64 if TIMESTAMPS]
//! user table     user_count entries (key i64, offset u32, count u32),
//!                then rating_count positions u32
//! item table     same shape, keyed by item
//! ```
//!
//! Table keys ascend. Group `k` owns `positions[offset_k..offset_k + count_k]`, and
//! positions within a group ascend.

use std::io::Read;
use std::path::Path;

use crc32fast::Hasher as Crc32;

use crate::error::PackError;
use crate::groups::GroupIndex;
use crate::keys::SortedKeyIndex;
use crate::types::{Rating, Timestamp};

pub const PACK_MAGIC: &[u8; 8] = b"LKPACK01";
pub const PACK_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 40;

/// Timestamp stored for a rating written without one.
pub(crate) const ABSENT_TIMESTAMP: Timestamp = i64::MIN;

/// Rejects `Some(ABSENT_TIMESTAMP)`, which would read back as `None`.
pub(crate) fn check_timestamp(timestamp: Option<Timestamp>) -> Result<(), PackError> {
    if timestamp == Some(ABSENT_TIMESTAMP) {
        return Err(PackError::InvalidArgument(format!(
            "timestamp {} is reserved for ratings without a timestamp",
            ABSENT_TIMESTAMP
        )));
    }
    Ok(())
}

/// File-global pack flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackFlags(u16);

impl PackFlags {
    /// Every record carries a trailing timestamp.
    pub const TIMESTAMPS: PackFlags = PackFlags(1);

    const KNOWN: u16 = 1;

    pub const fn empty() -> Self {
        PackFlags(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Result<Self, PackError> {
        if bits & !Self::KNOWN != 0 {
            return Err(PackError::UnsupportedFormat(format!(
                "unknown pack flags 0x{:04x}",
                bits & !Self::KNOWN
            )));
        }
        Ok(PackFlags(bits))
    }

    pub const fn contains(self, other: PackFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_timestamps(self) -> bool {
        self.contains(Self::TIMESTAMPS)
    }

    /// Width in bytes of one rating record.
    pub fn record_size(self) -> usize {
        if self.has_timestamps() {
            32
        } else {
            24
        }
    }
}

impl std::ops::BitOr for PackFlags {
    type Output = PackFlags;

    fn bitor(self, rhs: PackFlags) -> PackFlags {
        PackFlags(self.0 | rhs.0)
    }
}

/// Fixed-size pack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub flags: PackFlags,
    pub rating_count: u64,
    pub user_count: u32,
    pub item_count: u32,
    pub body_crc32: u32,
}

impl PackHeader {
    pub fn new(flags: PackFlags, rating_count: u64, user_count: u32, item_count: u32) -> Self {
        PackHeader {
            version: PACK_VERSION,
            flags,
            rating_count,
            user_count,
            item_count,
            body_crc32: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(PACK_MAGIC);
        write_u32(&mut buf, self.version);
        buf.extend_from_slice(&self.flags.bits().to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        write_u64(&mut buf, self.rating_count);
        write_u32(&mut buf, self.user_count);
        write_u32(&mut buf, self.item_count);
        write_u32(&mut buf, self.body_crc32);
        let header_crc = crc32(&buf);
        write_u32(&mut buf, header_crc);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(bytes: &[u8], path: Option<&Path>) -> Result<Self, PackError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PackError::corruption(
                format!("pack truncated: {} bytes, header needs {}", bytes.len(), HEADER_SIZE),
                path,
            ));
        }
        if &bytes[..8] != PACK_MAGIC {
            return Err(PackError::UnsupportedFormat(match path {
                Some(p) => format!("bad pack magic in {:?}", p),
                None => "bad pack magic".to_string(),
            }));
        }
        let expected_crc = le_u32(&bytes[36..40]);
        let actual_crc = crc32(&bytes[..36]);
        if expected_crc != actual_crc {
            return Err(PackError::corruption(
                format!(
                    "pack header CRC mismatch (stored {:08x}, computed {:08x})",
                    expected_crc, actual_crc
                ),
                path,
            ));
        }
        let version = le_u32(&bytes[8..12]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedFormat(format!(
                "unsupported pack version {}",
                version
            )));
        }
        let flags = PackFlags::from_bits(u16::from_le_bytes([bytes[12], bytes[13]]))?;
        Ok(PackHeader {
            version,
            flags,
            rating_count: le_u64(&bytes[16..24]),
            user_count: le_u32(&bytes[24..28]),
            item_count: le_u32(&bytes[28..32]),
            body_crc32: le_u32(&bytes[32..36]),
        })
    }

    pub fn rating_data_size(&self) -> usize {
        self.rating_count as usize * self.flags.record_size()
    }

    /// Size of the user and item tables together.
    pub fn table_size(&self) -> usize {
        (self.user_count as usize + self.item_count as usize) * TABLE_ENTRY_SIZE
            + 2 * self.rating_count as usize * 4
    }

    /// Total file size implied by the header, or `None` if it does not fit in `usize`.
    pub fn file_size(&self) -> Option<usize> {
        let ratings = usize::try_from(self.rating_count).ok()?;
        let data = ratings.checked_mul(self.flags.record_size())?;
        let entries = (self.user_count as usize + self.item_count as usize).checked_mul(TABLE_ENTRY_SIZE)?;
        let positions = ratings.checked_mul(8)?;
        HEADER_SIZE.checked_add(data)?.checked_add(entries)?.checked_add(positions)
    }
}

/// Bytes per table entry: key i64, offset u32, count u32.
pub const TABLE_ENTRY_SIZE: usize = 16;

pub(crate) fn encode_rating(buf: &mut Vec<u8>, r: &Rating, flags: PackFlags) {
    write_i64(buf, r.user);
    write_i64(buf, r.item);
    write_f64(buf, r.value);
    if flags.has_timestamps() {
        write_i64(buf, r.timestamp.unwrap_or(ABSENT_TIMESTAMP));
    }
}

/// Decodes one record; `bytes` must be exactly `flags.record_size()` long.
#[inline]
pub(crate) fn decode_rating(bytes: &[u8], flags: PackFlags) -> Rating {
    let timestamp = if flags.has_timestamps() {
        Some(le_i64(&bytes[24..32])).filter(|&t| t != ABSENT_TIMESTAMP)
    } else {
        None
    };
    Rating {
        user: le_i64(&bytes[0..8]),
        item: le_i64(&bytes[8..16]),
        value: f64::from_le_bytes(arr8(&bytes[16..24])),
        timestamp,
    }
}

/// Encodes a grouped table: entries, then positions in group order.
pub(crate) fn encode_table(buf: &mut Vec<u8>, keys: &SortedKeyIndex, groups: &GroupIndex) {
    let mut offset = 0u32;
    for (ord, key) in keys.iter().enumerate() {
        let count = groups.group_len(ord) as u32;
        write_i64(buf, key);
        write_u32(buf, offset);
        write_u32(buf, count);
        offset += count;
    }
    for &p in groups.positions() {
        write_u32(buf, p);
    }
}

/// Decodes a grouped table of `entries` keys over `rating_count` positions.
///
/// Problems that would make lookups unsound (unsorted keys, ranges past the position
/// array, positions past the rating count) are reported as corruption. Counts that merely
/// disagree with the rating count are left for the validator to find.
pub(crate) fn decode_table(
    bytes: &[u8],
    entries: usize,
    rating_count: usize,
    what: &str,
    path: Option<&Path>,
) -> Result<(SortedKeyIndex, GroupIndex), PackError> {
    let positions_at = entries * TABLE_ENTRY_SIZE;
    if bytes.len() != positions_at + rating_count * 4 {
        return Err(PackError::corruption(
            format!("{} table has {} bytes, expected {}", what, bytes.len(), positions_at + rating_count * 4),
            path,
        ));
    }
    let positions: Vec<u32> = bytes[positions_at..].chunks_exact(4).map(le_u32).collect();
    if let Some(bad) = positions.iter().find(|&&p| p as usize >= rating_count) {
        return Err(PackError::corruption(
            format!("{} table position {} past rating count {}", what, bad, rating_count),
            path,
        ));
    }

    let mut keys = Vec::with_capacity(entries);
    let mut groups: Vec<&[u32]> = Vec::with_capacity(entries);
    for e in bytes[..positions_at].chunks_exact(TABLE_ENTRY_SIZE) {
        let key = le_i64(&e[0..8]);
        let offset = le_u32(&e[8..12]) as usize;
        let count = le_u32(&e[12..16]) as usize;
        if let Some(&prev) = keys.last() {
            if key <= prev {
                return Err(PackError::corruption(
                    format!("{} table keys out of order ({} after {})", what, key, prev),
                    path,
                ));
            }
        }
        if offset + count > positions.len() {
            return Err(PackError::corruption(
                format!(
                    "{} table entry for {} has range {}+{} past {} positions",
                    what,
                    key,
                    offset,
                    count,
                    positions.len()
                ),
                path,
            ));
        }
        keys.push(key);
        groups.push(&positions[offset..offset + count]);
    }

    let index = GroupIndex::from_groups(groups)?;
    Ok((SortedKeyIndex::from_sorted_unchecked(keys), index))
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, PackError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, PackError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

#[inline]
fn arr8(b: &[u8]) -> [u8; 8] {
    let mut a = [0u8; 8];
    a.copy_from_slice(b);
    a
}

#[inline]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes(arr8(b))
}

#[inline]
fn le_i64(b: &[u8]) -> i64 {
    i64::from_le_bytes(arr8(b))
}
