//! Writing and reading rating pack files.
//!
//! See [`crate::format`] for the byte layout. A [`PackWriter`] streams records into a
//! temporary file next to the destination and installs it on [`PackWriter::finish`];
//! a [`PackReader`] maps (or decompresses) the file and serves the [`RatingDao`] queries
//! directly from the encoded bytes.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use tempfile::NamedTempFile;

use crate::chunks::ColumnStore;
use crate::compression::{self, CompressionMode};
use crate::dao::{RatingDao, RecordSource};
use crate::error::PackError;
use crate::format::{
    check_timestamp, crc32, decode_rating, decode_table, encode_rating, encode_table, PackFlags, PackHeader,
    HEADER_SIZE, TABLE_ENTRY_SIZE,
};
use crate::groups::{GroupIndex, RatingList};
use crate::keys::{KeyInterner, SortedKeyIndex};
use crate::store::PackedRatingStore;
use crate::telemetry::{noop_event_listener, PackEvent, PackEventListener};
use crate::types::{Rating, Timestamp};

/// Largest number of ratings a pack can hold (positions are `u32`).
pub const MAX_PACK_RATINGS: u64 = u32::MAX as u64;

/// Outcome of a successful [`PackWriter::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub path: PathBuf,
    pub rating_count: u64,
    pub user_count: usize,
    pub item_count: usize,
    pub flags: PackFlags,
    pub compression: CompressionMode,
    /// True if the ratings were re-sorted by timestamp before writing.
    pub resorted: bool,
    /// Size of the installed file in bytes.
    pub file_bytes: u64,
}

/// Streaming pack writer.
///
/// Nothing appears at the destination path until [`finish`](Self::finish) succeeds;
/// dropping an unfinished writer discards everything written so far.
pub struct PackWriter {
    path: PathBuf,
    out: Option<BufWriter<NamedTempFile>>,
    flags: PackFlags,
    compression: CompressionMode,
    users: KeyInterner,
    items: KeyInterner,
    user_ords: Vec<u32>,
    item_ords: Vec<u32>,
    last_timestamp: Option<Timestamp>,
    out_of_order: bool,
    body_crc: Crc32,
    scratch: Vec<u8>,
    event_listener: Arc<dyn PackEventListener>,
}

impl std::fmt::Debug for PackWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackWriter")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("compression", &self.compression)
            .field("rating_count", &self.rating_count())
            .field("finished", &self.out.is_none())
            .finish()
    }
}

impl PackWriter {
    /// Creates an uncompressed pack writer for `path`.
    pub fn create<P: AsRef<Path>>(path: P, flags: PackFlags) -> Result<Self, PackError> {
        Self::create_with(path, flags, CompressionMode::None)
    }

    /// Creates a pack writer whose finished file is compressed with `compression`.
    pub fn create_with<P: AsRef<Path>>(
        path: P,
        flags: PackFlags,
        compression: CompressionMode,
    ) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let tmp = tempfile::Builder::new()
            .prefix(".ratingpack-")
            .suffix(".tmp")
            .tempfile_in(parent_dir(&path))?;
        let mut out = BufWriter::new(tmp);
        // Header is rewritten once counts and checksums are known.
        out.write_all(&[0u8; HEADER_SIZE])?;
        Ok(PackWriter {
            path,
            out: Some(out),
            flags,
            compression,
            users: KeyInterner::new(),
            items: KeyInterner::new(),
            user_ords: Vec::new(),
            item_ords: Vec::new(),
            last_timestamp: None,
            out_of_order: false,
            body_crc: Crc32::new(),
            scratch: Vec::with_capacity(32),
            event_listener: noop_event_listener(),
        })
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn PackEventListener>) -> Self {
        self.event_listener = listener;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flags(&self) -> PackFlags {
        self.flags
    }

    pub fn rating_count(&self) -> u64 {
        self.user_ords.len() as u64
    }

    /// Appends one rating. Its timestamp is dropped unless the pack has
    /// [`PackFlags::TIMESTAMPS`].
    pub fn write_rating(&mut self, rating: &Rating) -> Result<(), PackError> {
        if self.rating_count() >= MAX_PACK_RATINGS {
            return Err(PackError::CapacityExceeded(self.user_ords.len()));
        }
        let Some(out) = self.out.as_mut() else {
            return Err(PackError::InvalidArgument("pack writer already finished".to_string()));
        };
        if self.flags.has_timestamps() {
            check_timestamp(rating.timestamp)?;
        }

        self.scratch.clear();
        encode_rating(&mut self.scratch, rating, self.flags);
        out.write_all(&self.scratch)?;
        self.body_crc.update(&self.scratch);

        self.user_ords.push(self.users.intern(rating.user));
        self.item_ords.push(self.items.intern(rating.item));
        if self.flags.has_timestamps() {
            let ts = rating.timestamp;
            if self.rating_count() > 1 && ts < self.last_timestamp {
                self.out_of_order = true;
            }
            self.last_timestamp = ts;
        }
        Ok(())
    }

    pub fn write_ratings<'a, I>(&mut self, ratings: I) -> Result<(), PackError>
    where
        I: IntoIterator<Item = &'a Rating>,
    {
        for r in ratings {
            self.write_rating(r)?;
        }
        Ok(())
    }

    /// Completes the pack: re-sorts by timestamp if needed, appends the user and item
    /// tables, writes the header, and atomically installs the file at its path.
    pub fn finish(mut self) -> Result<PackSummary, PackError> {
        let Some(out) = self.out.take() else {
            return Err(PackError::InvalidArgument("pack writer already finished".to_string()));
        };
        let mut tmp = out.into_inner().map_err(|e| e.into_error())?;
        let count = self.user_ords.len();
        let record_size = self.flags.record_size();

        let resorted = self.out_of_order;
        if resorted {
            self.resort(tmp.as_file_mut(), count, record_size)?;
            self.event_listener.on_event(PackEvent::RatingsResorted {
                path: self.path.clone(),
                ratings: count as u64,
            });
        }

        let users = std::mem::take(&mut self.users);
        let items = std::mem::take(&mut self.items);
        let (user_ids, user_map) = users.freeze();
        let (item_ids, item_map) = items.freeze();
        let user_ords = &self.user_ords;
        let item_ords = &self.item_ords;
        let (user_groups, item_groups) = rayon::join(
            || GroupIndex::build(user_ids.len(), count, |i| user_map[user_ords[i] as usize]),
            || GroupIndex::build(item_ids.len(), count, |i| item_map[item_ords[i] as usize]),
        );

        let mut tables = Vec::with_capacity(
            (user_ids.len() + item_ids.len()) * TABLE_ENTRY_SIZE + 2 * count * 4,
        );
        encode_table(&mut tables, &user_ids, &user_groups);
        encode_table(&mut tables, &item_ids, &item_groups);
        self.body_crc.update(&tables);

        let mut header = PackHeader::new(
            self.flags,
            count as u64,
            u32::try_from(user_ids.len()).map_err(|_| PackError::CapacityExceeded(user_ids.len()))?,
            u32::try_from(item_ids.len()).map_err(|_| PackError::CapacityExceeded(item_ids.len()))?,
        );
        header.body_crc32 = std::mem::replace(&mut self.body_crc, Crc32::new()).finalize();

        let file = tmp.as_file_mut();
        file.seek(SeekFrom::Start((HEADER_SIZE + count * record_size) as u64))?;
        file.write_all(&tables)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.encode())?;
        file.flush()?;
        file.sync_data()?;

        let file_bytes = install(tmp, &self.path, self.compression)?;

        let summary = PackSummary {
            path: self.path.clone(),
            rating_count: count as u64,
            user_count: user_ids.len(),
            item_count: item_ids.len(),
            flags: self.flags,
            compression: self.compression,
            resorted,
            file_bytes,
        };
        self.event_listener.on_event(PackEvent::PackCreated {
            path: summary.path.clone(),
            ratings: summary.rating_count,
            users: summary.user_count,
            items: summary.item_count,
            compression: summary.compression.to_string(),
        });
        Ok(summary)
    }

    // Reads the records back, stable-sorts them by timestamp, and rewrites them in place.
    fn resort(&mut self, file: &mut File, count: usize, record_size: usize) -> Result<(), PackError> {
        let mut data = vec![0u8; count * record_size];
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        file.read_exact(&mut data)?;

        let timestamps: Vec<Option<Timestamp>> = data
            .chunks_exact(record_size)
            .map(|rec| decode_rating(rec, self.flags).timestamp)
            .collect();
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by_key(|&i| timestamps[i]);

        let mut sorted = Vec::with_capacity(data.len());
        for &i in &order {
            sorted.extend_from_slice(&data[i * record_size..(i + 1) * record_size]);
        }
        self.user_ords = order.iter().map(|&i| self.user_ords[i]).collect();
        self.item_ords = order.iter().map(|&i| self.item_ords[i]).collect();

        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        file.write_all(&sorted)?;
        self.body_crc = Crc32::new();
        self.body_crc.update(&sorted);
        Ok(())
    }
}

impl Drop for PackWriter {
    fn drop(&mut self) {
        // The temp file removes itself; only the event is left to emit.
        if self.out.take().is_some() {
            self.event_listener.on_event(PackEvent::WriterAbandoned {
                path: self.path.clone(),
                ratings: self.user_ords.len() as u64,
            });
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn sync_dir(dir: &Path) -> Result<(), PackError> {
    let d = File::open(dir)?;
    d.sync_data()?;
    Ok(())
}

// Moves the finished temp file into place, compressing it on the way if requested.
fn install(mut tmp: NamedTempFile, path: &Path, compression: CompressionMode) -> Result<u64, PackError> {
    let dir = parent_dir(path);
    let installed = if compression.is_compressed() {
        let dst = tempfile::Builder::new()
            .prefix(".ratingpack-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.as_file_mut().seek(SeekFrom::Start(0))?;
        let mut enc = compression.encoder(BufWriter::new(dst))?;
        std::io::copy(tmp.as_file_mut(), &mut enc)?;
        let dst = enc.finish()?.into_inner().map_err(|e| e.into_error())?;
        dst.as_file().sync_data()?;
        dst.persist(path).map_err(|e| PackError::Io(e.error))?
    } else {
        tmp.persist(path).map_err(|e| PackError::Io(e.error))?
    };
    let bytes = installed.metadata()?.len();
    sync_dir(dir)?;
    Ok(bytes)
}

enum PackBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for PackBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            PackBytes::Mapped(m) => m,
            PackBytes::Owned(v) => v,
        }
    }
}

/// Read-only view of a pack file.
///
/// The header and both tables are validated on open; rating records are decoded on
/// access. Uncompressed files are memory-mapped, compressed ones are inflated into memory.
pub struct PackReader {
    path: PathBuf,
    bytes: PackBytes,
    header: PackHeader,
    compression: CompressionMode,
    user_ids: SortedKeyIndex,
    item_ids: SortedKeyIndex,
    user_groups: GroupIndex,
    item_groups: GroupIndex,
}

impl std::fmt::Debug for PackReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("compression", &self.compression)
            .finish()
    }
}

impl PackReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        Self::open_with_listener(path, noop_event_listener())
    }

    pub fn open_with_listener<P: AsRef<Path>>(
        path: P,
        listener: Arc<dyn PackEventListener>,
    ) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let compression = compression::detect_file(&path)?;
        let bytes = if compression.is_compressed() {
            PackBytes::Owned(compression::read_decompressed(&path)?.0)
        } else {
            let file = File::open(&path)?;
            let len = file.metadata()?.len();
            if len < HEADER_SIZE as u64 {
                return Err(PackError::corruption(
                    format!("pack truncated: {} bytes, header needs {}", len, HEADER_SIZE),
                    Some(&path),
                ));
            }
            // SAFETY: the map is read-only and pack files are never modified in place;
            // writers install new files by rename.
            PackBytes::Mapped(unsafe { Mmap::map(&file)? })
        };

        let reader = Self::from_bytes(path, bytes, compression)?;
        listener.on_event(PackEvent::PackOpened {
            path: reader.path.clone(),
            ratings: reader.header.rating_count,
            compressed: compression.is_compressed(),
        });
        Ok(reader)
    }

    fn from_bytes(path: PathBuf, bytes: PackBytes, compression: CompressionMode) -> Result<Self, PackError> {
        let header = PackHeader::decode(&bytes, Some(&path))?;
        let expected = header.file_size().ok_or_else(|| {
            PackError::corruption("pack header counts overflow the address space", Some(&path))
        })?;
        if bytes.len() != expected {
            return Err(PackError::corruption(
                format!("pack is {} bytes, header implies {}", bytes.len(), expected),
                Some(&path),
            ));
        }

        let count = header.rating_count as usize;
        let tables_at = HEADER_SIZE + header.rating_data_size();
        let user_table_len = header.user_count as usize * TABLE_ENTRY_SIZE + count * 4;
        let user_bytes = &bytes[tables_at..tables_at + user_table_len];
        let item_bytes = &bytes[tables_at + user_table_len..];
        let (user_ids, user_groups) =
            decode_table(user_bytes, header.user_count as usize, count, "user", Some(&path))?;
        let (item_ids, item_groups) =
            decode_table(item_bytes, header.item_count as usize, count, "item", Some(&path))?;

        Ok(PackReader {
            path,
            bytes,
            header,
            compression,
            user_ids,
            item_ids,
            user_groups,
            item_groups,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &PackHeader {
        &self.header
    }

    pub fn flags(&self) -> PackFlags {
        self.header.flags
    }

    pub fn has_timestamps(&self) -> bool {
        self.header.flags.has_timestamps()
    }

    /// Compression the file was stored with.
    pub fn compression(&self) -> CompressionMode {
        self.compression
    }

    /// Recomputes the body CRC32 and compares it with the header.
    pub fn verify_checksum(&self) -> Result<(), PackError> {
        let actual = crc32(&self.bytes[HEADER_SIZE..]);
        if actual != self.header.body_crc32 {
            return Err(PackError::corruption(
                format!(
                    "pack body CRC mismatch (stored {:08x}, computed {:08x})",
                    self.header.body_crc32, actual
                ),
                Some(&self.path),
            ));
        }
        Ok(())
    }

    /// A view of the ratings with `timestamp < limit`.
    ///
    /// Ratings without a timestamp are excluded. Fails on packs without timestamps.
    pub fn windowed(&self, limit: Timestamp) -> Result<WindowedView<'_>, PackError> {
        if !self.has_timestamps() {
            return Err(PackError::InvalidArgument(format!(
                "pack {:?} has no timestamps; cannot window it",
                self.path
            )));
        }
        Ok(WindowedView::new(self, limit))
    }

    /// Loads every rating into an in-memory store, preserving record order.
    pub fn to_store(&self) -> Result<PackedRatingStore, PackError> {
        let mut columns = ColumnStore::new();
        for r in self.stream_all() {
            let u = self.user_ids.ordinal_of(r.user)?;
            let i = self.item_ids.ordinal_of(r.item)?;
            columns.push(u as u32, i as u32, r.value, r.timestamp);
        }
        Ok(PackedRatingStore::from_parts(
            columns,
            self.user_ids.clone(),
            self.item_ids.clone(),
        ))
    }
}

impl RecordSource for PackReader {
    fn record_count(&self) -> usize {
        self.header.rating_count as usize
    }

    #[inline]
    fn rating_at(&self, index: usize) -> Rating {
        let size = self.header.flags.record_size();
        let start = HEADER_SIZE + index * size;
        assert!(
            index < self.record_count(),
            "record {} out of range for pack of {} ratings",
            index,
            self.record_count()
        );
        decode_rating(&self.bytes[start..start + size], self.header.flags)
    }
}

impl RatingDao for PackReader {
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
        RatingList::all(self, self.record_count())
    }
}

/// Ratings of a pack restricted to `timestamp < limit`.
///
/// Only ids with at least one rating inside the window are present.
pub struct WindowedView<'a> {
    reader: &'a PackReader,
    limit: Timestamp,
    positions: Vec<u32>,
    user_ids: SortedKeyIndex,
    item_ids: SortedKeyIndex,
    user_groups: GroupIndex,
    item_groups: GroupIndex,
}

impl<'a> WindowedView<'a> {
    fn new(reader: &'a PackReader, limit: Timestamp) -> Self {
        let inside = |p: u32| {
            reader
                .rating_at(p as usize)
                .timestamp
                .is_some_and(|t| t < limit)
        };
        let positions: Vec<u32> = (0..reader.record_count() as u32).filter(|&p| inside(p)).collect();

        let restrict = |keys: &SortedKeyIndex, groups: &GroupIndex| {
            let (kept, groups) = groups.filter(&inside);
            let keys = kept.into_iter().map(|ord| keys.id_of(ord)).collect();
            (SortedKeyIndex::from_sorted_unchecked(keys), groups)
        };
        let ((user_ids, user_groups), (item_ids, item_groups)) = rayon::join(
            || restrict(&reader.user_ids, &reader.user_groups),
            || restrict(&reader.item_ids, &reader.item_groups),
        );

        WindowedView {
            reader,
            limit,
            positions,
            user_ids,
            item_ids,
            user_groups,
            item_groups,
        }
    }

    pub fn limit(&self) -> Timestamp {
        self.limit
    }

    /// Narrows the window further; a limit past the current one is clamped to it.
    pub fn windowed(&self, limit: Timestamp) -> WindowedView<'a> {
        WindowedView::new(self.reader, limit.min(self.limit))
    }

    pub fn reader(&self) -> &'a PackReader {
        self.reader
    }
}

impl RecordSource for WindowedView<'_> {
    fn record_count(&self) -> usize {
        self.reader.record_count()
    }

    fn rating_at(&self, index: usize) -> Rating {
        self.reader.rating_at(index)
    }
}

impl RatingDao for WindowedView<'_> {
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
        RatingList::subset(self, &self.positions)
    }
}

impl PackedRatingStore {
    /// Writes this store as an uncompressed pack at `path`, in record order.
    pub fn write_pack<P: AsRef<Path>>(&self, path: P, flags: PackFlags) -> Result<PackSummary, PackError> {
        self.write_pack_with(path, flags, CompressionMode::None)
    }

    pub fn write_pack_with<P: AsRef<Path>>(
        &self,
        path: P,
        flags: PackFlags,
        compression: CompressionMode,
    ) -> Result<PackSummary, PackError> {
        let mut writer = PackWriter::create_with(path, flags, compression)?;
        for r in self.stream_all() {
            writer.write_rating(&r)?;
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingEventListener;

    fn sample() -> Vec<Rating> {
        vec![
            Rating::with_timestamp(42, 7, 4.0, 100),
            Rating::with_timestamp(39, 7, 3.5, 101),
            Rating::with_timestamp(42, 3, 2.0, 102),
        ]
    }

    fn write(path: &Path, flags: PackFlags, ratings: &[Rating]) -> PackSummary {
        let mut w = PackWriter::create(path, flags).unwrap();
        w.write_ratings(ratings).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn roundtrip_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        let summary = write(&p, PackFlags::TIMESTAMPS, &sample());
        assert_eq!(summary.rating_count, 3);
        assert_eq!(summary.user_count, 2);
        assert!(!summary.resorted);

        let r = PackReader::open(&p).unwrap();
        assert_eq!(r.stream_all().collect::<Vec<_>>(), sample());
        assert_eq!(r.user_ids().keys(), &[39, 42]);
        r.verify_checksum().unwrap();
        assert_eq!(std::fs::metadata(&p).unwrap().len(), summary.file_bytes);
    }

    #[test]
    fn roundtrip_without_timestamps_drops_them() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        write(&p, PackFlags::empty(), &sample());
        let r = PackReader::open(&p).unwrap();
        assert!(r.stream_all().all(|x| x.timestamp.is_none()));
        assert!(r.windowed(1000).is_err());
    }

    #[test]
    fn out_of_order_timestamps_are_resorted() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        let mut ratings = sample();
        ratings.reverse();
        let rec = RecordingEventListener::new();
        let mut w = PackWriter::create(&p, PackFlags::TIMESTAMPS)
            .unwrap()
            .with_event_listener(rec.clone());
        w.write_ratings(&ratings).unwrap();
        let summary = w.finish().unwrap();
        assert!(summary.resorted);

        let r = PackReader::open(&p).unwrap();
        assert_eq!(r.stream_all().collect::<Vec<_>>(), sample());
        let g: Vec<f64> = r.user_ratings(42).unwrap().ratings.iter().map(|x| x.value).collect();
        assert_eq!(g, vec![4.0, 2.0]);
        r.verify_checksum().unwrap();
        assert!(rec
            .take()
            .iter()
            .any(|e| matches!(e, PackEvent::RatingsResorted { ratings: 3, .. })));
    }

    #[test]
    fn dropped_writer_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        let rec = RecordingEventListener::new();
        {
            let mut w = PackWriter::create(&p, PackFlags::empty())
                .unwrap()
                .with_event_listener(rec.clone());
            w.write_rating(&Rating::new(1, 1, 1.0)).unwrap();
        }
        assert!(!p.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(
            rec.take().as_slice(),
            [PackEvent::WriterAbandoned { ratings: 1, .. }]
        ));
    }

    #[test]
    fn empty_pack_opens() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("empty.pack");
        write(&p, PackFlags::empty(), &[]);
        let r = PackReader::open(&p).unwrap();
        assert_eq!(r.stream_all().count(), 0);
        assert_eq!(r.stream_by_user().count(), 0);
        assert!(r.user_ids().is_empty());
    }

    #[test]
    fn truncated_pack_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        write(&p, PackFlags::empty(), &sample());
        let bytes = std::fs::read(&p).unwrap();
        std::fs::write(&p, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(PackReader::open(&p), Err(PackError::Corruption { .. })));
        std::fs::write(&p, &bytes[..10]).unwrap();
        assert!(matches!(PackReader::open(&p), Err(PackError::Corruption { .. })));
    }

    #[test]
    fn flipped_record_byte_fails_checksum_only() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        write(&p, PackFlags::empty(), &sample());
        let mut bytes = std::fs::read(&p).unwrap();
        bytes[HEADER_SIZE + 16] ^= 0x01;
        std::fs::write(&p, &bytes).unwrap();
        let r = PackReader::open(&p).unwrap();
        assert!(matches!(r.verify_checksum(), Err(PackError::Corruption { .. })));
    }

    #[test]
    fn windowed_view_keeps_strictly_earlier_ratings() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        write(&p, PackFlags::TIMESTAMPS, &sample());
        let r = PackReader::open(&p).unwrap();

        let w = r.windowed(102).unwrap();
        assert_eq!(w.stream_all().count(), 2);
        assert_eq!(w.user_ids().keys(), &[39, 42]);
        assert_eq!(w.item_ids().keys(), &[7]);
        assert!(w.item_ratings(3).is_none());
        assert_eq!(w.user_rating_vector(42).len(), 1);

        let narrower = w.windowed(101);
        assert_eq!(narrower.user_ids().keys(), &[42]);
        let wider = narrower.windowed(10_000);
        assert_eq!(wider.limit(), 101);
        assert_eq!(wider.stream_all().count(), 1);

        assert_eq!(r.windowed(100).unwrap().stream_all().count(), 0);
    }

    #[test]
    fn store_and_reader_agree() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("r.pack");
        let store = PackedRatingStore::from_ratings(sample()).unwrap();
        store.write_pack(&p, PackFlags::TIMESTAMPS).unwrap();
        let reader = PackReader::open(&p).unwrap();
        let back = reader.to_store().unwrap();
        assert_eq!(back.len(), store.len());
        for i in 0..store.len() {
            assert_eq!(back.entry(i), store.entry(i));
        }
        assert_eq!(reader.user_rating_vector(42), store.user_rating_vector(42));
    }

    #[test]
    fn compressed_packs_are_detected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        for mode in [CompressionMode::Gzip, CompressionMode::Zstd { level: 1 }] {
            let p = dir.path().join(format!("r-{}.pack", mode));
            let mut w = PackWriter::create_with(&p, PackFlags::TIMESTAMPS, mode).unwrap();
            w.write_ratings(&sample()).unwrap();
            w.finish().unwrap();

            assert!(compression::detect_file(&p).unwrap().is_compressed());
            let r = PackReader::open(&p).unwrap();
            assert!(r.compression().is_compressed());
            assert_eq!(r.stream_all().collect::<Vec<_>>(), sample());
            r.verify_checksum().unwrap();
        }
    }
}
