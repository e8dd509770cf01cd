//! Whole-store snapshots: a bincode payload inside a checksummed frame.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::PackError;
use crate::format::{crc32, read_u32, read_u64};
use crate::store::PackedRatingStore;
use crate::telemetry::{PackEvent, PackEventListener};

pub const SNAPSHOT_MAGIC: &[u8; 8] = b"LKSNAP01";
pub const SNAPSHOT_VERSION: u32 = 1;

impl PackedRatingStore {
    /// Serializes the store to `path`.
    ///
    /// The file is written next to `path` and renamed into place, so readers never see a
    /// partial snapshot.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<u64, PackError> {
        let path = path.as_ref();
        let payload = bincode::serialize(self)?;
        let crc = crc32(&payload);

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if path.file_name().is_none() {
            return Err(PackError::InvalidArgument(format!("snapshot path {:?} has no file name", path)));
        }

        // Removed on drop unless persisted.
        let tmp = tempfile::Builder::new()
            .prefix(".ratingpack-snap-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        let mut w = BufWriter::new(tmp);
        w.write_all(SNAPSHOT_MAGIC)?;
        w.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        w.write_all(&(payload.len() as u64).to_le_bytes())?;
        w.write_all(&crc.to_le_bytes())?;
        w.write_all(&payload)?;
        let tmp = w.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_data()?;

        tmp.persist(path).map_err(|e| PackError::Io(e.error))?;
        File::open(dir)?.sync_data()?;
        Ok((SNAPSHOT_MAGIC.len() + 4 + 8 + 4 + payload.len()) as u64)
    }

    /// Like [`save_snapshot`](Self::save_snapshot), reporting the write to `listener`.
    pub fn save_snapshot_with_listener<P: AsRef<Path>>(
        &self,
        path: P,
        listener: &Arc<dyn PackEventListener>,
    ) -> Result<u64, PackError> {
        let bytes = self.save_snapshot(path.as_ref())?;
        listener.on_event(PackEvent::SnapshotWritten {
            path: path.as_ref().to_path_buf(),
            bytes,
        });
        Ok(bytes)
    }

    /// Loads a store written by [`save_snapshot`](Self::save_snapshot).
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, PackError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(PackError::UnsupportedFormat(format!("bad snapshot magic in {:?}", path)));
        }
        let version = read_u32(&mut reader)?;
        if version != SNAPSHOT_VERSION {
            return Err(PackError::UnsupportedFormat(format!(
                "unsupported snapshot version {} in {:?}",
                version, path
            )));
        }
        let payload_len = read_u64(&mut reader)? as usize;
        let expected_crc = read_u32(&mut reader)?;

        let mut payload = Vec::new();
        reader.by_ref().take(payload_len as u64).read_to_end(&mut payload)?;
        if payload.len() != payload_len {
            return Err(PackError::corruption(
                format!("snapshot payload truncated: {} of {} bytes", payload.len(), payload_len),
                Some(path),
            ));
        }
        let actual_crc = crc32(&payload);
        if actual_crc != expected_crc {
            return Err(PackError::corruption("snapshot payload CRC mismatch", Some(path)));
        }

        let store: PackedRatingStore = bincode::deserialize(&payload)?;
        store
            .check_structure()
            .map_err(|details| PackError::corruption(details, Some(path)))?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::RatingDao;
    use std::fs;
    use crate::telemetry::RecordingEventListener;
    use crate::types::Rating;

    fn store() -> PackedRatingStore {
        PackedRatingStore::from_ratings((0..5000).map(|i| {
            if i % 3 == 0 {
                Rating::with_timestamp(i % 17, i % 31, i as f64 / 2.0, i)
            } else {
                Rating::new(i % 17, i % 31, i as f64 / 2.0)
            }
        }))
        .unwrap()
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("store.snap");
        let s = store();
        let rec = RecordingEventListener::new();
        let listener: Arc<dyn PackEventListener> = rec.clone();
        let bytes = s.save_snapshot_with_listener(&p, &listener).unwrap();
        assert_eq!(fs::metadata(&p).unwrap().len(), bytes);
        assert!(matches!(rec.take().as_slice(), [PackEvent::SnapshotWritten { .. }]));

        let back = PackedRatingStore::load_snapshot(&p).unwrap();
        assert_eq!(back.len(), s.len());
        assert_eq!(back.user_ids(), s.user_ids());
        for i in (0..s.len()).step_by(97) {
            assert_eq!(back.entry(i), s.entry(i));
        }
        assert_eq!(back.item_rating_vector(3), s.item_rating_vector(3));
    }

    #[test]
    fn corrupted_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("store.snap");
        store().save_snapshot(&p).unwrap();

        let mut bytes = fs::read(&p).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&p, &bytes).unwrap();
        assert!(matches!(
            PackedRatingStore::load_snapshot(&p),
            Err(PackError::Corruption { .. })
        ));

        bytes.truncate(30);
        fs::write(&p, &bytes).unwrap();
        assert!(PackedRatingStore::load_snapshot(&p).is_err());

        fs::write(&p, b"NOTASNAPSHOT-----------").unwrap();
        assert!(matches!(
            PackedRatingStore::load_snapshot(&p),
            Err(PackError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store();
        s.save_snapshot(dir.path().join("ok.snap")).unwrap();

        // A non-empty directory cannot be replaced by the rename.
        let blocked = dir.path().join("blocked.snap");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), b"x").unwrap();
        assert!(s.save_snapshot(&blocked).is_err());

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["blocked.snap".to_string(), "ok.snap".to_string()]);
    }
}
