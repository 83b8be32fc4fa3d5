//! Master file (master.bin): the ordered log of commit points
//!
//! Layout: a 64-byte header of eight little-endian u64 slots (magic, format
//! version, creation time, the rest reserved) followed by fixed-size commit
//! points, newest last. Commit points are only ever appended; a torn or
//! corrupt tail is truncated on recovery.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::storage::data_file::DATA_HEADER_SIZE;

/// Magic number stored in the first header slot
pub const MASTER_MAGIC: [u8; 8] = *b"QSMASTER";

pub const MASTER_FORMAT_VERSION: u64 = 1;

/// Eight reserved u64 slots
pub const MASTER_HEADER_SIZE: u64 = 64;

/// Serialized size of one commit point
pub const COMMIT_POINT_SIZE: u64 = 40;

/// Bytes of a commit point covered by its checksum
const CHECKSUMMED_BYTES: usize = 32;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A durable snapshot boundary: where the `Store` record of a commit lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPoint {
    store_offset: u64,
    job_id: u128,
    timestamp_millis: i64,
    checksum: u64,
}

impl CommitPoint {
    pub fn new(store_offset: u64, job_id: u128) -> Self {
        Self::with_timestamp(store_offset, job_id, now_millis())
    }

    pub fn with_timestamp(store_offset: u64, job_id: u128, timestamp_millis: i64) -> Self {
        let mut point = Self {
            store_offset,
            job_id,
            timestamp_millis,
            checksum: 0,
        };
        point.checksum = point.compute_checksum();
        point
    }

    pub fn store_offset(&self) -> u64 {
        self.store_offset
    }

    pub fn job_id(&self) -> u128 {
        self.job_id
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    fn compute_checksum(&self) -> u64 {
        let unsigned = Self {
            checksum: 0,
            ..*self
        };
        // Serializing plain integers cannot fail
        let bytes = bincode::serialize(&unsigned).unwrap_or_default();
        let covered = &bytes[..CHECKSUMMED_BYTES.min(bytes.len())];
        let digest = blake3::hash(covered);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(checksum)
    }

    /// Check the checksum and that the offset points inside the data file
    pub fn validate(&self, data_len: u64) -> std::result::Result<(), String> {
        if self.checksum != self.compute_checksum() {
            return Err("checksum mismatch".into());
        }
        if self.store_offset < DATA_HEADER_SIZE || self.store_offset >= data_len {
            return Err(format!(
                "store offset {} outside data file of {} bytes",
                self.store_offset, data_len
            ));
        }
        Ok(())
    }

    fn to_bytes(self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self)?)
    }
}

/// Result of scanning the master file
struct Scan {
    points: Vec<CommitPoint>,
    /// Position and reason of the first unreadable record, if any
    corrupt: Option<(u64, String)>,
}

pub struct MasterFile {
    path: PathBuf,
}

impl MasterFile {
    /// Create a master file holding only the header
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        file.write_all(&Self::header())?;
        file.sync_all()?;
        tracing::debug!("Created master file {:?}", path);
        Ok(Self { path })
    }

    /// Open an existing master file and validate its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::MissingStoreFile(path));
        }
        let master = Self { path };
        master.scan(u64::MAX)?;
        Ok(master)
    }

    /// Write a fresh master file containing exactly one commit point,
    /// replacing whatever is at `path`
    pub fn rewrite<P: AsRef<Path>>(path: P, point: &CommitPoint) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tmp = path.with_extension("bin.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&Self::header())?;
            file.write_all(&point.to_bytes()?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn header() -> Vec<u8> {
        let slots = [
            u64::from_le_bytes(MASTER_MAGIC),
            MASTER_FORMAT_VERSION,
            now_millis() as u64,
        ];
        let mut header = vec![0u8; MASTER_HEADER_SIZE as usize];
        for (i, slot) in slots.iter().enumerate() {
            header[i * 8..(i + 1) * 8].copy_from_slice(&slot.to_le_bytes());
        }
        header
    }

    /// Creation time recorded in the header
    pub fn created_millis(&self) -> Result<i64> {
        let map = self.map()?;
        let mut slot = [0u8; 8];
        slot.copy_from_slice(&map[16..24]);
        Ok(u64::from_le_bytes(slot) as i64)
    }

    fn map(&self) -> Result<Mmap> {
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < MASTER_HEADER_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "master file {:?} is {} bytes, shorter than its header",
                self.path, len
            )));
        }
        // SAFETY: commit points are only appended; existing bytes are never rewritten
        Ok(unsafe { Mmap::map(&file)? })
    }

    fn scan(&self, data_len: u64) -> Result<Scan> {
        let map = self.map()?;
        if map[0..8] != MASTER_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "bad master file magic in {:?}",
                self.path
            )));
        }
        let mut version = [0u8; 8];
        version.copy_from_slice(&map[8..16]);
        let version = u64::from_le_bytes(version);
        if version != MASTER_FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported master file version: {}",
                version
            )));
        }

        let mut points = Vec::new();
        let mut position = MASTER_HEADER_SIZE;
        let len = map.len() as u64;
        while position < len {
            let end = position + COMMIT_POINT_SIZE;
            if end > len {
                return Ok(Scan {
                    points,
                    corrupt: Some((position, format!("truncated record of {} bytes", len - position))),
                });
            }
            let point: CommitPoint = match bincode::deserialize(&map[position as usize..end as usize]) {
                Ok(point) => point,
                Err(e) => {
                    return Ok(Scan {
                        points,
                        corrupt: Some((position, e.to_string())),
                    })
                }
            };
            if let Err(reason) = point.validate(data_len) {
                return Ok(Scan {
                    points,
                    corrupt: Some((position, reason)),
                });
            }
            points.push(point);
            position = end;
        }
        Ok(Scan {
            points,
            corrupt: None,
        })
    }

    /// Every commit point, oldest first. Fails on the first corrupt record.
    pub fn commit_points(&self, data_len: u64) -> Result<Vec<CommitPoint>> {
        let scan = self.scan(data_len)?;
        match scan.corrupt {
            Some((position, reason)) => Err(StoreError::InvalidCommitPoint { position, reason }),
            None => Ok(scan.points),
        }
    }

    /// Commit points before the first corrupt record, leaving the file untouched
    pub fn valid_commit_points(&self, data_len: u64) -> Result<Vec<CommitPoint>> {
        Ok(self.scan(data_len)?.points)
    }

    /// Truncate the file at the first corrupt record and return the valid prefix
    pub fn recover(&self, data_len: u64) -> Result<Vec<CommitPoint>> {
        let scan = self.scan(data_len)?;
        if let Some((position, reason)) = scan.corrupt {
            tracing::warn!(
                "Master file {:?} corrupt at {} ({}); truncating, {} commit points kept",
                self.path,
                position,
                reason,
                scan.points.len()
            );
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(position)?;
            file.sync_all()?;
        }
        Ok(scan.points)
    }

    /// Newest valid commit point, recovering the file if its tail is corrupt
    pub fn latest_commit_point(&self, data_len: u64) -> Result<Option<CommitPoint>> {
        let points = match self.commit_points(data_len) {
            Ok(points) => points,
            Err(StoreError::InvalidCommitPoint { position, reason }) => {
                tracing::warn!(
                    "Unreadable commit point at {} in {:?}: {}",
                    position,
                    self.path,
                    reason
                );
                self.recover(data_len)?
            }
            Err(e) => return Err(e),
        };
        Ok(points.last().copied())
    }

    /// Append a commit point
    pub fn append(&self, point: &CommitPoint, sync: bool) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&point.to_bytes()?)?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DATA_LEN: u64 = 10_000;

    #[test]
    fn test_commit_point_is_fixed_size() {
        let point = CommitPoint::new(DATA_HEADER_SIZE, u128::MAX);
        assert_eq!(bincode::serialized_size(&point).unwrap(), COMMIT_POINT_SIZE);
        assert!(point.validate(DATA_LEN).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_offsets_and_tampering() {
        assert!(CommitPoint::new(0, 1).validate(DATA_LEN).is_err());
        assert!(CommitPoint::new(DATA_LEN, 1).validate(DATA_LEN).is_err());

        let mut point = CommitPoint::new(100, 1);
        point.job_id = 2;
        assert!(point.validate(DATA_LEN).is_err());
    }

    #[test]
    fn test_append_and_list_oldest_first() {
        let dir = TempDir::new().unwrap();
        let master = MasterFile::create(dir.path().join("master.bin")).unwrap();
        assert!(master.commit_points(DATA_LEN).unwrap().is_empty());
        assert!(master.created_millis().unwrap() > 0);

        for (offset, job) in [(100, 1), (200, 2), (300, 3)] {
            master.append(&CommitPoint::new(offset, job), true).unwrap();
        }
        let offsets: Vec<u64> = master
            .commit_points(DATA_LEN)
            .unwrap()
            .iter()
            .map(|p| p.store_offset())
            .collect();
        assert_eq!(offsets, vec![100, 200, 300]);
    }

    #[test]
    fn test_corrupt_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.bin");
        let master = MasterFile::create(&path).unwrap();
        master.append(&CommitPoint::new(100, 1), true).unwrap();
        master.append(&CommitPoint::new(200, 2), true).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 17]).unwrap();
        drop(file);

        assert!(matches!(
            master.commit_points(DATA_LEN),
            Err(StoreError::InvalidCommitPoint { position, .. })
                if position == MASTER_HEADER_SIZE + 2 * COMMIT_POINT_SIZE
        ));

        let latest = master.latest_commit_point(DATA_LEN).unwrap().unwrap();
        assert_eq!(latest.store_offset(), 200);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            MASTER_HEADER_SIZE + 2 * COMMIT_POINT_SIZE
        );
        assert_eq!(master.commit_points(DATA_LEN).unwrap().len(), 2);
    }

    #[test]
    fn test_point_beyond_data_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let master = MasterFile::create(dir.path().join("master.bin")).unwrap();
        master.append(&CommitPoint::new(100, 1), true).unwrap();
        master.append(&CommitPoint::new(5_000, 2), true).unwrap();

        let points = master.recover(1_000).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].store_offset(), 100);
    }

    #[test]
    fn test_rewrite_keeps_single_point() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.bin");
        let master = MasterFile::create(&path).unwrap();
        for offset in [100, 200, 300] {
            master.append(&CommitPoint::new(offset, 0), false).unwrap();
        }

        let master = MasterFile::rewrite(&path, &CommitPoint::new(50, 9)).unwrap();
        let points = master.commit_points(DATA_LEN).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].job_id(), 9);
        assert!(!path.with_extension("bin.tmp").exists());
    }
}
