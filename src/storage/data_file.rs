//! Append-only data file (data.bin)
//!
//! Layout: an 8-byte header followed by framed records. Records are only
//! ever appended; readers map the file and re-map when asked for an offset
//! past the end of the current mapping.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use memmap2::Mmap;

use crate::error::{Result, StoreError};
use crate::storage::record::{Record, RecordKind};
use crate::storage::varint::decode_varint;
use crate::store::snapshot::StoreSnapshot;

/// Magic number at the start of every data file
pub const DATA_MAGIC: [u8; 4] = *b"QSDT";

/// Data file format version
pub const DATA_FORMAT_VERSION: u16 = 1;

/// Header size on disk: magic + version + 2 reserved bytes
pub const DATA_HEADER_SIZE: u64 = 8;

fn past_end(offset: u64) -> StoreError {
    StoreError::InvalidFormat(format!("record at offset {} runs past the end of the file", offset))
}

pub struct DataFile {
    path: PathBuf,
    mmap: RefCell<Option<Rc<Mmap>>>,
}

impl DataFile {
    /// Create a new data file containing only the header
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;

        let mut header = Vec::with_capacity(DATA_HEADER_SIZE as usize);
        header.extend_from_slice(&DATA_MAGIC);
        header.extend_from_slice(&DATA_FORMAT_VERSION.to_le_bytes());
        header.extend_from_slice(&[0u8; 2]);
        file.write_all(&header)?;
        file.sync_all()?;

        tracing::debug!("Created data file {:?}", path);
        Ok(Self {
            path,
            mmap: RefCell::new(None),
        })
    }

    /// Open an existing data file and validate its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::MissingStoreFile(path));
        }

        let data = Self {
            path,
            mmap: RefCell::new(None),
        };
        let map = data.mapped(DATA_HEADER_SIZE)?;
        if map[0..4] != DATA_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "bad data file magic: {:?}",
                &map[0..4]
            )));
        }
        let version = u16::from_le_bytes([map[4], map[5]]);
        if version != DATA_FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "unsupported data file version: {}",
                version
            )));
        }
        drop(map);
        Ok(data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file on disk
    pub fn len(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Mapping covering at least `required` bytes
    fn mapped(&self, required: u64) -> Result<Rc<Mmap>> {
        if let Some(map) = self.mmap.borrow().as_ref() {
            if map.len() as u64 >= required {
                return Ok(Rc::clone(map));
            }
        }

        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        if file_len < required {
            return Err(StoreError::InvalidFormat(format!(
                "{:?} is {} bytes, need {}",
                self.path, file_len, required
            )));
        }
        // SAFETY: the file is append-only; bytes below the mapped length never change
        let map = Rc::new(unsafe { Mmap::map(&file)? });
        *self.mmap.borrow_mut() = Some(Rc::clone(&map));
        Ok(map)
    }

    /// Read the record that starts at `offset`
    pub fn read_record(&self, offset: u64) -> Result<Record> {
        if offset < DATA_HEADER_SIZE {
            return Err(StoreError::InvalidFormat(format!(
                "offset {} points into the data file header",
                offset
            )));
        }

        let first = offset.checked_add(1).ok_or_else(|| past_end(offset))?;
        let map = self.mapped(first)?;
        let mut pos = offset as usize;
        let len = decode_varint(&map, &mut pos)?;
        let end = (pos as u64).checked_add(len).ok_or_else(|| past_end(offset))?;
        let map = if end > map.len() as u64 {
            self.mapped(end)?
        } else {
            map
        };
        Record::decode(&map[pos..end as usize])
    }

    /// Offset and contents of the last well-formed `Store` record.
    ///
    /// Walks the record framing from the header and stops at the first
    /// length that runs past the end of the file.
    pub fn last_store_record(&self) -> Result<Option<(u64, StoreSnapshot)>> {
        let file_len = self.len()?;
        if file_len <= DATA_HEADER_SIZE {
            return Ok(None);
        }
        let map = self.mapped(file_len)?;
        let mut candidates = Vec::new();
        let mut pos = DATA_HEADER_SIZE as usize;
        while pos < map.len() {
            let start = pos;
            let Ok(len) = decode_varint(&map, &mut pos) else {
                break;
            };
            let end = match (pos as u64).checked_add(len) {
                Some(end) if end <= map.len() as u64 => end as usize,
                _ => break,
            };
            if map.get(pos) == Some(&(RecordKind::Store as u8)) {
                candidates.push((start as u64, pos, end));
            }
            pos = end;
        }

        for (offset, body, end) in candidates.into_iter().rev() {
            match Record::decode(&map[body..end]) {
                Ok(Record::Store(snapshot)) => return Ok(Some((offset, snapshot))),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping unreadable store record at {}: {}", offset, e),
            }
        }
        Ok(None)
    }

    /// The same file under a new name, after it was renamed on disk
    pub fn relocated(self, path: PathBuf) -> Self {
        self.release_map();
        Self {
            path,
            mmap: RefCell::new(None),
        }
    }

    /// Start appending records at the current end of file
    pub fn appender(&self) -> Result<RecordAppender> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let position = file.metadata()?.len();
        Ok(RecordAppender {
            writer: BufWriter::new(file),
            position,
            scratch: Vec::new(),
        })
    }

    /// Drop the current mapping (before the file is replaced on disk)
    pub fn release_map(&self) {
        self.mmap.borrow_mut().take();
    }
}

/// Buffered writer appending framed records to a data file
pub struct RecordAppender {
    writer: BufWriter<File>,
    position: u64,
    scratch: Vec<u8>,
}

impl RecordAppender {
    /// Append a record and return the offset it was written at
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let offset = self.position;
        self.scratch.clear();
        record.encode(&mut self.scratch);
        self.writer.write_all(&self.scratch)?;
        self.position += self.scratch.len() as u64;
        Ok(offset)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Flush buffered records, optionally syncing them to disk.
    /// Returns the new end-of-file offset.
    pub fn finish(self, sync: bool) -> Result<u64> {
        let file = self.writer.into_inner().map_err(|e| e.into_error())?;
        if sync {
            file.sync_data()?;
        }
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{Entry, Node};
    use crate::store::index::ObjectRef;
    use tempfile::TempDir;

    fn ref_node(id: u64, keys: &[u64]) -> Record {
        Record::RefNode(Node {
            id,
            parent_id: None,
            keys: keys.iter().map(|&k| Entry::new(k, ObjectRef(k * 2))).collect(),
            children: Vec::new(),
        })
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let data = DataFile::create(dir.path().join("data.bin")).unwrap();

        let mut appender = data.appender().unwrap();
        assert_eq!(appender.position(), DATA_HEADER_SIZE);
        let first = appender.append(&ref_node(1, &[1, 2, 3])).unwrap();
        let second = appender.append(&ref_node(2, &[9])).unwrap();
        let end = appender.finish(true).unwrap();

        assert_eq!(first, DATA_HEADER_SIZE);
        assert!(second > first);
        assert_eq!(end, data.len().unwrap());
        assert_eq!(data.read_record(first).unwrap(), ref_node(1, &[1, 2, 3]));
        assert_eq!(data.read_record(second).unwrap(), ref_node(2, &[9]));
    }

    #[test]
    fn test_reads_records_appended_after_mapping() {
        let dir = TempDir::new().unwrap();
        let data = DataFile::create(dir.path().join("data.bin")).unwrap();

        let mut appender = data.appender().unwrap();
        let first = appender.append(&ref_node(1, &[1])).unwrap();
        appender.finish(false).unwrap();
        assert!(data.read_record(first).is_ok());

        let mut appender = data.appender().unwrap();
        let later = appender.append(&ref_node(2, &[2])).unwrap();
        appender.finish(false).unwrap();
        assert_eq!(data.read_record(later).unwrap(), ref_node(2, &[2]));
    }

    #[test]
    fn test_open_validates_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        assert!(matches!(
            DataFile::open(&path),
            Err(StoreError::MissingStoreFile(_))
        ));

        std::fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
        assert!(matches!(
            DataFile::open(&path),
            Err(StoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_read_rejects_bad_offsets() {
        let dir = TempDir::new().unwrap();
        let data = DataFile::create(dir.path().join("data.bin")).unwrap();
        assert!(data.read_record(0).is_err());
        assert!(data.read_record(1_000).is_err());
    }

    #[test]
    fn test_read_rejects_oversized_lengths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data = DataFile::create(&path).unwrap();
        let mut appender = data.appender().unwrap();
        let good = appender.append(&ref_node(1, &[1])).unwrap();
        let garbage = appender.finish(true).unwrap();

        // length varint of 2^63 - 1
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]).unwrap();
        file.write_all(&[0xFF; 9]).unwrap();
        file.write_all(&[0x01]).unwrap();
        drop(file);

        assert!(matches!(
            data.read_record(garbage),
            Err(StoreError::InvalidFormat(_))
        ));
        assert!(matches!(
            data.read_record(garbage + 10),
            Err(StoreError::InvalidFormat(_))
        ));
        assert!(data.read_record(u64::MAX).is_err());
        assert_eq!(data.read_record(good).unwrap(), ref_node(1, &[1]));
    }

    fn snapshot(next_object_id: u64) -> StoreSnapshot {
        StoreSnapshot {
            store_id: "s".into(),
            next_object_id,
            resource_index_id: 1,
            subject_index_id: 2,
            object_index_id: 3,
            predicate_index_max_keys: 7,
            related_list_max_keys: 5,
            graphs: crate::store::graphs::GraphIndex::new(),
            prefixes: crate::store::prefix::PrefixManager::new(),
            locations: crate::storage::location::ObjectLocationManager::new(),
        }
    }

    #[test]
    fn test_last_store_record_skips_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data = DataFile::create(&path).unwrap();
        assert!(data.last_store_record().unwrap().is_none());

        let mut appender = data.appender().unwrap();
        appender.append(&ref_node(1, &[1])).unwrap();
        appender.append(&Record::Store(snapshot(4))).unwrap();
        appender.append(&ref_node(4, &[2])).unwrap();
        let last = appender.append(&Record::Store(snapshot(5))).unwrap();
        appender.append(&ref_node(5, &[3])).unwrap();
        appender.finish(true).unwrap();

        // a torn record: tag byte of a store record, length past the end
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, RecordKind::Store as u8, 1, 2]).unwrap();
        drop(file);

        let (offset, found) = data.last_store_record().unwrap().unwrap();
        assert_eq!(offset, last);
        assert_eq!(found, snapshot(5));
    }

    #[test]
    fn test_relocated_reads_the_renamed_file() {
        let dir = TempDir::new().unwrap();
        let data = DataFile::create(dir.path().join("a.bin")).unwrap();
        let mut appender = data.appender().unwrap();
        let offset = appender.append(&ref_node(3, &[7])).unwrap();
        appender.finish(true).unwrap();
        assert!(data.read_record(offset).is_ok());

        std::fs::rename(dir.path().join("a.bin"), dir.path().join("b.bin")).unwrap();
        let data = data.relocated(dir.path().join("b.bin"));
        assert_eq!(data.path(), dir.path().join("b.bin"));
        assert_eq!(data.read_record(offset).unwrap(), ref_node(3, &[7]));
    }
}
