//! Object Location Manager: object id -> byte offset in the data file

use std::collections::HashMap;

use crate::error::Result;
use crate::storage::record::RecordKind;
use crate::storage::varint::{encode_varint, ByteReader, PREALLOC_LIMIT};

/// Where an object currently lives in the data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLocation {
    pub offset: u64,
    pub kind: RecordKind,
}

/// Indirection from logical object ids to their latest appended copy.
///
/// Every mutation of an object is written as a new record at the end of the
/// data file; only the entry here moves. The manager itself is serialized
/// inside each store snapshot, so an old snapshot still resolves the offsets
/// that were current when it was written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectLocationManager {
    locations: HashMap<u64, ObjectLocation>,
}

impl ObjectLocationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offset(&mut self, object_id: u64, offset: u64, kind: RecordKind) {
        self.locations.insert(object_id, ObjectLocation { offset, kind });
    }

    pub fn get_offset(&self, object_id: u64) -> Option<u64> {
        self.locations.get(&object_id).map(|loc| loc.offset)
    }

    pub fn get(&self, object_id: u64) -> Option<ObjectLocation> {
        self.locations.get(&object_id).copied()
    }

    pub fn delete_offset(&mut self, object_id: u64) -> Option<ObjectLocation> {
        self.locations.remove(&object_id)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Entries sorted by object id
    pub fn entries(&self) -> Vec<(u64, ObjectLocation)> {
        let mut entries: Vec<_> = self.locations.iter().map(|(&id, &loc)| (id, loc)).collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        let entries = self.entries();
        encode_varint(entries.len() as u64, buf);
        for (id, loc) in entries {
            encode_varint(id, buf);
            encode_varint(loc.offset, buf);
            buf.push(loc.kind as u8);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.varint()? as usize;
        let mut locations = HashMap::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            let id = reader.varint()?;
            let offset = reader.varint()?;
            let kind = RecordKind::from_tag(reader.byte()?)?;
            locations.insert(id, ObjectLocation { offset, kind });
        }
        Ok(Self { locations })
    }
}
