//! The `Store` record: the last object written by every commit

use crate::error::Result;
use crate::storage::location::ObjectLocationManager;
use crate::storage::varint::{encode_str, encode_varint, ByteReader};
use crate::store::graphs::GraphIndex;
use crate::store::prefix::PrefixManager;

/// Everything needed to reopen a store as of one commit. The location
/// manager inside resolves every object reachable from the indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub store_id: String,
    pub next_object_id: u64,
    pub resource_index_id: u64,
    pub subject_index_id: u64,
    pub object_index_id: u64,
    pub predicate_index_max_keys: usize,
    pub related_list_max_keys: usize,
    pub graphs: GraphIndex,
    pub prefixes: PrefixManager,
    pub locations: ObjectLocationManager,
}

impl StoreSnapshot {
    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_str(&self.store_id, buf);
        encode_varint(self.next_object_id, buf);
        encode_varint(self.resource_index_id, buf);
        encode_varint(self.subject_index_id, buf);
        encode_varint(self.object_index_id, buf);
        encode_varint(self.predicate_index_max_keys as u64, buf);
        encode_varint(self.related_list_max_keys as u64, buf);
        self.graphs.save(buf);
        self.prefixes.save(buf);
        self.locations.save(buf);
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            store_id: reader.string()?,
            next_object_id: reader.varint()?,
            resource_index_id: reader.varint()?,
            subject_index_id: reader.varint()?,
            object_index_id: reader.varint()?,
            predicate_index_max_keys: reader.varint()? as usize,
            related_list_max_keys: reader.varint()? as usize,
            graphs: GraphIndex::load(reader)?,
            prefixes: PrefixManager::load(reader)?,
            locations: ObjectLocationManager::load(reader)?,
        })
    }
}
