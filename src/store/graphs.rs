//! Graph index: bidirectional graph URI <-> graph id

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, StoreError};
use crate::storage::varint::{encode_str, encode_varint, ByteReader};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphIndex {
    by_uri: HashMap<String, u64>,
    by_id: BTreeMap<u64, String>,
    next_id: u64,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `uri`, allocating one if the graph is new
    pub fn assert_graph(&mut self, uri: &str) -> u64 {
        if let Some(&id) = self.by_uri.get(uri) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_uri.insert(uri.to_string(), id);
        self.by_id.insert(id, uri.to_string());
        id
    }

    pub fn graph_id(&self, uri: &str) -> Option<u64> {
        self.by_uri.get(uri).copied()
    }

    pub fn graph_uri(&self, id: u64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Forget a graph. Its id is never reused.
    pub fn remove_graph(&mut self, uri: &str) -> Option<u64> {
        let id = self.by_uri.remove(uri)?;
        self.by_id.remove(&id);
        Some(id)
    }

    /// Graph URIs in id order
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.by_id.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.next_id, buf);
        encode_varint(self.by_id.len() as u64, buf);
        for (&id, uri) in &self.by_id {
            encode_varint(id, buf);
            encode_str(uri, buf);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let next_id = reader.varint()?;
        let count = reader.varint()? as usize;
        let mut index = Self {
            next_id,
            ..Self::default()
        };
        for _ in 0..count {
            let id = reader.varint()?;
            let uri = reader.string()?;
            if id >= next_id || index.by_uri.contains_key(&uri) {
                return Err(StoreError::InvalidFormat(format!(
                    "graph index entry {} -> {:?} is inconsistent",
                    id, uri
                )));
            }
            index.by_uri.insert(uri.clone(), id);
            index.by_id.insert(id, uri);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_and_remove() {
        let mut graphs = GraphIndex::new();
        let a = graphs.assert_graph("http://example.org/g1");
        let b = graphs.assert_graph("http://example.org/g2");
        assert_ne!(a, b);
        assert_eq!(graphs.assert_graph("http://example.org/g1"), a);
        assert_eq!(graphs.graph_uri(b), Some("http://example.org/g2"));

        assert_eq!(graphs.remove_graph("http://example.org/g1"), Some(a));
        assert_eq!(graphs.graph_id("http://example.org/g1"), None);
        let c = graphs.assert_graph("http://example.org/g1");
        assert!(c > b);
        assert_eq!(graphs.uris().collect::<Vec<_>>(), vec!["http://example.org/g2", "http://example.org/g1"]);
    }

    #[test]
    fn test_save_load() {
        let mut graphs = GraphIndex::new();
        graphs.assert_graph("http://example.org/a");
        graphs.assert_graph("http://example.org/b");
        graphs.remove_graph("http://example.org/a");

        let mut buf = Vec::new();
        graphs.save(&mut buf);
        let mut reader = ByteReader::new(&buf);
        let loaded = GraphIndex::load(&mut reader).unwrap();
        assert_eq!(loaded, graphs);
        assert_eq!(loaded.clone().assert_graph("http://example.org/c"), 2);
    }
}
