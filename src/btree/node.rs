//! B-tree nodes and their entries

use crate::btree::NodeValue;
use crate::error::Result;
use crate::storage::varint::{encode_varint, ByteReader, PREALLOC_LIMIT};

/// A key/value pair stored in a node, ordered by key
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub key: u64,
    pub value: T,
}

impl<T> Entry<T> {
    pub fn new(key: u64, value: T) -> Self {
        Self { key, value }
    }
}

/// One node of a persistent B-tree.
///
/// Nodes never point at each other directly: `parent_id` and `children` are
/// object ids resolved through the arena on every step. A node without
/// children is a leaf; an internal node always has `keys.len() + 1` children.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<T> {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub keys: Vec<Entry<T>>,
    pub children: Vec<u64>,
}

impl<T: NodeValue> Node<T> {
    pub fn new_leaf(id: u64, parent_id: Option<u64>) -> Self {
        Self {
            id,
            parent_id,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Binary search over the node's keys
    pub fn search(&self, key: u64) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by_key(&key, |entry| entry.key)
    }

    /// Position of `child_id` among this node's children
    pub fn child_position(&self, child_id: u64) -> Option<usize> {
        self.children.iter().position(|&c| c == child_id)
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.id, buf);
        // ids start at 1, so 0 marks the root
        encode_varint(self.parent_id.unwrap_or(0), buf);
        encode_varint(self.keys.len() as u64, buf);
        for entry in &self.keys {
            encode_varint(entry.key, buf);
            entry.value.save(buf);
        }
        encode_varint(self.children.len() as u64, buf);
        for &child in &self.children {
            encode_varint(child, buf);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let id = reader.varint()?;
        let parent = reader.varint()?;
        let key_count = reader.varint()? as usize;
        let mut keys = Vec::with_capacity(key_count.min(PREALLOC_LIMIT));
        for _ in 0..key_count {
            let key = reader.varint()?;
            let value = T::load(reader)?;
            keys.push(Entry { key, value });
        }
        let child_count = reader.varint()? as usize;
        let mut children = Vec::with_capacity(child_count.min(PREALLOC_LIMIT));
        for _ in 0..child_count {
            children.push(reader.varint()?);
        }
        Ok(Self {
            id,
            parent_id: if parent == 0 { None } else { Some(parent) },
            keys,
            children,
        })
    }
}
