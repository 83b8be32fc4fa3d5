//! Persisted record kinds and their framing in the data file
//!
//! Each record is written as `varint(len) | tag | body` where the body starts
//! with the object id. The set of kinds is closed: consolidation and
//! snapshot loading dispatch on `RecordKind` instead of a runtime type name.

use crate::btree::{Node, NodeValue, PersistentBTree};
use crate::error::{Result, StoreError};
use crate::resource::Bucket;
use crate::storage::varint::{encode_varint, ByteReader};
use crate::store::index::{ObjectRef, RelatedResource};
use crate::store::snapshot::StoreSnapshot;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Store = 1,
    BucketNode = 2,
    RefNode = 3,
    RelatedNode = 4,
    BucketTree = 5,
    RefTree = 6,
    RelatedList = 7,
}

impl RecordKind {
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => RecordKind::Store,
            2 => RecordKind::BucketNode,
            3 => RecordKind::RefNode,
            4 => RecordKind::RelatedNode,
            5 => RecordKind::BucketTree,
            6 => RecordKind::RefTree,
            7 => RecordKind::RelatedList,
            other => {
                return Err(StoreError::InvalidFormat(format!(
                    "unknown record tag {}",
                    other
                )))
            }
        })
    }
}

/// Any object that can be appended to the data file
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Store(StoreSnapshot),
    BucketNode(Node<Bucket>),
    RefNode(Node<ObjectRef>),
    RelatedNode(Node<RelatedResource>),
    BucketTree(PersistentBTree<Bucket>),
    RefTree(PersistentBTree<ObjectRef>),
    RelatedList(PersistentBTree<RelatedResource>),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Store(_) => RecordKind::Store,
            Record::BucketNode(_) => RecordKind::BucketNode,
            Record::RefNode(_) => RecordKind::RefNode,
            Record::RelatedNode(_) => RecordKind::RelatedNode,
            Record::BucketTree(_) => RecordKind::BucketTree,
            Record::RefTree(_) => RecordKind::RefTree,
            Record::RelatedList(_) => RecordKind::RelatedList,
        }
    }

    pub fn object_id(&self) -> u64 {
        match self {
            Record::Store(_) => crate::btree::arena::STORE_OBJECT_ID,
            Record::BucketNode(node) => node.id,
            Record::RefNode(node) => node.id,
            Record::RelatedNode(node) => node.id,
            Record::BucketTree(tree) => tree.id(),
            Record::RefTree(tree) => tree.id(),
            Record::RelatedList(tree) => tree.id(),
        }
    }

    fn save_body(&self, buf: &mut Vec<u8>) {
        match self {
            Record::Store(snapshot) => snapshot.save(buf),
            Record::BucketNode(node) => node.save(buf),
            Record::RefNode(node) => node.save(buf),
            Record::RelatedNode(node) => node.save(buf),
            Record::BucketTree(tree) => tree.save(buf),
            Record::RefTree(tree) => tree.save(buf),
            Record::RelatedList(tree) => tree.save(buf),
        }
    }

    /// Append the framed record to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) {
        let mut payload = vec![self.kind() as u8];
        self.save_body(&mut payload);
        encode_varint(payload.len() as u64, buf);
        buf.extend_from_slice(&payload);
    }

    /// Decode a payload (tag + body, without the length prefix)
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let kind = RecordKind::from_tag(reader.byte()?)?;
        let record = match kind {
            RecordKind::Store => Record::Store(StoreSnapshot::load(&mut reader)?),
            RecordKind::BucketNode => Record::BucketNode(Node::load(&mut reader)?),
            RecordKind::RefNode => Record::RefNode(Node::load(&mut reader)?),
            RecordKind::RelatedNode => Record::RelatedNode(Node::load(&mut reader)?),
            RecordKind::BucketTree => Record::BucketTree(PersistentBTree::load(&mut reader)?),
            RecordKind::RefTree => Record::RefTree(PersistentBTree::load(&mut reader)?),
            RecordKind::RelatedList => Record::RelatedList(PersistentBTree::load(&mut reader)?),
        };
        if !reader.is_exhausted() {
            return Err(StoreError::InvalidFormat(format!(
                "{:?} record has {} trailing bytes",
                kind,
                payload.len() - reader.position()
            )));
        }
        Ok(record)
    }
}

macro_rules! impl_node_value {
    ($value:ty, $node_variant:ident, $tree_variant:ident) => {
        impl NodeValue for $value {
            const NODE_KIND: RecordKind = RecordKind::$node_variant;

            fn save(&self, buf: &mut Vec<u8>) {
                <$value>::save(self, buf)
            }

            fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
                <$value>::load(reader)
            }

            fn wrap_node(node: Node<Self>) -> Record {
                Record::$node_variant(node)
            }

            fn as_node(record: &Record) -> Option<&Node<Self>> {
                match record {
                    Record::$node_variant(node) => Some(node),
                    _ => None,
                }
            }

            fn wrap_tree(tree: PersistentBTree<Self>) -> Record {
                Record::$tree_variant(tree)
            }

            fn as_tree(record: &Record) -> Option<&PersistentBTree<Self>> {
                match record {
                    Record::$tree_variant(tree) => Some(tree),
                    _ => None,
                }
            }
        }
    };
}

impl_node_value!(Bucket, BucketNode, BucketTree);
impl_node_value!(ObjectRef, RefNode, RefTree);
impl_node_value!(RelatedResource, RelatedNode, RelatedList);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{Entry, ObjectArena};
    use crate::resource::Resource;
    use std::collections::BTreeSet;

    fn round_trip(record: &Record) -> Record {
        let mut buf = Vec::new();
        record.encode(&mut buf);
        let mut pos = 0;
        let len = crate::storage::varint::decode_varint(&buf, &mut pos).unwrap() as usize;
        assert_eq!(pos + len, buf.len());
        Record::decode(&buf[pos..]).unwrap()
    }

    fn literal(rid: u64, value: &str, lang: Option<&str>) -> Resource {
        Resource {
            rid,
            is_literal: true,
            data_type_rid: 42,
            lexical_value: value.to_string(),
            language_code: lang.map(str::to_string),
        }
    }

    #[test]
    fn test_bucket_node_round_trip() {
        let bucket = Bucket {
            resources: vec![
                literal(7, "chat", Some("fr")),
                literal(7 | (1 << 32), "chat", None),
                Resource {
                    rid: 7 | (2 << 32),
                    is_literal: false,
                    data_type_rid: 0,
                    lexical_value: "http://example.org/chat".into(),
                    language_code: None,
                },
            ],
        };
        let record = Record::BucketNode(Node {
            id: 12,
            parent_id: Some(3),
            keys: vec![Entry::new(7, bucket)],
            children: Vec::new(),
        });
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_related_node_round_trip() {
        let record = Record::RelatedNode(Node {
            id: 5,
            parent_id: None,
            keys: vec![
                Entry::new(
                    10,
                    RelatedResource {
                        rid: 10,
                        graph_ids: BTreeSet::from([1, 4]),
                    },
                ),
                Entry::new(
                    u64::MAX,
                    RelatedResource {
                        rid: u64::MAX,
                        graph_ids: BTreeSet::from([2]),
                    },
                ),
            ],
            children: vec![100, 101, 102],
        });
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_tree_headers_round_trip() {
        let mut arena = ObjectArena::in_memory();
        let buckets = PersistentBTree::<Bucket>::create(&mut arena, 7).unwrap();
        let refs = PersistentBTree::<ObjectRef>::create(&mut arena, 5).unwrap();
        let related = PersistentBTree::<RelatedResource>::create(&mut arena, 3).unwrap();

        for record in [
            Record::BucketTree(buckets),
            Record::RefTree(refs),
            Record::RelatedList(related),
        ] {
            assert_eq!(round_trip(&record), record);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_tag_and_trailing_bytes() {
        assert!(Record::decode(&[99, 0]).is_err());

        let mut buf = Vec::new();
        Record::RefNode(Node::new_leaf(1, None)).encode(&mut buf);
        buf.push(0);
        assert!(Record::decode(&buf[1..]).is_err());
    }

    #[test]
    fn test_decode_huge_counts_fail_cleanly() {
        // RefNode id 1, root, key count 2^60, then nothing
        let mut payload = vec![RecordKind::RefNode as u8, 1, 0];
        encode_varint(1 << 60, &mut payload);
        assert!(matches!(
            Record::decode(&payload),
            Err(StoreError::InvalidFormat(_))
        ));

        // Store record whose location table claims 2^62 entries
        let mut payload = vec![RecordKind::Store as u8];
        crate::storage::varint::encode_str("store", &mut payload);
        for field in [2u64, 1, 2, 3, 3, 3] {
            encode_varint(field, &mut payload);
        }
        crate::store::graphs::GraphIndex::new().save(&mut payload);
        crate::store::prefix::PrefixManager::new().save(&mut payload);
        encode_varint(1 << 62, &mut payload);
        assert!(Record::decode(&payload).is_err());
    }
}
