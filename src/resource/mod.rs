//! Resource Id Index: interns RDF terms into stable 64-bit resource ids
//!
//! A resource id (Rid) is `hash32(term) | (slot << 32)`. Terms sharing a
//! 32-bit hash live in one `Bucket`, stored in a B-tree keyed by the hash;
//! a term's slot is its position in the bucket and never changes.

use std::cell::RefCell;
use std::collections::HashMap;

use blake3::Hasher;

use crate::btree::{ObjectArena, PersistentBTree};
use crate::error::{Result, StoreError};
use crate::storage::varint::{encode_str, encode_varint, ByteReader, PREALLOC_LIMIT};

const FLAG_LITERAL: u8 = 0b01;
const FLAG_LANGUAGE: u8 = 0b10;

/// 32-bit term hash: first four bytes (little-endian) of the BLAKE3 digest
///
/// # Examples
/// ```
/// use quadstore::resource::hash32;
///
/// assert_eq!(hash32("http://example.org/a"), hash32("http://example.org/a"));
/// assert_ne!(hash32("http://example.org/a"), hash32("http://example.org/b"));
/// ```
pub fn hash32(term: &str) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(term.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&hash.as_bytes()[0..4]);
    u32::from_le_bytes(bytes)
}

/// Compose a Rid from a term hash and a bucket slot
pub fn make_rid(hash: u32, slot: u32) -> u64 {
    hash as u64 | ((slot as u64) << 32)
}

/// An RDF term as presented to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term<'a> {
    Uri(&'a str),
    Literal {
        value: &'a str,
        data_type: Option<&'a str>,
        lang: Option<&'a str>,
    },
}

impl Term<'_> {
    /// String the term is hashed on: the URI, or `value^^dataType@lang`
    /// with absent parts left out
    pub fn hash_string(&self) -> String {
        match *self {
            Term::Uri(uri) => uri.to_string(),
            Term::Literal {
                value,
                data_type,
                lang,
            } => {
                let mut s = String::with_capacity(value.len() + 16);
                s.push_str(value);
                if let Some(dt) = data_type {
                    s.push_str("^^");
                    s.push_str(dt);
                }
                if let Some(lang) = lang {
                    s.push('@');
                    s.push_str(lang);
                }
                s
            }
        }
    }
}

/// An interned term. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub rid: u64,
    pub is_literal: bool,
    /// Rid of the literal's data type URI, 0 for none
    pub data_type_rid: u64,
    pub lexical_value: String,
    pub language_code: Option<String>,
}

impl Resource {
    fn matches(&self, is_literal: bool, lexical: &str, data_type_rid: u64, lang: Option<&str>) -> bool {
        self.is_literal == is_literal
            && self.data_type_rid == data_type_rid
            && self.lexical_value == lexical
            && self.language_code.as_deref() == lang
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.rid, buf);
        let mut flags = 0;
        if self.is_literal {
            flags |= FLAG_LITERAL;
        }
        if self.language_code.is_some() {
            flags |= FLAG_LANGUAGE;
        }
        buf.push(flags);
        encode_varint(self.data_type_rid, buf);
        encode_str(&self.lexical_value, buf);
        if let Some(lang) = &self.language_code {
            encode_str(lang, buf);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let rid = reader.varint()?;
        let flags = reader.byte()?;
        if flags & !(FLAG_LITERAL | FLAG_LANGUAGE) != 0 {
            return Err(StoreError::InvalidFormat(format!(
                "resource {} has unknown flags {:#04x}",
                rid, flags
            )));
        }
        let data_type_rid = reader.varint()?;
        let lexical_value = reader.string()?;
        let language_code = if flags & FLAG_LANGUAGE != 0 {
            Some(reader.string()?)
        } else {
            None
        };
        Ok(Self {
            rid,
            is_literal: flags & FLAG_LITERAL != 0,
            data_type_rid,
            lexical_value,
            language_code,
        })
    }
}

/// Resources sharing one 32-bit hash, in slot order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    pub resources: Vec<Resource>,
}

impl Bucket {
    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.resources.len() as u64, buf);
        for resource in &self.resources {
            resource.save(buf);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.varint()? as usize;
        let mut resources = Vec::with_capacity(count.min(PREALLOC_LIMIT));
        for _ in 0..count {
            resources.push(Resource::load(reader)?);
        }
        Ok(Self { resources })
    }
}

/// Term interning on top of a B-tree of buckets.
///
/// Resolved URIs are remembered in a per-instance cache; literals are
/// always resolved through the tree.
pub struct ResourceIdIndex {
    tree: PersistentBTree<Bucket>,
    uri_cache: RefCell<HashMap<String, u64>>,
}

impl ResourceIdIndex {
    pub fn create(arena: &mut ObjectArena, max_keys: usize) -> Result<Self> {
        Ok(Self::from_tree(PersistentBTree::create(arena, max_keys)?))
    }

    pub fn open(arena: &ObjectArena, tree_id: u64) -> Result<Self> {
        Ok(Self::from_tree(PersistentBTree::open(arena, tree_id)?))
    }

    fn from_tree(tree: PersistentBTree<Bucket>) -> Self {
        Self {
            tree,
            uri_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn tree(&self) -> &PersistentBTree<Bucket> {
        &self.tree
    }

    pub fn tree_id(&self) -> u64 {
        self.tree.id()
    }

    /// Rid of `term`, interning it if needed
    pub fn assert_resource(&mut self, arena: &mut ObjectArena, term: Term<'_>) -> Result<u64> {
        let hash = hash32(&term.hash_string());
        self.assert_with_hash(arena, term, hash)
    }

    pub(crate) fn assert_with_hash(
        &mut self,
        arena: &mut ObjectArena,
        term: Term<'_>,
        hash: u32,
    ) -> Result<u64> {
        let (is_literal, lexical, data_type_rid, lang) = match term {
            Term::Uri(uri) => {
                if let Some(&rid) = self.uri_cache.borrow().get(uri) {
                    return Ok(rid);
                }
                (false, uri, 0, None)
            }
            Term::Literal {
                value,
                data_type,
                lang,
            } => {
                let data_type_rid = match data_type {
                    Some(dt) => self.assert_resource(arena, Term::Uri(dt))?,
                    None => 0,
                };
                (true, value, data_type_rid, lang)
            }
        };

        let bucket = self.tree.lookup(arena, hash as u64)?;
        if let Some(found) = bucket.as_ref().and_then(|b| {
            b.resources
                .iter()
                .find(|r| r.matches(is_literal, lexical, data_type_rid, lang))
        }) {
            let rid = found.rid;
            self.remember(term, rid);
            return Ok(rid);
        }

        let slot = bucket.as_ref().map_or(0, |b| b.resources.len());
        let slot = u32::try_from(slot).map_err(|_| {
            StoreError::Internal(format!("bucket {:#010x} has no free slots", hash))
        })?;
        let resource = Resource {
            rid: make_rid(hash, slot),
            is_literal,
            data_type_rid,
            lexical_value: lexical.to_string(),
            language_code: lang.map(str::to_string),
        };
        let rid = resource.rid;
        match bucket {
            Some(mut bucket) => {
                tracing::debug!("Hash collision on {:#010x}, slot {}", hash, slot);
                bucket.resources.push(resource);
                self.tree.update(arena, hash as u64, bucket)?;
            }
            None => {
                self.tree.insert(
                    arena,
                    hash as u64,
                    Bucket {
                        resources: vec![resource],
                    },
                )?;
            }
        }
        self.remember(term, rid);
        Ok(rid)
    }

    /// Rid of `term` if it has been interned; never creates
    pub fn get_resource(&self, arena: &ObjectArena, term: Term<'_>) -> Result<Option<u64>> {
        let hash = hash32(&term.hash_string());
        self.get_with_hash(arena, term, hash)
    }

    pub(crate) fn get_with_hash(&self, arena: &ObjectArena, term: Term<'_>, hash: u32) -> Result<Option<u64>> {
        let (is_literal, lexical, data_type_rid, lang) = match term {
            Term::Uri(uri) => {
                if let Some(&rid) = self.uri_cache.borrow().get(uri) {
                    return Ok(Some(rid));
                }
                (false, uri, 0, None)
            }
            Term::Literal {
                value,
                data_type,
                lang,
            } => {
                let data_type_rid = match data_type {
                    Some(dt) => match self.get_resource(arena, Term::Uri(dt))? {
                        Some(rid) => rid,
                        None => return Ok(None),
                    },
                    None => 0,
                };
                (true, value, data_type_rid, lang)
            }
        };

        let rid = self.tree.lookup(arena, hash as u64)?.and_then(|bucket| {
            bucket
                .resources
                .iter()
                .find(|r| r.matches(is_literal, lexical, data_type_rid, lang))
                .map(|r| r.rid)
        });
        if let Some(rid) = rid {
            self.remember(term, rid);
        }
        Ok(rid)
    }

    /// Reverse lookup: the resource interned under `rid`
    pub fn resource(&self, arena: &ObjectArena, rid: u64) -> Result<Option<Resource>> {
        let hash = rid & 0xFFFF_FFFF;
        let slot = (rid >> 32) as usize;
        Ok(self
            .tree
            .lookup(arena, hash)?
            .and_then(|mut bucket| {
                if slot < bucket.resources.len() {
                    Some(bucket.resources.swap_remove(slot))
                } else {
                    None
                }
            })
            .filter(|r| r.rid == rid))
    }

    fn remember(&self, term: Term<'_>, rid: u64) {
        if let Term::Uri(uri) = term {
            self.uri_cache.borrow_mut().insert(uri.to_string(), rid);
        }
    }

    pub fn cached_uris(&self) -> usize {
        self.uri_cache.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

    fn index() -> (ObjectArena, ResourceIdIndex) {
        let mut arena = ObjectArena::in_memory();
        let index = ResourceIdIndex::create(&mut arena, 5).unwrap();
        (arena, index)
    }

    fn literal<'a>(value: &'a str, data_type: Option<&'a str>, lang: Option<&'a str>) -> Term<'a> {
        Term::Literal {
            value,
            data_type,
            lang,
        }
    }

    #[test]
    fn test_hash_string_concatenation() {
        assert_eq!(Term::Uri("http://a/b").hash_string(), "http://a/b");
        assert_eq!(literal("x", None, None).hash_string(), "x");
        assert_eq!(literal("x", Some("dt"), None).hash_string(), "x^^dt");
        assert_eq!(literal("x", Some("dt"), Some("en")).hash_string(), "x^^dt@en");
        assert_eq!(literal("x", None, Some("en")).hash_string(), "x@en");
    }

    #[test]
    fn test_assert_is_idempotent() {
        let (mut arena, mut index) = index();
        let a = index.assert_resource(&mut arena, Term::Uri("http://example.org/a")).unwrap();
        let b = index.assert_resource(&mut arena, Term::Uri("http://example.org/b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(index.assert_resource(&mut arena, Term::Uri("http://example.org/a")).unwrap(), a);

        let lit = index.assert_resource(&mut arena, literal("a", Some(XSD_STRING), None)).unwrap();
        assert_eq!(
            index.assert_resource(&mut arena, literal("a", Some(XSD_STRING), None)).unwrap(),
            lit
        );
        assert_eq!(index.tree().check_invariants(&arena).unwrap(), 4);
    }

    #[test]
    fn test_literals_differ_by_type_and_language() {
        let (mut arena, mut index) = index();
        let plain = index.assert_resource(&mut arena, literal("chat", None, None)).unwrap();
        let typed = index.assert_resource(&mut arena, literal("chat", Some(XSD_STRING), None)).unwrap();
        let fr = index.assert_resource(&mut arena, literal("chat", Some(XSD_STRING), Some("fr"))).unwrap();
        let uri = index.assert_resource(&mut arena, Term::Uri("chat")).unwrap();
        let all: std::collections::BTreeSet<_> = [plain, typed, fr, uri].into_iter().collect();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_get_resource_never_creates() {
        let (mut arena, mut index) = index();
        assert_eq!(index.get_resource(&arena, Term::Uri("http://example.org/a")).unwrap(), None);
        assert!(index.tree().is_empty(&arena).unwrap());
        assert_eq!(
            index.get_resource(&arena, literal("1", Some("http://example.org/dt"), None)).unwrap(),
            None
        );
        assert!(index.tree().is_empty(&arena).unwrap());

        let rid = index.assert_resource(&mut arena, literal("1", Some(XSD_STRING), Some("en"))).unwrap();
        assert_eq!(
            index.get_resource(&arena, literal("1", Some(XSD_STRING), Some("en"))).unwrap(),
            Some(rid)
        );
    }

    #[test]
    fn test_forced_collisions_get_distinct_slots() {
        let (mut arena, mut index) = index();
        let hash = 0xDEAD_BEEF;
        let first = index.assert_with_hash(&mut arena, Term::Uri("http://a/1"), hash).unwrap();
        let second = index.assert_with_hash(&mut arena, literal("1", None, None), hash).unwrap();
        let third = index.assert_with_hash(&mut arena, literal("1", None, Some("en")), hash).unwrap();

        assert_eq!(first, make_rid(hash, 0));
        assert_eq!(second, make_rid(hash, 1));
        assert_eq!(third, make_rid(hash, 2));
        assert_eq!(index.assert_with_hash(&mut arena, literal("1", None, None), hash).unwrap(), second);
        assert_eq!(index.get_with_hash(&arena, literal("1", None, Some("en")), hash).unwrap(), Some(third));

        let bucket = index.tree().lookup(&arena, hash as u64).unwrap().unwrap();
        assert_eq!(bucket.resources.len(), 3);
    }

    #[test]
    fn test_reverse_lookup() {
        let (mut arena, mut index) = index();
        let rid = index.assert_resource(&mut arena, literal("42", Some(XSD_STRING), None)).unwrap();
        let resource = index.resource(&arena, rid).unwrap().unwrap();
        assert!(resource.is_literal);
        assert_eq!(resource.lexical_value, "42");

        let dt = index.resource(&arena, resource.data_type_rid).unwrap().unwrap();
        assert_eq!(dt.lexical_value, XSD_STRING);
        assert!(!dt.is_literal);

        assert_eq!(index.resource(&arena, rid | (7 << 32)).unwrap(), None);
    }

    #[test]
    fn test_only_uris_are_cached() {
        let (mut arena, mut index) = index();
        index.assert_resource(&mut arena, Term::Uri("http://example.org/a")).unwrap();
        index.assert_resource(&mut arena, literal("x", None, None)).unwrap();
        index.assert_resource(&mut arena, literal("y", Some(XSD_STRING), None)).unwrap();
        // the data type URI is cached, the literals are not
        assert_eq!(index.cached_uris(), 2);
    }

    #[test]
    fn test_bucket_round_trip() {
        let bucket = Bucket {
            resources: vec![
                Resource {
                    rid: make_rid(5, 0),
                    is_literal: false,
                    data_type_rid: 0,
                    lexical_value: "http://example.org/".into(),
                    language_code: None,
                },
                Resource {
                    rid: make_rid(5, 1),
                    is_literal: true,
                    data_type_rid: 99,
                    lexical_value: "Grüße".into(),
                    language_code: Some("de".into()),
                },
            ],
        };
        let mut buf = Vec::new();
        bucket.save(&mut buf);
        let mut reader = ByteReader::new(&buf);
        assert_eq!(Bucket::load(&mut reader).unwrap(), bucket);
        assert!(reader.is_exhausted());
    }
}
