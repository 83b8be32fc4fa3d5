//! Prefix manager: namespace prefix <-> numeric token
//!
//! A compressed URI is `"{token}:{local}"`. Absolute URIs always start with a
//! letter, so a compressed form never collides with a real URI.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::storage::varint::{encode_str, encode_varint, ByteReader};

/// Prefixes this short are stored as-is
const MIN_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixManager {
    tokens: HashMap<String, u64>,
    prefixes: Vec<String>,
}

/// Split at the last '/' or '#', keeping the delimiter in the prefix
fn split_namespace(uri: &str) -> Option<(&str, &str)> {
    let pos = uri.rfind(['/', '#'])?;
    Some(uri.split_at(pos + 1))
}

impl PrefixManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress `uri`, registering its namespace if needed
    pub fn compress(&mut self, uri: &str) -> String {
        let Some((prefix, local)) = split_namespace(uri) else {
            return uri.to_string();
        };
        if prefix.len() <= MIN_PREFIX_LEN {
            return uri.to_string();
        }
        let token = match self.tokens.get(prefix) {
            Some(&token) => token,
            None => {
                let token = self.prefixes.len() as u64;
                self.prefixes.push(prefix.to_string());
                self.tokens.insert(prefix.to_string(), token);
                token
            }
        };
        format!("{}:{}", token, local)
    }

    /// Compress `uri` with the namespaces already known; never registers one
    pub fn try_compress<'a>(&self, uri: &'a str) -> Cow<'a, str> {
        match split_namespace(uri) {
            Some((prefix, local)) if prefix.len() > MIN_PREFIX_LEN => match self.tokens.get(prefix) {
                Some(token) => Cow::Owned(format!("{}:{}", token, local)),
                None => Cow::Borrowed(uri),
            },
            _ => Cow::Borrowed(uri),
        }
    }

    /// Reverse `compress`. Strings that are not compressed come back unchanged.
    pub fn expand<'a>(&self, value: &'a str) -> Cow<'a, str> {
        let Some((token, local)) = value.split_once(':') else {
            return Cow::Borrowed(value);
        };
        match token.parse::<usize>().ok().and_then(|t| self.prefixes.get(t)) {
            Some(prefix) => Cow::Owned(format!("{}{}", prefix, local)),
            None => Cow::Borrowed(value),
        }
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.prefixes.len() as u64, buf);
        for prefix in &self.prefixes {
            encode_str(prefix, buf);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.varint()? as usize;
        let mut manager = Self::new();
        for token in 0..count {
            let prefix = reader.string()?;
            if manager.tokens.insert(prefix.clone(), token as u64).is_some() {
                return Err(StoreError::InvalidFormat(format!(
                    "prefix {:?} registered twice",
                    prefix
                )));
            }
            manager.prefixes.push(prefix);
        }
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_expand() {
        let mut prefixes = PrefixManager::new();
        let a = prefixes.compress("http://xmlns.com/foaf/0.1/name");
        let b = prefixes.compress("http://xmlns.com/foaf/0.1/knows");
        let c = prefixes.compress("http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
        assert_eq!(a, "0:name");
        assert_eq!(b, "0:knows");
        assert_eq!(c, "1:type");
        assert_eq!(prefixes.expand(&a), "http://xmlns.com/foaf/0.1/name");
        assert_eq!(prefixes.expand(&c), "http://www.w3.org/1999/02/22-rdf-syntax-ns#type");
    }

    #[test]
    fn test_short_prefixes_untouched() {
        let mut prefixes = PrefixManager::new();
        assert_eq!(prefixes.compress("urn:isbn:123"), "urn:isbn:123");
        assert_eq!(prefixes.compress("urn:x#y"), "urn:x#y");
        assert!(prefixes.is_empty());
        assert_eq!(prefixes.expand("urn:isbn:123"), "urn:isbn:123");
    }

    #[test]
    fn test_try_compress_does_not_register() {
        let mut prefixes = PrefixManager::new();
        let uri = "http://example.org/people/alice";
        assert_eq!(prefixes.try_compress(uri), uri);
        assert!(prefixes.is_empty());

        prefixes.compress(uri);
        assert_eq!(prefixes.try_compress("http://example.org/people/bob"), "0:bob");
    }

    #[test]
    fn test_save_load() {
        let mut prefixes = PrefixManager::new();
        prefixes.compress("http://example.org/people/alice");
        prefixes.compress("http://example.org/places#paris");

        let mut buf = Vec::new();
        prefixes.save(&mut buf);
        let loaded = PrefixManager::load(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(loaded, prefixes);
        assert_eq!(loaded.expand("1:paris"), "http://example.org/places#paris");
    }
}
