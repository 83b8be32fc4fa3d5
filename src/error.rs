//! Error types for the triple store

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::record::RecordKind;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A triple component is not an absolute URI
    #[error("Invalid triple: {0}")]
    InvalidTriple(String),

    #[error("Store already exists at {0:?}")]
    StoreAlreadyExists(PathBuf),

    #[error("Store not found at {0:?}")]
    StoreNotFound(PathBuf),

    #[error("Store file missing: {0:?}")]
    MissingStoreFile(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Key {key} already exists in tree {tree}")]
    DuplicateKey { tree: u64, key: u64 },

    #[error("Key {key} not found in tree {tree}")]
    MissingKey { tree: u64, key: u64 },

    #[error("Object id mismatch at offset {offset}: expected {expected}, found {found}")]
    ObjectIdMismatch { expected: u64, found: u64, offset: u64 },

    #[error("No location recorded for object {0}")]
    MissingObjectLocation(u64),

    #[error("Invalid commit point at master file position {position}: {reason}")]
    InvalidCommitPoint { position: u64, reason: String },

    #[error("Failed to read {kind:?} object {object_id} at offset {offset} in {path:?}: {source}")]
    StoreRead {
        object_id: u64,
        offset: u64,
        kind: RecordKind,
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),
}

impl StoreError {
    /// True for errors caused by bad input rather than a broken store
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidTriple(_)
                | StoreError::StoreAlreadyExists(_)
                | StoreError::StoreNotFound(_)
                | StoreError::ReadOnly
                | StoreError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(StoreError::InvalidTriple("x".into()).is_caller_error());
        assert!(StoreError::ReadOnly.is_caller_error());
        assert!(!StoreError::MissingObjectLocation(3).is_caller_error());
        assert!(!StoreError::DuplicateKey { tree: 1, key: 2 }.is_caller_error());
    }

    #[test]
    fn test_store_read_keeps_context() {
        let err = StoreError::StoreRead {
            object_id: 12,
            offset: 340,
            kind: RecordKind::RefNode,
            path: PathBuf::from("/tmp/store/data.bin"),
            source: Box::new(StoreError::InvalidFormat("unexpected end of record".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("RefNode object 12 at offset 340"));
        assert!(msg.contains("unexpected end of record"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
