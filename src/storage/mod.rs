//! Append-only binary storage
//!
//! A store directory holds two files:
//!
//! - **data.bin**: header + framed records, appended at every commit
//! - **master.bin**: header + fixed-size commit points, newest last
//!
//! Records are addressed by object id through the `ObjectLocationManager`
//! persisted inside every `Store` snapshot record.

pub mod data_file;
pub mod location;
pub mod master;
pub mod record;
pub mod varint;

pub use data_file::{DataFile, RecordAppender, DATA_HEADER_SIZE};
pub use location::{ObjectLocation, ObjectLocationManager};
pub use master::{CommitPoint, MasterFile};
pub use record::{Record, RecordKind};

/// Data file name inside a store directory
pub const DATA_FILE_NAME: &str = "data.bin";

/// Master file name inside a store directory
pub const MASTER_FILE_NAME: &str = "master.bin";

/// Temporary data file written during consolidation
pub const CONSOLIDATE_FILE_NAME: &str = "data.bin.consolidate";
