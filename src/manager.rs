//! Store manager: file-level operations on store directories

use std::fs::{self, File};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::storage::master::now_millis;
use crate::storage::{CommitPoint, MasterFile, DATA_FILE_NAME, MASTER_FILE_NAME};
use crate::store::{Store, TripleStore};

/// Human-readable metadata file inside a store directory
pub const METADATA_FILE_NAME: &str = "store.json";

/// Store format version written to `store.json`
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Contents of `store.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub format_version: u32,
    pub store_id: String,
    pub created_at: i64,
    /// Sizing the store was created with
    pub config: StoreConfig,
}

/// Creates, opens, deletes and consolidates stores
#[derive(Debug, Clone, Default)]
pub struct StoreManager {
    config: StoreConfig,
}

impl StoreManager {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// True if `location` holds a data file and a master file
    pub fn store_exists<P: AsRef<Path>>(&self, location: P) -> bool {
        let dir = location.as_ref();
        dir.join(DATA_FILE_NAME).is_file() && dir.join(MASTER_FILE_NAME).is_file()
    }

    fn require_store(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Err(StoreError::StoreNotFound(dir.to_path_buf()));
        }
        for name in [DATA_FILE_NAME, MASTER_FILE_NAME] {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(StoreError::MissingStoreFile(path));
            }
        }
        Ok(())
    }

    /// Create an empty store and record its initial commit point (job 0)
    pub fn create_store<P: AsRef<Path>>(&self, location: P) -> Result<Store> {
        let dir = location.as_ref();
        self.config.validate()?;
        if dir.join(DATA_FILE_NAME).exists() || dir.join(MASTER_FILE_NAME).exists() {
            return Err(StoreError::StoreAlreadyExists(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let mut store = Store::initialize(dir, &self.config)?;
        let metadata = StoreMetadata {
            format_version: STORE_FORMAT_VERSION,
            store_id: store.store_id().to_string(),
            created_at: now_millis(),
            config: self.config.clone(),
        };
        let file = File::create(dir.join(METADATA_FILE_NAME))?;
        serde_json::to_writer_pretty(file, &metadata)?;

        store.commit(0)?;
        tracing::info!("Created store {} at {:?}", store.store_id(), dir);
        Ok(store)
    }

    /// Open a store at its latest commit point
    pub fn open_store<P: AsRef<Path>>(&self, location: P, read_only: bool) -> Result<Store> {
        let dir = location.as_ref();
        self.require_store(dir)?;
        Store::load(dir, None, read_only, self.config.sync_on_commit)
    }

    /// Open a read-only view of a store as of the commit whose `Store`
    /// record is at `commit_offset`
    pub fn open_store_at<P: AsRef<Path>>(&self, location: P, commit_offset: u64) -> Result<Store> {
        let dir = location.as_ref();
        self.require_store(dir)?;
        Store::load(dir, Some(commit_offset), true, self.config.sync_on_commit)
    }

    /// Remove a store directory and everything in it
    pub fn delete_store<P: AsRef<Path>>(&self, location: P) -> Result<()> {
        let dir = location.as_ref();
        if !self.store_exists(dir) {
            return Err(StoreError::StoreNotFound(dir.to_path_buf()));
        }
        fs::remove_dir_all(dir)?;
        tracing::info!("Deleted store at {:?}", dir);
        Ok(())
    }

    /// Commit points of a store, oldest first. A corrupt master-file tail is
    /// reported as missing points, not repaired.
    pub fn list_commit_points<P: AsRef<Path>>(&self, location: P) -> Result<Vec<CommitPoint>> {
        let dir = location.as_ref();
        self.require_store(dir)?;
        let data_len = fs::metadata(dir.join(DATA_FILE_NAME))?.len();
        MasterFile::open(dir.join(MASTER_FILE_NAME))?.valid_commit_points(data_len)
    }

    /// The commit point whose `Store` record is at `offset`
    pub fn get_commit_point<P: AsRef<Path>>(&self, location: P, offset: u64) -> Result<CommitPoint> {
        self.list_commit_points(location)?
            .into_iter()
            .rev()
            .find(|p| p.store_offset() == offset)
            .ok_or_else(|| StoreError::InvalidCommitPoint {
                position: offset,
                reason: "no commit point references this offset".into(),
            })
    }

    /// Rewrite a store's live data, leaving a single commit point
    pub fn consolidate_store<P: AsRef<Path>>(&self, location: P, job_id: u128) -> Result<CommitPoint> {
        let mut store = self.open_store(location, false)?;
        store.consolidate(job_id)
    }

    pub fn read_metadata<P: AsRef<Path>>(&self, location: P) -> Result<StoreMetadata> {
        let path = location.as_ref().join(METADATA_FILE_NAME);
        if !path.is_file() {
            return Err(StoreError::MissingStoreFile(path));
        }
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
