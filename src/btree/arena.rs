//! Object arena: per-store cache, dirty list and id allocator

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{Result, StoreError};
use crate::storage::data_file::DataFile;
use crate::storage::location::ObjectLocationManager;
use crate::storage::record::Record;

/// Object id reserved for the store snapshot itself
pub const STORE_OBJECT_ID: u64 = 0;

/// Resolves object ids to records for a single store instance.
///
/// Reads go to the in-memory cache first, then to the data file through the
/// location manager. Every `put` lands in the cache and on the dirty list
/// (once per object) until the next commit writes it out. The cache uses
/// `RefCell`, so an arena and the store owning it are single-threaded.
pub struct ObjectArena {
    data: Option<DataFile>,
    locations: ObjectLocationManager,
    loaded: RefCell<HashMap<u64, Rc<Record>>>,
    dirty: Vec<u64>,
    dirty_set: HashSet<u64>,
    next_object_id: u64,
}

impl ObjectArena {
    /// Arena with no backing file; everything stays in the cache
    pub fn in_memory() -> Self {
        Self {
            data: None,
            locations: ObjectLocationManager::new(),
            loaded: RefCell::new(HashMap::new()),
            dirty: Vec::new(),
            dirty_set: HashSet::new(),
            next_object_id: STORE_OBJECT_ID + 1,
        }
    }

    pub fn with_data_file(data: DataFile, locations: ObjectLocationManager, next_object_id: u64) -> Self {
        Self {
            data: Some(data),
            locations,
            loaded: RefCell::new(HashMap::new()),
            dirty: Vec::new(),
            dirty_set: HashSet::new(),
            next_object_id: next_object_id.max(STORE_OBJECT_ID + 1),
        }
    }

    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    pub fn next_object_id(&self) -> u64 {
        self.next_object_id
    }

    pub fn locations(&self) -> &ObjectLocationManager {
        &self.locations
    }

    pub fn data_file(&self) -> Option<&DataFile> {
        self.data.as_ref()
    }

    /// Resolve an object by id
    pub fn load(&self, object_id: u64) -> Result<Rc<Record>> {
        if let Some(record) = self.loaded.borrow().get(&object_id) {
            return Ok(Rc::clone(record));
        }

        let location = self
            .locations
            .get(object_id)
            .ok_or(StoreError::MissingObjectLocation(object_id))?;
        let data = self
            .data
            .as_ref()
            .ok_or(StoreError::MissingObjectLocation(object_id))?;

        let record = data.read_record(location.offset).map_err(|e| StoreError::StoreRead {
            object_id,
            offset: location.offset,
            kind: location.kind,
            path: data.path().to_path_buf(),
            source: Box::new(e),
        })?;

        if record.object_id() != object_id {
            return Err(StoreError::ObjectIdMismatch {
                expected: object_id,
                found: record.object_id(),
                offset: location.offset,
            });
        }
        if record.kind() != location.kind {
            return Err(StoreError::Internal(format!(
                "object {} at offset {} is {:?}, location manager says {:?}",
                object_id,
                location.offset,
                record.kind(),
                location.kind
            )));
        }

        let record = Rc::new(record);
        self.loaded.borrow_mut().insert(object_id, Rc::clone(&record));
        Ok(record)
    }

    /// Replace an object's current state and mark it dirty
    pub fn put(&mut self, record: Record) {
        let object_id = record.object_id();
        if self.dirty_set.insert(object_id) {
            self.dirty.push(object_id);
        }
        self.loaded.get_mut().insert(object_id, Rc::new(record));
    }

    /// Drop an object from the live store and free its location slot
    pub fn release(&mut self, object_id: u64) {
        self.loaded.get_mut().remove(&object_id);
        if self.dirty_set.remove(&object_id) {
            self.dirty.retain(|&id| id != object_id);
        }
        self.locations.delete_offset(object_id);
    }

    /// Dirty object ids in the order they were first touched
    pub fn dirty_ids(&self) -> &[u64] {
        &self.dirty
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Install the locations produced by a successful write and clear the
    /// dirty list. Every cached object is clean afterwards, so the cache is
    /// dropped and later reads go back to the data file.
    pub fn install_locations(&mut self, locations: ObjectLocationManager) {
        self.locations = locations;
        self.dirty.clear();
        self.dirty_set.clear();
        if self.data.is_some() {
            self.loaded.get_mut().clear();
        }
    }

    /// Swap in a rewritten data file (consolidation)
    pub fn replace_data_file(&mut self, data: DataFile, locations: ObjectLocationManager) {
        self.data = Some(data);
        self.install_locations(locations);
    }

    /// Drop the data file mapping so the file can be replaced on disk
    pub fn release_data_map(&self) {
        if let Some(data) = &self.data {
            data.release_map();
        }
    }

    pub fn cached_objects(&self) -> usize {
        self.loaded.borrow().len()
    }
}
