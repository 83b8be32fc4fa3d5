//! `Store`: the aggregate root over the arena, indexes and store files

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::btree::arena::STORE_OBJECT_ID;
use crate::btree::ObjectArena;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::resource::{ResourceIdIndex, Term};
use crate::storage::master::now_millis;
use crate::storage::{
    CommitPoint, DataFile, MasterFile, ObjectLocationManager, Record, RecordKind, CONSOLIDATE_FILE_NAME,
    DATA_FILE_NAME, MASTER_FILE_NAME,
};
use crate::store::graphs::GraphIndex;
use crate::store::index::PredicateIndex;
use crate::store::prefix::PrefixManager;
use crate::store::snapshot::StoreSnapshot;
use crate::store::{IdTriple, MatchOrder, Triple, TriplePattern, TripleStore, PLAIN_LITERAL};

fn absolute_uri() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, String>> = OnceLock::new();
    RE.get_or_init(|| {
        // scheme ":" rest, no whitespace
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S*$").map_err(|e| e.to_string())
    })
    .as_ref()
    .map_err(|e| StoreError::Internal(format!("absolute URI pattern: {}", e)))
}

fn validate_uri(value: &str, role: &str) -> Result<()> {
    if absolute_uri()?.is_match(value) {
        Ok(())
    } else {
        Err(StoreError::InvalidTriple(format!(
            "{} {:?} is not an absolute URI",
            role, value
        )))
    }
}

fn new_store_id(dir: &Path) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(dir.to_string_lossy().as_bytes());
    hasher.update(&now_millis().to_le_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}

/// An open triple store.
///
/// Mutations accumulate in the object arena until `commit` appends them to
/// the data file. A `Store` is single-writer: it is neither `Send` nor
/// `Sync`, and read-only instances opened at older commit points can be
/// used alongside it.
pub struct Store {
    dir: PathBuf,
    store_id: String,
    pub(crate) arena: ObjectArena,
    pub(crate) resources: ResourceIdIndex,
    pub(crate) subjects: PredicateIndex,
    pub(crate) objects: PredicateIndex,
    pub(crate) graphs: GraphIndex,
    pub(crate) prefixes: PrefixManager,
    master: MasterFile,
    read_only: bool,
    sync_on_commit: bool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("store_id", &self.store_id)
            .field("read_only", &self.read_only)
            .field("pending_changes", &self.arena.has_changes())
            .finish()
    }
}

impl Store {
    /// Lay out a new store directory with empty indexes. Nothing is
    /// committed yet.
    pub(crate) fn initialize(dir: &Path, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let data = DataFile::create(dir.join(DATA_FILE_NAME))?;
        let master = MasterFile::create(dir.join(MASTER_FILE_NAME))?;

        let mut arena = ObjectArena::with_data_file(data, ObjectLocationManager::new(), STORE_OBJECT_ID + 1);
        let resources = ResourceIdIndex::create(&mut arena, config.resource_index_max_keys)?;
        let subjects = PredicateIndex::create(
            &mut arena,
            config.predicate_index_max_keys,
            config.related_list_max_keys,
        )?;
        let objects = PredicateIndex::create(
            &mut arena,
            config.predicate_index_max_keys,
            config.related_list_max_keys,
        )?;

        Ok(Self {
            dir: dir.to_path_buf(),
            store_id: new_store_id(dir),
            arena,
            resources,
            subjects,
            objects,
            graphs: GraphIndex::new(),
            prefixes: PrefixManager::new(),
            master,
            read_only: false,
            sync_on_commit: config.sync_on_commit,
        })
    }

    /// Open the store in `dir` at `store_offset`, or at its latest commit point
    pub(crate) fn load(dir: &Path, store_offset: Option<u64>, read_only: bool, sync_on_commit: bool) -> Result<Self> {
        let data = DataFile::open(dir.join(DATA_FILE_NAME))?;
        let mut master = MasterFile::open(dir.join(MASTER_FILE_NAME))?;
        let data_len = data.len()?;

        let (offset, snapshot) = match store_offset {
            Some(offset) => (offset, Self::read_snapshot(&data, offset)?),
            None => {
                // a read-only open never truncates the master file
                let latest = if read_only {
                    master.valid_commit_points(data_len)?.last().copied()
                } else {
                    master.latest_commit_point(data_len)?
                };
                let read = match latest {
                    Some(point) => Self::read_snapshot(&data, point.store_offset())
                        .map(|snapshot| (point.store_offset(), snapshot)),
                    None => Err(StoreError::InvalidFormat(format!(
                        "store {:?} has no valid commit point",
                        dir
                    ))),
                };
                match read {
                    Ok(found) => found,
                    Err(e) => {
                        let (offset, snapshot) = Self::recover_snapshot(dir, &data, e)?;
                        if !read_only {
                            master = MasterFile::rewrite(dir.join(MASTER_FILE_NAME), &CommitPoint::new(offset, 0))?;
                        }
                        (offset, snapshot)
                    }
                }
            }
        };

        let arena = ObjectArena::with_data_file(data, snapshot.locations.clone(), snapshot.next_object_id);
        let store = Self::from_snapshot(dir, arena, snapshot, master, read_only, sync_on_commit)?;
        tracing::info!(
            "Opened store {:?} at offset {}{}",
            dir,
            offset,
            if read_only { " (read-only)" } else { "" }
        );
        Ok(store)
    }

    /// Fall back to the last store record in the data file when the latest
    /// commit point does not lead to one. This is the state left by a crash
    /// between the data file and master file renames of a consolidation.
    fn recover_snapshot(dir: &Path, data: &DataFile, cause: StoreError) -> Result<(u64, StoreSnapshot)> {
        tracing::warn!("Latest commit point of {:?} is unreadable: {}", dir, cause);
        match data.last_store_record()? {
            Some((offset, snapshot)) => {
                tracing::warn!("Recovered store {:?} from the store record at offset {}", dir, offset);
                Ok((offset, snapshot))
            }
            None => Err(cause),
        }
    }

    fn read_snapshot(data: &DataFile, offset: u64) -> Result<StoreSnapshot> {
        let wrap = |source: StoreError| StoreError::StoreRead {
            object_id: STORE_OBJECT_ID,
            offset,
            kind: RecordKind::Store,
            path: data.path().to_path_buf(),
            source: Box::new(source),
        };
        match data.read_record(offset).map_err(wrap)? {
            Record::Store(snapshot) => Ok(snapshot),
            other => Err(wrap(StoreError::Internal(format!(
                "expected a Store record, found {:?} object {}",
                other.kind(),
                other.object_id()
            )))),
        }
    }

    fn from_snapshot(
        dir: &Path,
        arena: ObjectArena,
        snapshot: StoreSnapshot,
        master: MasterFile,
        read_only: bool,
        sync_on_commit: bool,
    ) -> Result<Self> {
        let resources = ResourceIdIndex::open(&arena, snapshot.resource_index_id)?;
        let subjects = PredicateIndex::open(
            &arena,
            snapshot.subject_index_id,
            snapshot.predicate_index_max_keys,
            snapshot.related_list_max_keys,
        )?;
        let objects = PredicateIndex::open(
            &arena,
            snapshot.object_index_id,
            snapshot.predicate_index_max_keys,
            snapshot.related_list_max_keys,
        )?;
        Ok(Self {
            dir: dir.to_path_buf(),
            store_id: snapshot.store_id,
            arena,
            resources,
            subjects,
            objects,
            graphs: snapshot.graphs,
            prefixes: snapshot.prefixes,
            master,
            read_only,
            sync_on_commit,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True if there are changes not yet written to the data file
    pub fn has_changes(&self) -> bool {
        self.arena.has_changes()
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            Err(StoreError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn snapshot(&self, locations: ObjectLocationManager) -> StoreSnapshot {
        StoreSnapshot {
            store_id: self.store_id.clone(),
            next_object_id: self.arena.next_object_id(),
            resource_index_id: self.resources.tree_id(),
            subject_index_id: self.subjects.tree_id(),
            object_index_id: self.objects.tree_id(),
            predicate_index_max_keys: self.subjects.anchor_max_keys(),
            related_list_max_keys: self.subjects.related_max_keys(),
            graphs: self.graphs.clone(),
            prefixes: self.prefixes.clone(),
            locations,
        }
    }

    fn data_file(&self) -> Result<&DataFile> {
        self.arena
            .data_file()
            .ok_or_else(|| StoreError::Internal("store has no data file".into()))
    }

    /// Append every dirty object and then the `Store` record.
    /// Returns the offset of the `Store` record.
    fn write_changes(&mut self) -> Result<u64> {
        let data = self.data_file()?;
        let mut locations = self.arena.locations().clone();
        let mut appender = data.appender()?;

        for &object_id in self.arena.dirty_ids() {
            let record = self.arena.load(object_id)?;
            let offset = appender.position();
            appender.append(&record).map_err(|e| {
                tracing::error!(
                    "Failed to write {:?} object {} at offset {} in {:?}: {}",
                    record.kind(),
                    object_id,
                    offset,
                    data.path(),
                    e
                );
                e
            })?;
            locations.set_offset(object_id, offset, record.kind());
        }

        let written = self.arena.dirty_ids().len();
        let store_record = Record::Store(self.snapshot(locations.clone()));
        let store_offset = appender.append(&store_record).map_err(|e| {
            tracing::error!("Failed to write store record in {:?}: {}", data.path(), e);
            e
        })?;
        appender.finish(self.sync_on_commit).map_err(|e| {
            tracing::error!("Failed to flush {:?}: {}", data.path(), e);
            e
        })?;

        tracing::debug!("Wrote {} objects, store record at {}", written, store_offset);
        self.arena.install_locations(locations);
        Ok(store_offset)
    }

    // === TRIPLE OPERATIONS ===

    fn insert_triple_inner(&mut self, triple: &Triple) -> Result<()> {
        validate_uri(&triple.subject, "subject")?;
        validate_uri(&triple.predicate, "predicate")?;
        validate_uri(&triple.graph, "graph")?;
        if triple.is_literal {
            if let Some(dt) = &triple.data_type {
                validate_uri(dt, "data type")?;
            }
        } else {
            validate_uri(&triple.object, "object")?;
        }

        let subject = self.prefixes.compress(&triple.subject);
        let predicate = self.prefixes.compress(&triple.predicate);
        let s = self.resources.assert_resource(&mut self.arena, Term::Uri(&subject))?;
        let p = self.resources.assert_resource(&mut self.arena, Term::Uri(&predicate))?;
        let o = if triple.is_literal {
            let data_type = self
                .prefixes
                .compress(triple.data_type.as_deref().unwrap_or(PLAIN_LITERAL));
            let lang = triple.lang_code.as_ref().map(|l| l.to_lowercase());
            self.resources.assert_resource(
                &mut self.arena,
                Term::Literal {
                    value: &triple.object,
                    data_type: Some(&data_type),
                    lang: lang.as_deref(),
                },
            )?
        } else {
            let object = self.prefixes.compress(&triple.object);
            self.resources.assert_resource(&mut self.arena, Term::Uri(&object))?
        };
        let g = self.graphs.assert_graph(&triple.graph);

        self.subjects.insert(&mut self.arena, p, s, o, g)?;
        self.objects.insert(&mut self.arena, p, o, s, g)?;
        Ok(())
    }

    /// Ids of a triple's terms, if all of them are known
    fn resolve_triple(&self, triple: &Triple) -> Result<Option<IdTriple>> {
        let Some(subject) = self.resolve_uri(&triple.subject)? else {
            return Ok(None);
        };
        let Some(predicate) = self.resolve_uri(&triple.predicate)? else {
            return Ok(None);
        };
        let object = if triple.is_literal {
            self.resolve_literal(
                &triple.object,
                triple.data_type.as_deref(),
                triple.lang_code.as_deref(),
            )?
        } else {
            self.resolve_uri(&triple.object)?
        };
        let Some(object) = object else {
            return Ok(None);
        };
        let Some(graph) = self.graphs.graph_id(&triple.graph) else {
            return Ok(None);
        };
        Ok(Some(IdTriple {
            subject,
            predicate,
            object,
            graph,
        }))
    }

    pub(crate) fn resolve_uri(&self, uri: &str) -> Result<Option<u64>> {
        let compressed = self.prefixes.try_compress(uri);
        self.resources.get_resource(&self.arena, Term::Uri(&compressed))
    }

    pub(crate) fn resolve_literal(&self, value: &str, data_type: Option<&str>, lang: Option<&str>) -> Result<Option<u64>> {
        let data_type = self.prefixes.try_compress(data_type.unwrap_or(PLAIN_LITERAL));
        let lang = lang.map(str::to_lowercase);
        self.resources.get_resource(
            &self.arena,
            Term::Literal {
                value,
                data_type: Some(&data_type),
                lang: lang.as_deref(),
            },
        )
    }

    fn insert_ids(&mut self, t: IdTriple) -> Result<()> {
        self.subjects.insert(&mut self.arena, t.predicate, t.subject, t.object, t.graph)?;
        self.objects.insert(&mut self.arena, t.predicate, t.object, t.subject, t.graph)?;
        Ok(())
    }

    fn delete_ids(&mut self, t: IdTriple) -> Result<bool> {
        let removed = self.subjects.remove(&mut self.arena, t.predicate, t.subject, t.object, t.graph)?;
        self.objects.remove(&mut self.arena, t.predicate, t.object, t.subject, t.graph)?;
        Ok(removed)
    }

    // === GRAPH OPERATIONS ===

    fn graph_triples(&self, graph_id: u64) -> Result<Vec<IdTriple>> {
        let mut triples = Vec::new();
        self.subjects.visit(&self.arena, |predicate, subject, related| {
            if related.graph_ids.contains(&graph_id) {
                triples.push(IdTriple {
                    subject,
                    predicate,
                    object: related.rid,
                    graph: graph_id,
                });
            }
            Ok(())
        })?;
        Ok(triples)
    }

    fn add_graph_inner(&mut self, source: &str, target: &str) -> Result<usize> {
        validate_uri(target, "graph")?;
        let Some(source_id) = self.graphs.graph_id(source) else {
            return Ok(0);
        };
        let triples = self.graph_triples(source_id)?;
        let target_id = self.graphs.assert_graph(target);
        for triple in &triples {
            self.insert_ids(IdTriple {
                graph: target_id,
                ..*triple
            })?;
        }
        Ok(triples.len())
    }

    fn delete_graph_inner(&mut self, graph: &str) -> Result<usize> {
        let Some(graph_id) = self.graphs.graph_id(graph) else {
            return Ok(0);
        };
        let removed = self.subjects.remove_graph(&mut self.arena, graph_id)?;
        self.objects.remove_graph(&mut self.arena, graph_id)?;
        self.graphs.remove_graph(graph);
        tracing::debug!("Deleted graph {} ({} triples)", graph, removed);
        Ok(removed)
    }

    // === CONSOLIDATION ===

    /// Every object reachable from the current indexes
    fn live_object_ids(&self) -> Result<Vec<u64>> {
        let tree = self.resources.tree();
        let mut ids = vec![tree.id()];
        ids.extend(tree.node_ids(&self.arena)?);
        ids.extend(self.subjects.object_ids(&self.arena)?);
        ids.extend(self.objects.object_ids(&self.arena)?);
        Ok(ids)
    }

    fn consolidate_inner(&mut self, job_id: u128) -> Result<CommitPoint> {
        let data_path = self.dir.join(DATA_FILE_NAME);
        let tmp_path = self.dir.join(CONSOLIDATE_FILE_NAME);
        if tmp_path.exists() {
            tracing::warn!("Removing stale {:?}", tmp_path);
            fs::remove_file(&tmp_path)?;
        }

        let ids = self.live_object_ids()?;
        let fresh = DataFile::create(&tmp_path)?;
        let mut locations = ObjectLocationManager::new();
        let mut appender = fresh.appender()?;
        for &object_id in &ids {
            let record = self.arena.load(object_id)?;
            let offset = appender.append(&record)?;
            locations.set_offset(object_id, offset, record.kind());
        }
        let store_offset = appender.append(&Record::Store(self.snapshot(locations.clone())))?;
        appender.finish(true)?;

        self.arena.release_data_map();
        fs::rename(&tmp_path, &data_path)?;
        // from here on the arena must read the consolidated file
        self.arena.replace_data_file(fresh.relocated(data_path), locations);

        let point = CommitPoint::new(store_offset, job_id);
        self.master = MasterFile::rewrite(self.dir.join(MASTER_FILE_NAME), &point).map_err(|e| {
            tracing::error!(
                "Consolidated {:?} but could not rewrite its master file: {}",
                self.dir,
                e
            );
            e
        })?;

        tracing::info!(
            "Consolidated store {:?}: {} objects, store record at {}",
            self.dir,
            ids.len(),
            store_offset
        );
        Ok(point)
    }
}

impl TripleStore for Store {
    fn insert_triple(&mut self, triple: &Triple) -> Result<()> {
        self.check_writable()?;
        self.insert_triple_inner(triple)
    }

    fn delete_triple(&mut self, triple: &Triple) -> Result<()> {
        self.check_writable()?;
        if let Some(ids) = self.resolve_triple(triple)? {
            self.delete_ids(ids)?;
        }
        Ok(())
    }

    fn match_triples(&self, pattern: &TriplePattern) -> Result<Vec<Triple>> {
        let ids = self.match_ids(pattern)?;
        self.materialize(&ids)
    }

    fn match_all_triples(&self, graphs: Option<&[&str]>) -> Result<Vec<Triple>> {
        let mut pattern = TriplePattern::any();
        if let Some(graphs) = graphs {
            pattern = pattern.graphs(graphs.iter().copied());
        }
        self.match_triples(&pattern)
    }

    fn match_enumeration(&self, pattern: &TriplePattern, order: MatchOrder) -> Result<Vec<IdTriple>> {
        let mut ids = self.match_ids(pattern)?;
        if order == MatchOrder::Ordered {
            ids.sort_unstable();
        }
        Ok(ids)
    }

    fn add_graph(&mut self, source: &str, target: &str) -> Result<()> {
        self.check_writable()?;
        if source != target {
            self.add_graph_inner(source, target)?;
        }
        Ok(())
    }

    fn copy_graph(&mut self, source: &str, target: &str) -> Result<()> {
        self.check_writable()?;
        if source == target {
            return Ok(());
        }
        validate_uri(target, "graph")?;
        self.delete_graph_inner(target)?;
        self.add_graph_inner(source, target)?;
        Ok(())
    }

    fn move_graph(&mut self, source: &str, target: &str) -> Result<()> {
        self.check_writable()?;
        if source == target {
            return Ok(());
        }
        validate_uri(target, "graph")?;
        self.delete_graph_inner(target)?;
        self.add_graph_inner(source, target)?;
        self.delete_graph_inner(source)?;
        Ok(())
    }

    fn delete_graph(&mut self, graph: &str) -> Result<()> {
        self.check_writable()?;
        self.delete_graph_inner(graph)?;
        Ok(())
    }

    fn delete_graphs(&mut self, graphs: &[&str]) -> Result<()> {
        self.check_writable()?;
        for graph in graphs {
            self.delete_graph_inner(graph)?;
        }
        Ok(())
    }

    fn graph_uris(&self) -> Vec<String> {
        self.graphs.uris().map(str::to_string).collect()
    }

    fn commit(&mut self, job_id: u128) -> Result<CommitPoint> {
        self.check_writable()?;
        let store_offset = self.write_changes()?;
        let point = CommitPoint::new(store_offset, job_id);
        self.master.append(&point, self.sync_on_commit).map_err(|e| {
            tracing::error!("Failed to append commit point to {:?}: {}", self.master.path(), e);
            e
        })?;
        tracing::info!("Committed job {} at offset {}", job_id, store_offset);
        Ok(point)
    }

    fn flush_changes(&mut self) -> Result<()> {
        self.check_writable()?;
        self.write_changes()?;
        Ok(())
    }

    fn commit_points(&self) -> Result<Vec<CommitPoint>> {
        self.master.commit_points(self.data_file()?.len()?)
    }

    fn revert_to_commit_point(&mut self, point: &CommitPoint) -> Result<()> {
        self.check_writable()?;
        let known = self
            .commit_points()?
            .iter()
            .any(|p| p.store_offset() == point.store_offset());
        if !known {
            return Err(StoreError::InvalidCommitPoint {
                position: point.store_offset(),
                reason: "not a commit point of this store".into(),
            });
        }

        let data = DataFile::open(self.dir.join(DATA_FILE_NAME))?;
        let snapshot = Self::read_snapshot(&data, point.store_offset())?;
        let arena = ObjectArena::with_data_file(data, snapshot.locations.clone(), snapshot.next_object_id);
        let master = MasterFile::open(self.dir.join(MASTER_FILE_NAME))?;
        let reverted = Self::from_snapshot(&self.dir, arena, snapshot, master, false, self.sync_on_commit)?;

        let new_point = CommitPoint::new(point.store_offset(), point.job_id());
        reverted.master.append(&new_point, self.sync_on_commit)?;
        *self = reverted;
        tracing::info!("Reverted store {:?} to offset {}", self.dir, point.store_offset());
        Ok(())
    }

    fn consolidate(&mut self, job_id: u128) -> Result<CommitPoint> {
        self.check_writable()?;
        self.consolidate_inner(job_id)
    }
}
