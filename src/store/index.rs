//! Predicate indexes and related-resource lists
//!
//! A predicate index maps `predicate -> anchor tree`, and each anchor tree
//! maps `anchor -> related-resource list`. The subject index anchors on the
//! subject and lists objects; the object index anchors on the object and
//! lists subjects. Both values are stored as `ObjectRef`s: the object id of
//! the nested tree's header.

use std::collections::BTreeSet;

use crate::btree::{ObjectArena, PersistentBTree};
use crate::error::{Result, StoreError};
use crate::storage::varint::{encode_varint, ByteReader};

/// Object id stored as a B-tree value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u64);

impl ObjectRef {
    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.0, buf);
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(ObjectRef(reader.varint()?))
    }
}

/// One endpoint of an edge, tagged with every graph the edge appears in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedResource {
    pub rid: u64,
    pub graph_ids: BTreeSet<u64>,
}

impl RelatedResource {
    pub fn new(rid: u64, graph_id: u64) -> Self {
        Self {
            rid,
            graph_ids: BTreeSet::from([graph_id]),
        }
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.rid, buf);
        encode_varint(self.graph_ids.len() as u64, buf);
        for &graph_id in &self.graph_ids {
            encode_varint(graph_id, buf);
        }
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let rid = reader.varint()?;
        let count = reader.varint()? as usize;
        let mut graph_ids = BTreeSet::new();
        for _ in 0..count {
            graph_ids.insert(reader.varint()?);
        }
        if graph_ids.len() != count {
            return Err(StoreError::InvalidFormat(format!(
                "related resource {} repeats a graph id",
                rid
            )));
        }
        Ok(Self { rid, graph_ids })
    }
}

/// Per-(predicate, anchor) ordered set of related resources, keyed by Rid
pub type RelatedResourceList = PersistentBTree<RelatedResource>;

/// Anchor tree: anchor Rid -> related-resource list header
pub type AnchorTree = PersistentBTree<ObjectRef>;

/// B-tree of B-trees realizing one direction of the triple index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredicateIndex {
    tree: PersistentBTree<ObjectRef>,
    anchor_max_keys: usize,
    related_max_keys: usize,
}

impl PredicateIndex {
    pub fn create(arena: &mut ObjectArena, anchor_max_keys: usize, related_max_keys: usize) -> Result<Self> {
        Ok(Self {
            tree: PersistentBTree::create(arena, anchor_max_keys)?,
            anchor_max_keys,
            related_max_keys,
        })
    }

    pub fn open(arena: &ObjectArena, tree_id: u64, anchor_max_keys: usize, related_max_keys: usize) -> Result<Self> {
        Ok(Self {
            tree: PersistentBTree::open(arena, tree_id)?,
            anchor_max_keys,
            related_max_keys,
        })
    }

    pub fn tree_id(&self) -> u64 {
        self.tree.id()
    }

    pub fn anchor_max_keys(&self) -> usize {
        self.anchor_max_keys
    }

    pub fn related_max_keys(&self) -> usize {
        self.related_max_keys
    }

    /// Add `graph_id` to the edge `predicate/anchor -> related`.
    /// Returns false if the edge was already in that graph.
    pub fn insert(
        &mut self,
        arena: &mut ObjectArena,
        predicate: u64,
        anchor: u64,
        related: u64,
        graph_id: u64,
    ) -> Result<bool> {
        let mut anchors = match self.anchor_tree(arena, predicate)? {
            Some(tree) => tree,
            None => {
                let tree = AnchorTree::create(arena, self.anchor_max_keys)?;
                self.tree.insert(arena, predicate, ObjectRef(tree.id()))?;
                tree
            }
        };

        let mut list = match anchors.lookup(arena, anchor)? {
            Some(ObjectRef(list_id)) => RelatedResourceList::open(arena, list_id)?,
            None => {
                let list = RelatedResourceList::create(arena, self.related_max_keys)?;
                anchors.insert(arena, anchor, ObjectRef(list.id()))?;
                list
            }
        };

        match list.lookup(arena, related)? {
            Some(mut resource) => {
                if !resource.graph_ids.insert(graph_id) {
                    return Ok(false);
                }
                list.update(arena, related, resource)?;
            }
            None => list.insert(arena, related, RelatedResource::new(related, graph_id))?,
        }
        Ok(true)
    }

    /// Remove `graph_id` from the edge `predicate/anchor -> related`,
    /// dropping the entry, list and anchor tree as each becomes empty.
    /// Returns false if the edge was not in that graph.
    pub fn remove(
        &mut self,
        arena: &mut ObjectArena,
        predicate: u64,
        anchor: u64,
        related: u64,
        graph_id: u64,
    ) -> Result<bool> {
        let Some(mut anchors) = self.anchor_tree(arena, predicate)? else {
            return Ok(false);
        };
        let Some(ObjectRef(list_id)) = anchors.lookup(arena, anchor)? else {
            return Ok(false);
        };
        let mut list = RelatedResourceList::open(arena, list_id)?;
        let Some(mut resource) = list.lookup(arena, related)? else {
            return Ok(false);
        };
        if !resource.graph_ids.remove(&graph_id) {
            return Ok(false);
        }

        if !resource.graph_ids.is_empty() {
            list.update(arena, related, resource)?;
            return Ok(true);
        }

        list.delete(arena, related)?;
        if list.is_empty(arena)? {
            anchors.delete(arena, anchor)?;
            list.destroy(arena)?;
            if anchors.is_empty(arena)? {
                self.tree.delete(arena, predicate)?;
                anchors.destroy(arena)?;
            }
        }
        Ok(true)
    }

    /// Anchor tree for `predicate`, if any edge uses it
    pub fn anchor_tree(&self, arena: &ObjectArena, predicate: u64) -> Result<Option<AnchorTree>> {
        match self.tree.lookup(arena, predicate)? {
            Some(ObjectRef(tree_id)) => Ok(Some(AnchorTree::open(arena, tree_id)?)),
            None => Ok(None),
        }
    }

    /// Related-resource list for `(predicate, anchor)`
    pub fn related_list(
        &self,
        arena: &ObjectArena,
        predicate: u64,
        anchor: u64,
    ) -> Result<Option<RelatedResourceList>> {
        let Some(anchors) = self.anchor_tree(arena, predicate)? else {
            return Ok(None);
        };
        match anchors.lookup(arena, anchor)? {
            Some(ObjectRef(list_id)) => Ok(Some(RelatedResourceList::open(arena, list_id)?)),
            None => Ok(None),
        }
    }

    /// Predicates in ascending Rid order with their anchor trees
    pub fn predicates(&self, arena: &ObjectArena) -> Result<Vec<(u64, AnchorTree)>> {
        let mut predicates = Vec::new();
        for entry in self.tree.iter(arena) {
            let entry = entry?;
            predicates.push((entry.key, AnchorTree::open(arena, entry.value.0)?));
        }
        Ok(predicates)
    }

    /// Call `f(predicate, anchor, related)` for every edge, in index order
    pub fn visit<F>(&self, arena: &ObjectArena, mut f: F) -> Result<()>
    where
        F: FnMut(u64, u64, &RelatedResource) -> Result<()>,
    {
        for (predicate, anchors) in self.predicates(arena)? {
            for anchor in anchors.iter(arena) {
                let anchor = anchor?;
                let list = RelatedResourceList::open(arena, anchor.value.0)?;
                for related in list.iter(arena) {
                    f(predicate, anchor.key, &related?.value)?;
                }
            }
        }
        Ok(())
    }

    /// Remove `graph_id` from every edge. Returns the number of edges touched.
    pub fn remove_graph(&mut self, arena: &mut ObjectArena, graph_id: u64) -> Result<usize> {
        let mut edges = Vec::new();
        self.visit(arena, |predicate, anchor, related| {
            if related.graph_ids.contains(&graph_id) {
                edges.push((predicate, anchor, related.rid));
            }
            Ok(())
        })?;
        for &(predicate, anchor, related) in &edges {
            self.remove(arena, predicate, anchor, related, graph_id)?;
        }
        Ok(edges.len())
    }

    /// Every object id reachable from this index, headers before their nodes
    pub fn object_ids(&self, arena: &ObjectArena) -> Result<Vec<u64>> {
        let mut ids = vec![self.tree.id()];
        ids.extend(self.tree.node_ids(arena)?);
        for (_, anchors) in self.predicates(arena)? {
            ids.push(anchors.id());
            ids.extend(anchors.node_ids(arena)?);
            for anchor in anchors.iter(arena) {
                let list = RelatedResourceList::open(arena, anchor?.value.0)?;
                ids.push(list.id());
                ids.extend(list.node_ids(arena)?);
            }
        }
        Ok(ids)
    }
}
