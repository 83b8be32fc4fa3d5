//! Persistent B-tree keyed by `u64`
//!
//! Every index in the store is one of these trees. Nodes live in the object
//! arena and reference each other by object id only; a mutation clones the
//! node out of the arena, edits it and puts it back, which registers it as
//! dirty for the next commit. Nothing already written to the data file is
//! ever modified.
//!
//! ## Structure
//!
//! - `node.rs`: nodes, entries and their binary layout
//! - `arena.rs`: id allocation, object cache and dirty list

pub mod arena;
pub mod node;

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

pub use arena::ObjectArena;
pub use node::{Entry, Node};

use crate::error::{Result, StoreError};
use crate::storage::record::{Record, RecordKind};
use crate::storage::varint::{encode_varint, ByteReader};

/// Smallest node capacity that still allows a split into two non-empty halves
pub const MIN_MAX_KEYS: usize = 3;

/// A value that can be stored in a persistent B-tree.
///
/// Each value type maps onto its own node and tree record variants, which
/// keeps the set of persisted record kinds closed.
pub trait NodeValue: Clone + fmt::Debug + PartialEq + Sized {
    const NODE_KIND: RecordKind;

    fn save(&self, buf: &mut Vec<u8>);
    fn load(reader: &mut ByteReader<'_>) -> Result<Self>;

    fn wrap_node(node: Node<Self>) -> Record;
    fn as_node(record: &Record) -> Option<&Node<Self>>;
    fn wrap_tree(tree: PersistentBTree<Self>) -> Record;
    fn as_tree(record: &Record) -> Option<&PersistentBTree<Self>>;

    fn expect_node(record: &Record) -> Result<&Node<Self>> {
        Self::as_node(record).ok_or_else(|| {
            StoreError::Internal(format!(
                "object {} is {:?}, expected {:?}",
                record.object_id(),
                record.kind(),
                Self::NODE_KIND
            ))
        })
    }
}

/// Header of a persistent B-tree: its own object id, root node and capacity.
pub struct PersistentBTree<T> {
    id: u64,
    root_id: u64,
    max_keys: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PersistentBTree<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PersistentBTree<T> {}

impl<T> fmt::Debug for PersistentBTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentBTree")
            .field("id", &self.id)
            .field("root_id", &self.root_id)
            .field("max_keys", &self.max_keys)
            .finish()
    }
}

impl<T> PartialEq for PersistentBTree<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.root_id == other.root_id && self.max_keys == other.max_keys
    }
}

impl<T> Eq for PersistentBTree<T> {}

impl<T> PersistentBTree<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Fewest keys a non-root node may hold: `(max_keys - 1) / 2`.
    ///
    /// A node that reaches `max_keys` keys splits around its median, and
    /// the smaller half keeps exactly this many. Deletion borrows or
    /// merges whenever a node would drop below it.
    pub fn min_keys(&self) -> usize {
        (self.max_keys - 1) / 2
    }

    pub fn save(&self, buf: &mut Vec<u8>) {
        encode_varint(self.id, buf);
        encode_varint(self.root_id, buf);
        encode_varint(self.max_keys as u64, buf);
    }

    pub fn load(reader: &mut ByteReader<'_>) -> Result<Self> {
        let id = reader.varint()?;
        let root_id = reader.varint()?;
        let max_keys = reader.varint()? as usize;
        if max_keys < MIN_MAX_KEYS {
            return Err(StoreError::InvalidFormat(format!(
                "tree {} has max_keys {}",
                id, max_keys
            )));
        }
        Ok(Self {
            id,
            root_id,
            max_keys,
            _marker: PhantomData,
        })
    }
}

impl<T: NodeValue> PersistentBTree<T> {
    /// Allocate an empty tree (header + empty root leaf)
    pub fn create(arena: &mut ObjectArena, max_keys: usize) -> Result<Self> {
        if max_keys < MIN_MAX_KEYS {
            return Err(StoreError::Internal(format!(
                "B-tree max_keys must be at least {}, got {}",
                MIN_MAX_KEYS, max_keys
            )));
        }
        let id = arena.allocate_id();
        let root_id = arena.allocate_id();
        arena.put(T::wrap_node(Node::new_leaf(root_id, None)));
        let tree = Self {
            id,
            root_id,
            max_keys,
            _marker: PhantomData,
        };
        arena.put(T::wrap_tree(tree));
        Ok(tree)
    }

    /// Load a tree header by its object id
    pub fn open(arena: &ObjectArena, id: u64) -> Result<Self> {
        let record = arena.load(id)?;
        T::as_tree(&record).copied().ok_or_else(|| {
            StoreError::Internal(format!(
                "object {} is {:?}, expected a tree of {:?}",
                id,
                record.kind(),
                T::NODE_KIND
            ))
        })
    }

    fn load_node(&self, arena: &ObjectArena, node_id: u64) -> Result<Rc<Record>> {
        let record = arena.load(node_id)?;
        T::expect_node(&record)?;
        Ok(record)
    }

    fn clone_node(&self, arena: &ObjectArena, node_id: u64) -> Result<Node<T>> {
        let record = arena.load(node_id)?;
        Ok(T::expect_node(&record)?.clone())
    }

    fn save_header(&self, arena: &mut ObjectArena) {
        arena.put(T::wrap_tree(*self));
    }

    fn set_parent(&self, arena: &mut ObjectArena, node_id: u64, parent_id: Option<u64>) -> Result<()> {
        let mut node = self.clone_node(arena, node_id)?;
        if node.parent_id != parent_id {
            node.parent_id = parent_id;
            arena.put(T::wrap_node(node));
        }
        Ok(())
    }

    pub fn lookup(&self, arena: &ObjectArena, key: u64) -> Result<Option<T>> {
        let mut node_id = self.root_id;
        loop {
            let record = self.load_node(arena, node_id)?;
            let node = T::expect_node(&record)?;
            match node.search(key) {
                Ok(pos) => return Ok(Some(node.keys[pos].value.clone())),
                Err(pos) => {
                    if node.is_leaf() {
                        return Ok(None);
                    }
                    node_id = node.children[pos];
                }
            }
        }
    }

    pub fn contains(&self, arena: &ObjectArena, key: u64) -> Result<bool> {
        Ok(self.lookup(arena, key)?.is_some())
    }

    pub fn is_empty(&self, arena: &ObjectArena) -> Result<bool> {
        let record = self.load_node(arena, self.root_id)?;
        Ok(T::expect_node(&record)?.keys.is_empty())
    }

    pub fn len(&self, arena: &ObjectArena) -> Result<usize> {
        let mut count = 0;
        for entry in self.iter(arena) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Insert a new key. Fails with `DuplicateKey` if the key is present.
    pub fn insert(&mut self, arena: &mut ObjectArena, key: u64, value: T) -> Result<()> {
        let mut node_id = self.root_id;
        let mut leaf = loop {
            let record = self.load_node(arena, node_id)?;
            let node = T::expect_node(&record)?;
            match node.search(key) {
                Ok(_) => return Err(StoreError::DuplicateKey { tree: self.id, key }),
                Err(pos) => {
                    if node.is_leaf() {
                        break node.clone();
                    }
                    node_id = node.children[pos];
                }
            }
        };

        let pos = leaf.search(key).unwrap_or_else(|pos| pos);
        leaf.keys.insert(pos, Entry::new(key, value));
        self.split_upward(arena, leaf)
    }

    /// Split full nodes from `node` towards the root
    fn split_upward(&mut self, arena: &mut ObjectArena, mut node: Node<T>) -> Result<()> {
        while node.keys.len() >= self.max_keys {
            let mid = node.keys.len() / 2;
            let right_id = arena.allocate_id();

            let right_keys = node.keys.split_off(mid + 1);
            let median = node.keys.pop().ok_or_else(|| {
                StoreError::Internal(format!("split of node {} found no median", node.id))
            })?;
            let right_children = if node.is_leaf() {
                Vec::new()
            } else {
                node.children.split_off(mid + 1)
            };
            for &child in &right_children {
                self.set_parent(arena, child, Some(right_id))?;
            }

            let mut parent = match node.parent_id {
                Some(parent_id) => self.clone_node(arena, parent_id)?,
                None => {
                    let root_id = arena.allocate_id();
                    let mut root = Node::new_leaf(root_id, None);
                    root.children.push(node.id);
                    node.parent_id = Some(root_id);
                    self.root_id = root_id;
                    self.save_header(arena);
                    root
                }
            };

            let pos = parent.child_position(node.id).ok_or_else(|| {
                StoreError::Internal(format!(
                    "node {} missing from parent {}",
                    node.id, parent.id
                ))
            })?;
            parent.keys.insert(pos, median);
            parent.children.insert(pos + 1, right_id);

            let right = Node {
                id: right_id,
                parent_id: Some(parent.id),
                keys: right_keys,
                children: right_children,
            };
            arena.put(T::wrap_node(node));
            arena.put(T::wrap_node(right));
            node = parent;
        }
        arena.put(T::wrap_node(node));
        Ok(())
    }

    /// Replace the value stored under an existing key
    pub fn update(&self, arena: &mut ObjectArena, key: u64, value: T) -> Result<()> {
        let mut node_id = self.root_id;
        loop {
            let record = self.load_node(arena, node_id)?;
            let node = T::expect_node(&record)?;
            match node.search(key) {
                Ok(pos) => {
                    let mut node = node.clone();
                    node.keys[pos].value = value;
                    arena.put(T::wrap_node(node));
                    return Ok(());
                }
                Err(pos) => {
                    if node.is_leaf() {
                        return Err(StoreError::MissingKey { tree: self.id, key });
                    }
                    node_id = node.children[pos];
                }
            }
        }
    }

    /// Remove a key and return its value. Fails with `MissingKey` if absent.
    pub fn delete(&mut self, arena: &mut ObjectArena, key: u64) -> Result<T> {
        let mut node_id = self.root_id;
        let (mut node, pos) = loop {
            let record = self.load_node(arena, node_id)?;
            let node = T::expect_node(&record)?;
            match node.search(key) {
                Ok(pos) => break (node.clone(), pos),
                Err(pos) => {
                    if node.is_leaf() {
                        return Err(StoreError::MissingKey { tree: self.id, key });
                    }
                    node_id = node.children[pos];
                }
            }
        };

        if node.is_leaf() {
            let removed = node.keys.remove(pos).value;
            self.rebalance(arena, node)?;
            return Ok(removed);
        }

        // Internal node: pull up the smallest key of the right subtree
        let mut successor_id = node.children[pos + 1];
        let mut leaf = loop {
            let candidate = self.clone_node(arena, successor_id)?;
            if candidate.is_leaf() {
                break candidate;
            }
            successor_id = candidate.children[0];
        };
        if leaf.keys.is_empty() {
            return Err(StoreError::Internal(format!(
                "empty leaf {} under internal node {}",
                leaf.id, node.id
            )));
        }
        let successor = leaf.keys.remove(0);
        let removed = std::mem::replace(&mut node.keys[pos], successor).value;
        arena.put(T::wrap_node(node));
        self.rebalance(arena, leaf)?;
        Ok(removed)
    }

    /// Restore the minimum-fill invariant after a removal from `node`
    fn rebalance(&mut self, arena: &mut ObjectArena, mut node: Node<T>) -> Result<()> {
        let min_keys = self.min_keys();
        loop {
            let Some(parent_id) = node.parent_id else {
                if node.keys.is_empty() && !node.is_leaf() {
                    let child_id = node.children[0];
                    self.set_parent(arena, child_id, None)?;
                    arena.release(node.id);
                    self.root_id = child_id;
                    self.save_header(arena);
                } else {
                    arena.put(T::wrap_node(node));
                }
                return Ok(());
            };

            if node.keys.len() >= min_keys {
                arena.put(T::wrap_node(node));
                return Ok(());
            }

            let mut parent = self.clone_node(arena, parent_id)?;
            let pos = parent.child_position(node.id).ok_or_else(|| {
                StoreError::Internal(format!(
                    "node {} missing from parent {}",
                    node.id, parent.id
                ))
            })?;

            // Borrow from the left sibling
            if pos > 0 {
                let mut left = self.clone_node(arena, parent.children[pos - 1])?;
                if left.keys.len() > min_keys {
                    if let Some(borrowed) = left.keys.pop() {
                        let separator = std::mem::replace(&mut parent.keys[pos - 1], borrowed);
                        node.keys.insert(0, separator);
                        if let Some(child) = left.children.pop() {
                            self.set_parent(arena, child, Some(node.id))?;
                            node.children.insert(0, child);
                        }
                        arena.put(T::wrap_node(left));
                        arena.put(T::wrap_node(node));
                        arena.put(T::wrap_node(parent));
                        return Ok(());
                    }
                }
            }

            // Borrow from the right sibling
            if pos + 1 < parent.children.len() {
                let mut right = self.clone_node(arena, parent.children[pos + 1])?;
                if right.keys.len() > min_keys {
                    let borrowed = right.keys.remove(0);
                    let separator = std::mem::replace(&mut parent.keys[pos], borrowed);
                    node.keys.push(separator);
                    if !right.is_leaf() {
                        let child = right.children.remove(0);
                        self.set_parent(arena, child, Some(node.id))?;
                        node.children.push(child);
                    }
                    arena.put(T::wrap_node(right));
                    arena.put(T::wrap_node(node));
                    arena.put(T::wrap_node(parent));
                    return Ok(());
                }
            }

            // Merge with a sibling, absorbing the separator
            let (mut left, right, separator_pos) = if pos > 0 {
                (self.clone_node(arena, parent.children[pos - 1])?, node, pos - 1)
            } else if pos + 1 < parent.children.len() {
                (node, self.clone_node(arena, parent.children[pos + 1])?, pos)
            } else {
                return Err(StoreError::Internal(format!(
                    "node {} has no siblings under parent {}",
                    node.id, parent.id
                )));
            };

            let separator = parent.keys.remove(separator_pos);
            parent.children.remove(separator_pos + 1);
            left.keys.push(separator);
            left.keys.extend(right.keys);
            for &child in &right.children {
                self.set_parent(arena, child, Some(left.id))?;
            }
            left.children.extend(right.children);
            arena.release(right.id);
            arena.put(T::wrap_node(left));

            node = parent;
        }
    }

    /// Entries in ascending key order
    pub fn iter<'a>(&self, arena: &'a ObjectArena) -> Iter<'a, T> {
        Iter {
            arena,
            start: Some(self.root_id),
            stack: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn entries(&self, arena: &ObjectArena) -> Result<Vec<Entry<T>>> {
        self.iter(arena).collect()
    }

    /// Ids of every node in the tree, parents before children
    pub fn node_ids(&self, arena: &ObjectArena) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        let mut pending = vec![self.root_id];
        while let Some(node_id) = pending.pop() {
            let record = self.load_node(arena, node_id)?;
            let node = T::expect_node(&record)?;
            ids.push(node_id);
            pending.extend(node.children.iter().rev().copied());
        }
        Ok(ids)
    }

    /// Release every node and the header
    pub fn destroy(self, arena: &mut ObjectArena) -> Result<()> {
        for node_id in self.node_ids(arena)? {
            arena.release(node_id);
        }
        arena.release(self.id);
        Ok(())
    }
}

/// In-order iterator over a tree's entries
pub struct Iter<'a, T> {
    arena: &'a ObjectArena,
    start: Option<u64>,
    stack: Vec<(Rc<Record>, usize)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: NodeValue> Iter<'_, T> {
    fn descend_leftmost(&mut self, mut node_id: u64) -> Result<()> {
        loop {
            let record = self.arena.load(node_id)?;
            let first_child = T::expect_node(&record)?.children.first().copied();
            self.stack.push((record, 0));
            match first_child {
                Some(child) => node_id = child,
                None => return Ok(()),
            }
        }
    }
}

impl<T: NodeValue> Iterator for Iter<'_, T> {
    type Item = Result<Entry<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.start.take() {
            if let Err(e) = self.descend_leftmost(root) {
                self.stack.clear();
                return Some(Err(e));
            }
        }

        loop {
            let (record, index) = self.stack.last_mut()?;
            let node = match T::expect_node(&**record) {
                Ok(node) => node,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };
            if *index >= node.keys.len() {
                self.stack.pop();
                continue;
            }

            let entry = node.keys[*index].clone();
            *index += 1;
            let next_child = node.children.get(*index).copied();
            if let Some(child) = next_child {
                if let Err(e) = self.descend_leftmost(child) {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
            return Some(Ok(entry));
        }
    }
}

#[cfg(test)]
impl<T: NodeValue> PersistentBTree<T> {
    /// Walk the whole tree checking ordering, fill and parent links.
    /// Returns the number of keys.
    pub(crate) fn check_invariants(&self, arena: &ObjectArena) -> Result<usize> {
        let mut leaf_depth = None;
        self.check_node(arena, self.root_id, None, 0, None, None, &mut leaf_depth)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        arena: &ObjectArena,
        node_id: u64,
        parent_id: Option<u64>,
        depth: usize,
        lower: Option<u64>,
        upper: Option<u64>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<usize> {
        let node = self.clone_node(arena, node_id)?;
        let fail = |msg: String| Err(StoreError::Internal(format!("node {}: {}", node_id, msg)));

        if node.parent_id != parent_id {
            return fail(format!("parent {:?}, expected {:?}", node.parent_id, parent_id));
        }
        if parent_id.is_some() && node.keys.len() < self.min_keys() {
            return fail(format!("{} keys below minimum {}", node.keys.len(), self.min_keys()));
        }
        if node.keys.len() >= self.max_keys {
            return fail(format!("{} keys, capacity {}", node.keys.len(), self.max_keys));
        }
        for pair in node.keys.windows(2) {
            if pair[0].key >= pair[1].key {
                return fail("keys not strictly ascending".into());
            }
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first.key <= lo {
                return fail("key below subtree bound".into());
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last.key >= hi {
                return fail("key above subtree bound".into());
            }
        }

        if node.is_leaf() {
            match *leaf_depth {
                Some(d) if d != depth => return fail("leaves at different depths".into()),
                _ => *leaf_depth = Some(depth),
            }
            return Ok(node.keys.len());
        }

        if node.children.len() != node.keys.len() + 1 {
            return fail("children count does not match keys".into());
        }
        let mut total = node.keys.len();
        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(node.keys[i - 1].key) };
            let hi = node.keys.get(i).map(|e| e.key).or(upper);
            total += self.check_node(arena, child, Some(node_id), depth + 1, lo, hi, leaf_depth)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::index::ObjectRef;
    use std::collections::BTreeSet;

    fn make_tree(max_keys: usize) -> (ObjectArena, PersistentBTree<ObjectRef>) {
        let mut arena = ObjectArena::in_memory();
        let tree = PersistentBTree::create(&mut arena, max_keys).unwrap();
        (arena, tree)
    }

    fn keys(tree: &PersistentBTree<ObjectRef>, arena: &ObjectArena) -> Vec<u64> {
        tree.iter(arena).map(|e| e.unwrap().key).collect()
    }

    #[test]
    fn test_insert_and_lookup() {
        let (mut arena, mut tree) = make_tree(5);
        for key in [50, 10, 40, 20, 30, 60, 70, 5, 15] {
            tree.insert(&mut arena, key, ObjectRef(key * 10)).unwrap();
        }
        assert_eq!(tree.lookup(&arena, 40).unwrap(), Some(ObjectRef(400)));
        assert_eq!(tree.lookup(&arena, 41).unwrap(), None);
        assert_eq!(keys(&tree, &arena), vec![5, 10, 15, 20, 30, 40, 50, 60, 70]);
        assert_eq!(tree.check_invariants(&arena).unwrap(), 9);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let (mut arena, mut tree) = make_tree(5);
        tree.insert(&mut arena, 1, ObjectRef(1)).unwrap();
        let err = tree.insert(&mut arena, 1, ObjectRef(2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { key: 1, .. }));
        assert_eq!(tree.lookup(&arena, 1).unwrap(), Some(ObjectRef(1)));
    }

    #[test]
    fn test_root_split_updates_header() {
        let (mut arena, mut tree) = make_tree(3);
        let original_root = tree.root_id();
        for key in 1..=3 {
            tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
        }
        assert_ne!(tree.root_id(), original_root);

        let reopened = PersistentBTree::<ObjectRef>::open(&arena, tree.id()).unwrap();
        assert_eq!(reopened, tree);
        assert_eq!(reopened.check_invariants(&arena).unwrap(), 3);
    }

    #[test]
    fn test_update_value() {
        let (mut arena, mut tree) = make_tree(3);
        for key in 1..=20 {
            tree.insert(&mut arena, key, ObjectRef(0)).unwrap();
        }
        tree.update(&mut arena, 13, ObjectRef(99)).unwrap();
        assert_eq!(tree.lookup(&arena, 13).unwrap(), Some(ObjectRef(99)));
        assert!(matches!(
            tree.update(&mut arena, 21, ObjectRef(1)),
            Err(StoreError::MissingKey { key: 21, .. })
        ));
    }

    #[test]
    fn test_delete_from_leaf_and_internal() {
        let (mut arena, mut tree) = make_tree(3);
        for key in 1..=30 {
            tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
        }

        let root_record = arena.load(tree.root_id()).unwrap();
        let root_key = ObjectRef::expect_node(&root_record).unwrap().keys[0].key;
        assert_eq!(tree.delete(&mut arena, root_key).unwrap(), ObjectRef(root_key));
        assert_eq!(tree.delete(&mut arena, 1).unwrap(), ObjectRef(1));
        assert_eq!(tree.check_invariants(&arena).unwrap(), 28);
        assert_eq!(tree.lookup(&arena, root_key).unwrap(), None);

        assert!(matches!(
            tree.delete(&mut arena, 1),
            Err(StoreError::MissingKey { key: 1, .. })
        ));
    }

    #[test]
    fn test_delete_everything_collapses_root() {
        let (mut arena, mut tree) = make_tree(3);
        for key in 0..100 {
            tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
        }
        for key in (0..100).rev() {
            tree.delete(&mut arena, key).unwrap();
            tree.check_invariants(&arena).unwrap();
        }
        assert!(tree.is_empty(&arena).unwrap());
        assert_eq!(tree.node_ids(&arena).unwrap(), vec![tree.root_id()]);
    }

    #[test]
    fn test_even_max_keys() {
        let (mut arena, mut tree) = make_tree(4);
        for key in (0..200).map(|k| (k * 37) % 211) {
            tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
        }
        assert_eq!(tree.check_invariants(&arena).unwrap(), 200);
        for key in (0..200).filter(|k| k % 3 == 0).map(|k| (k * 37) % 211) {
            tree.delete(&mut arena, key).unwrap();
        }
        tree.check_invariants(&arena).unwrap();
    }

    #[test]
    fn test_touched_nodes_dirty_once() {
        let (mut arena, mut tree) = make_tree(3);
        for key in 0..50 {
            tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
        }
        let dirty = arena.dirty_ids().to_vec();
        let unique: BTreeSet<_> = dirty.iter().copied().collect();
        assert_eq!(unique.len(), dirty.len());

        let live: BTreeSet<_> = tree.node_ids(&arena).unwrap().into_iter().collect();
        assert!(live.is_subset(&unique));
        assert!(unique.contains(&tree.id()));
    }

    #[test]
    fn test_first_split_leaves_min_keys() {
        for max_keys in 3..10 {
            let (mut arena, mut tree) = make_tree(max_keys);
            for key in 0..max_keys as u64 {
                tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
            }
            let root = arena.load(tree.root_id()).unwrap();
            let root = ObjectRef::as_node(&root).unwrap();
            assert_eq!(root.keys.len(), 1);
            let smallest = root
                .children
                .iter()
                .map(|&id| ObjectRef::as_node(&arena.load(id).unwrap()).unwrap().keys.len())
                .min()
                .unwrap();
            assert_eq!(smallest, tree.min_keys(), "max_keys {}", max_keys);
            assert_eq!(tree.min_keys(), (max_keys - 1) / 2);
        }
    }

    #[test]
    fn test_destroy_releases_all_objects() {
        let (mut arena, mut tree) = make_tree(3);
        for key in 0..40 {
            tree.insert(&mut arena, key, ObjectRef(key)).unwrap();
        }
        tree.destroy(&mut arena).unwrap();
        assert!(arena.dirty_ids().is_empty());
        assert_eq!(arena.cached_objects(), 0);
    }

    mod proptest_btree {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any mix of inserts and deletes keeps the tree balanced and sorted.
            #[test]
            fn prop_invariants_hold(
                max_keys in 3usize..9,
                inserts in proptest::collection::btree_set(0u64..2_000, 1..300),
                delete_indices in proptest::collection::vec(any::<prop::sample::Index>(), 0..200),
            ) {
                let (mut arena, mut tree) = make_tree(max_keys);
                let inserted: Vec<u64> = inserts.iter().copied().collect();
                for &key in &inserted {
                    tree.insert(&mut arena, key, ObjectRef(key + 1)).unwrap();
                }

                let mut live: BTreeSet<u64> = inserts.clone();
                for idx in &delete_indices {
                    let key = inserted[idx.index(inserted.len())];
                    if live.remove(&key) {
                        prop_assert_eq!(tree.delete(&mut arena, key).unwrap(), ObjectRef(key + 1));
                    } else {
                        prop_assert!(tree.delete(&mut arena, key).is_err());
                    }
                }

                prop_assert_eq!(tree.check_invariants(&arena).unwrap(), live.len());
                prop_assert_eq!(keys(&tree, &arena), live.iter().copied().collect::<Vec<_>>());
                for key in &inserted {
                    prop_assert_eq!(tree.contains(&arena, *key).unwrap(), live.contains(key));
                }
            }
        }
    }
}
