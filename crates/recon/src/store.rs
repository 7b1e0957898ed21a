//! Dual-keyed record store: a flat primary-key map plus a [`SearchTree`]
//! over each record's index path. Both structures are always written and
//! removed together.

use std::collections::HashMap;

use crate::error::ReconError;
use crate::trie::SearchTree;

/// Anything that can live in a [`DualKeyedStore`].
pub trait Indexed {
    /// Unique key within one store.
    fn primary_key(&self) -> String;
    /// Full trie path. The leaf at the end holds the primary key.
    fn index_path(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct DualKeyedStore<T> {
    tree: SearchTree,
    table: HashMap<String, T>,
}

impl<T> Default for DualKeyedStore<T> {
    fn default() -> Self {
        Self { tree: SearchTree::new(), table: HashMap::new() }
    }
}

impl<T: Indexed> DualKeyedStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record`. An existing record with the same primary key is
    /// replaced. Returns `false` (and stores nothing) for an empty key.
    pub fn put(&mut self, record: T) -> bool {
        let key = record.primary_key();
        if key.is_empty() {
            return false;
        }
        if let Some(old_path) = self.table.get(&key).map(|old| old.index_path()) {
            if let Err(e) = self.tree.delete(&old_path) {
                log::warn!("store: replacing '{key}': {e}");
            }
        }
        if !self.tree.put(&record.index_path(), key.clone()) {
            return false;
        }
        self.table.insert(key, record);
        true
    }

    pub fn get_by_id(&self, key: &str) -> Option<&T> {
        self.table.get(key)
    }

    /// Any record whose index path starts with `path`.
    pub fn first_match_by_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&T> {
        let key = self.tree.first_child_value(path)?;
        self.table.get(key)
    }

    /// Primary key of the only record under `path`, if there is exactly one.
    pub fn single_value<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        self.tree.single_value(path)
    }

    /// Remove `record` from both structures by its own keys.
    pub fn remove(&mut self, record: &T) -> Option<T> {
        let key = record.primary_key();
        let removed = self.table.remove(&key)?;
        match self.tree.delete(&removed.index_path()) {
            Ok(true) => {}
            Ok(false) => log::warn!("store: '{key}' was missing from the index"),
            Err(e @ ReconError::NotALeaf(_)) => log::warn!("store: {e}"),
            Err(e) => log::warn!("store: unexpected error removing '{key}': {e}"),
        }
        Some(removed)
    }

    /// All records, in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.table.values()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Tree leaves and table entries agree one-to-one.
    pub fn is_consistent(&self) -> bool {
        let leaves = self.tree.values();
        leaves.len() == self.table.len() && leaves.iter().all(|k| self.table.contains_key(*k))
    }
}
