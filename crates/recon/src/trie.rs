//! Path-addressed search tree.
//!
//! Maps an ordered list of string segments to a single string value stored
//! at the end of the path. Used by [`crate::store::DualKeyedStore`] to answer
//! bucket queries such as "any transaction on this day with this amount" or
//! "exactly one transaction on this day".
//!
//! ```text
//! 2025-01-01
//!   DEBIT
//!     5.00
//!       txn_1 -> 2025-01-01|DEBIT|txn_1
//!   CREDIT
//!     5.00
//!       txn_2 -> 2025-01-01|CREDIT|txn_2
//!       txn_3 -> 2025-01-01|CREDIT|txn_3
//! ```

use std::collections::BTreeMap;

use crate::error::ReconError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrieNode {
    children: BTreeMap<String, TrieNode>,
    value: Option<String>,
}

impl TrieNode {
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchTree {
    root: TrieNode,
}

impl SearchTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` at the end of `path`, creating nodes as needed.
    ///
    /// The empty string means "no value" and is refused (returns `false`).
    pub fn put<S: AsRef<str>>(&mut self, path: &[S], value: impl Into<String>) -> bool {
        let value = value.into();
        if value.is_empty() {
            return false;
        }

        let mut node = &mut self.root;
        for segment in path {
            node = node.children.entry(segment.as_ref().to_string()).or_default();
        }
        node.value = Some(value);
        true
    }

    /// Exact traversal. An empty path yields the root.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<&TrieNode> {
        path.iter()
            .try_fold(&self.root, |node, segment| node.children.get(segment.as_ref()))
    }

    /// First value found by descending from `path` through one child per level.
    ///
    /// When several branches exist the smallest segment is followed; callers
    /// should only rely on getting *some* value under the path.
    pub fn first_child_value<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        let mut node = self.get(path)?;
        loop {
            if let Some(value) = node.value() {
                return Some(value);
            }
            node = node.children.values().next()?;
        }
    }

    /// The value under `path` if the subtree is a single chain ending in one leaf.
    pub fn single_value<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        let mut node = self.get(path)?;
        loop {
            match node.children.len() {
                0 => return node.value(),
                1 => node = node.children.values().next()?,
                _ => return None,
            }
        }
    }

    /// Remove the leaf at `path` and prune ancestors left empty.
    ///
    /// Returns `Ok(false)` when nothing lives at `path` (including the empty
    /// path, which names the root). Deleting a node that has children is
    /// refused and leaves the tree untouched.
    pub fn delete<S: AsRef<str>>(&mut self, path: &[S]) -> Result<bool, ReconError> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(false);
        };

        // Walk down recording the visited ancestors, then find the deepest
        // one that must survive: the root, or any node with other children
        // or its own value.
        let cut = {
            let mut stack: Vec<&TrieNode> = Vec::with_capacity(path.len());
            let mut node = &self.root;
            for segment in path {
                stack.push(node);
                node = match node.children.get(segment.as_ref()) {
                    Some(child) => child,
                    None => return Ok(false),
                };
            }

            if !node.is_leaf() {
                return Err(ReconError::NotALeaf(
                    path.iter().map(|s| s.as_ref().to_string()).collect(),
                ));
            }

            stack
                .iter()
                .enumerate()
                .rev()
                .find(|(depth, ancestor)| {
                    *depth == 0 || ancestor.children.len() > 1 || ancestor.value.is_some()
                })
                .map(|(depth, _)| depth)
                .unwrap_or(0)
        };

        let mut node = &mut self.root;
        for segment in &parents[..cut] {
            node = match node.children.get_mut(segment.as_ref()) {
                Some(child) => child,
                None => return Ok(false),
            };
        }

        let segment = if cut == parents.len() { last } else { &parents[cut] };
        Ok(node.children.remove(segment.as_ref()).is_some())
    }

    /// Every stored value, in segment order.
    pub fn values(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if let Some(value) = node.value() {
                out.push(value);
            }
            stack.extend(node.children.values().rev());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty() && self.root.value.is_none()
    }
}
