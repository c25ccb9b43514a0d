//! Stage-then-commit views over the durable store.
//!
//! A [`VersionDb`] buffers writes on top of any [`ReadState`]; nothing reaches
//! the parent until the caller takes the staged [`Changes`] and applies them.
//! A [`StackView`] reads through the staged changes of a chain of processing
//! blocks (nearest first) before falling back to the durable database.

use std::collections::BTreeMap;

use crate::storage::{Changes, Database, ReadState, StorageError, WriteState};

/// Apply staged `changes` that fall under `prefix` onto a scan result.
fn overlay_scan(out: &mut BTreeMap<Vec<u8>, Vec<u8>>, changes: &Changes, prefix: &[u8]) {
    for (key, value) in changes.range(prefix.to_vec()..) {
        if !key.starts_with(prefix) {
            break;
        }
        match value {
            Some(value) => {
                out.insert(key.clone(), value.clone());
            }
            None => {
                out.remove(key);
            }
        }
    }
}

pub struct VersionDb<'a> {
    parent: &'a dyn ReadState,
    changes: Changes,
}

impl<'a> VersionDb<'a> {
    pub fn new(parent: &'a dyn ReadState) -> Self {
        VersionDb { parent, changes: Changes::new() }
    }

    /// Stage `changes` on top of whatever is already staged.
    pub fn merge(&mut self, changes: Changes) {
        self.changes.extend(changes);
    }

    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Release the staged writes. Dropping the overlay instead discards them.
    pub fn into_changes(self) -> Changes {
        self.changes
    }
}

impl ReadState for VersionDb<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.changes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.parent.get(key),
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        let mut out = self.parent.scan_prefix(prefix)?;
        overlay_scan(&mut out, &self.changes, prefix);
        Ok(out)
    }
}

impl WriteState for VersionDb<'_> {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.changes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.changes.insert(key, None);
    }
}

pub struct StackView<'a> {
    /// Nearest layer first
    layers: Vec<&'a Changes>,
    base: &'a dyn Database,
}

impl<'a> StackView<'a> {
    pub fn new(layers: Vec<&'a Changes>, base: &'a dyn Database) -> Self {
        StackView { layers, base }
    }

    /// A view of committed state only.
    pub fn durable(base: &'a dyn Database) -> Self {
        StackView { layers: Vec::new(), base }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl ReadState for StackView<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        for layer in &self.layers {
            if let Some(staged) = layer.get(key) {
                return Ok(staged.clone());
            }
        }
        self.base.get(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, StorageError> {
        let mut out = self.base.scan_prefix(prefix)?;
        for layer in self.layers.iter().rev() {
            overlay_scan(&mut out, layer, prefix);
        }
        Ok(out)
    }
}
