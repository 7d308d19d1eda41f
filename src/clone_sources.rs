//! CloneSourceSet: root ids the receiver is assumed to already hold.
//!
//! Insertion order is preserved and passed to the generator verbatim.
//! Append-only within a session; duplicate adds are no-ops.

use crate::error::ExportError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneSourceSet {
    ids: Vec<u64>,
}

impl CloneSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `root_id` unless already present.
    /// Fails only if the backing storage cannot grow.
    pub fn add(&mut self, root_id: u64) -> Result<(), ExportError> {
        if self.contains(root_id) {
            return Ok(());
        }
        self.ids
            .try_reserve(1)
            .map_err(|_| ExportError::Allocation("clone source set"))?;
        self.ids.push(root_id);
        Ok(())
    }

    pub fn contains(&self, root_id: u64) -> bool {
        self.ids.contains(&root_id)
    }

    /// Ids in insertion order. Each call starts over and sees every add made so far.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<'a> IntoIterator for &'a CloneSourceSet {
    type Item = u64;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter().copied()
    }
}
