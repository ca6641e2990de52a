//! Group registry
//!
//! Mapping from group id to managed group. Reads are concurrent; writes are
//! exclusive under a single writer lock, so readers always observe a
//! linearizable snapshot of membership. An entry exists iff the group is
//! Running or Stopped; closed groups are removed by the manager.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::consumer::group::ManagedGroup;

/// GroupId → ManagedGroup map with concurrent readers
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<ManagedGroup>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<ManagedGroup>> {
        self.groups.read().get(group_id).cloned()
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.groups.read().contains_key(group_id)
    }

    /// Insert `group` unless an entry already exists for the id. Returns
    /// false (and leaves the registry unchanged) when the id is taken.
    pub fn insert_if_absent(&self, group_id: &str, group: Arc<ManagedGroup>) -> bool {
        let mut groups = self.groups.write();
        if groups.contains_key(group_id) {
            return false;
        }
        groups.insert(group_id.to_string(), group);
        true
    }

    pub fn remove(&self, group_id: &str) -> Option<Arc<ManagedGroup>> {
        self.groups.write().remove(group_id)
    }

    /// Snapshot of the currently registered group ids.
    pub fn group_ids(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}
