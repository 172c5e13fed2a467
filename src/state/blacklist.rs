//! Missions scheduled for deletion.
//!
//! Entries are monotonic: once a mission is blacklisted it stays blacklisted,
//! so future submaps of the same mission keep being dropped at ingest even
//! after the merge loop has already evicted the mission from the merged map.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::core::types::MissionId;

/// Set of mission ids scheduled for deletion, each with a human reason.
#[derive(Debug, Default)]
pub struct Blacklist {
    inner: Mutex<BTreeMap<MissionId, String>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blacklist a mission. Returns false if it was already blacklisted;
    /// the original reason wins.
    pub fn insert(&self, mission_id: MissionId, reason: String) -> bool {
        let mut inner = self.lock();
        if inner.contains_key(&mission_id) {
            return false;
        }
        inner.insert(mission_id, reason);
        true
    }

    pub fn contains(&self, mission_id: &MissionId) -> bool {
        self.lock().contains_key(mission_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All entries, ordered by mission id.
    pub fn snapshot(&self) -> Vec<(MissionId, String)> {
        self.lock()
            .iter()
            .map(|(id, reason)| (id.clone(), reason.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<MissionId, String>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
