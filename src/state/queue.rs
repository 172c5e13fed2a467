//! The submap backlog.
//!
//! Every notified submap gets one `SubmapProcess` record that lives in the
//! queue from admission until the merge loop transfers its contents into the
//! merged map. Stage flags are monotonic: once set they are never cleared.
//!
//! Workers flip flags on single records while the merge loop scans many, so
//! the flags are atomics published with release/acquire ordering; the map key
//! and mission id are written exactly once, under the record's own mutex,
//! before `is_loaded` is released. The queue spine has its own mutex and is
//! only held for short scans.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::types::MissionId;

/// One submap in flight.
#[derive(Debug)]
pub struct SubmapProcess {
    /// Robot that produced the submap.
    pub robot_name: String,
    /// Where the producer wrote the submap.
    pub path: PathBuf,
    /// Stable hash of `path`; the record's identity in logs and status.
    pub map_hash: u64,

    identity: Mutex<SubmapIdentity>,
    is_loaded: AtomicBool,
    is_processed: AtomicBool,
    processing_failed: AtomicBool,
    is_merged: AtomicBool,
}

#[derive(Debug, Default)]
struct SubmapIdentity {
    map_key: Option<String>,
    mission_id: Option<MissionId>,
}

impl SubmapProcess {
    pub fn new(robot_name: String, path: PathBuf, map_hash: u64) -> Self {
        Self {
            robot_name,
            path,
            map_hash,
            identity: Mutex::new(SubmapIdentity::default()),
            is_loaded: AtomicBool::new(false),
            is_processed: AtomicBool::new(false),
            processing_failed: AtomicBool::new(false),
            is_merged: AtomicBool::new(false),
        }
    }

    /// Record the store key and mission id of the loaded submap.
    ///
    /// Must happen before `mark_loaded`; both fields are written once.
    pub fn set_identity(&self, map_key: String, mission_id: MissionId) {
        let mut identity = self.identity.lock().unwrap_or_else(|p| p.into_inner());
        debug_assert!(identity.map_key.is_none(), "identity written twice");
        identity.map_key = Some(map_key);
        identity.mission_id = Some(mission_id);
    }

    pub fn map_key(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .map_key
            .clone()
    }

    pub fn mission_id(&self) -> Option<MissionId> {
        self.identity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .mission_id
            .clone()
    }

    pub fn mark_loaded(&self) {
        self.is_loaded.store(true, Ordering::Release);
    }

    pub fn mark_processing_failed(&self) {
        self.processing_failed.store(true, Ordering::Release);
    }

    pub fn mark_processed(&self) {
        self.is_processed.store(true, Ordering::Release);
    }

    pub fn mark_merged(&self) {
        self.is_merged.store(true, Ordering::Release);
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded.load(Ordering::Acquire)
    }

    pub fn is_processed(&self) -> bool {
        self.is_processed.load(Ordering::Acquire)
    }

    pub fn processing_failed(&self) -> bool {
        self.processing_failed.load(Ordering::Acquire)
    }

    pub fn is_merged(&self) -> bool {
        self.is_merged.load(Ordering::Acquire)
    }
}

/// FIFO backlog of submaps awaiting merge.
///
/// Order is first-notification-wins across robots, which makes per-robot
/// submission order a sub-order of the queue. The merge loop only consumes a
/// prefix of consecutively-processed records, so per-robot FIFO survives the
/// single-writer bottleneck.
#[derive(Debug, Default)]
pub struct SubmapQueue {
    inner: Mutex<VecDeque<Arc<SubmapProcess>>>,
}

impl SubmapQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record unless one with the same hash is already queued.
    pub fn push_if_new(&self, record: Arc<SubmapProcess>) -> bool {
        let mut queue = self.lock();
        if queue.iter().any(|r| r.map_hash == record.map_hash) {
            return false;
        }
        queue.push_back(record);
        true
    }

    /// Drop a record (failed load, blacklisted mission).
    pub fn remove(&self, map_hash: u64) -> Option<Arc<SubmapProcess>> {
        let mut queue = self.lock();
        let index = queue.iter().position(|r| r.map_hash == map_hash)?;
        queue.remove(index)
    }

    /// Pop the maximal prefix of processed records, in queue order.
    ///
    /// Records past the first non-processed entry stay in place.
    pub fn pop_processed_prefix(&self) -> Vec<Arc<SubmapProcess>> {
        let mut queue = self.lock();
        let mut prefix = Vec::new();
        while queue.front().is_some_and(|front| front.is_processed()) {
            if let Some(record) = queue.pop_front() {
                prefix.push(record);
            }
        }
        prefix
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clone of all records for status reporting.
    pub fn snapshot(&self) -> Vec<Arc<SubmapProcess>> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<SubmapProcess>>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
