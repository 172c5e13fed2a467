//! Shared state handed to every server thread.
//!
//! One `Arc<ServerContext>` is created by the node and cloned into the
//! ingest pool, the merge loop and the status thread. Lock order, when more
//! than one is needed: queue spine → per-record state → registry → blacklist
//! → status fields. The map store applies its own reader-writer discipline
//! below all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ServerNodeConfig;
use crate::console::CommandRunner;
use crate::core::types::{MissionId, format_submap_hash};
use crate::map::{MERGED_MAP_KEY, MapStore};
use crate::map::store::MapHandle;
use crate::server::callbacks::{MapVisualizer, PoseCorrection, PoseCorrectionPublisher, StatusPublisher};
use crate::state::{Blacklist, RobotRegistry, ServerStatus, SubmapQueue, SubmapQueueEntry};

pub(crate) struct ServerContext {
    pub config: ServerNodeConfig,
    pub store: MapStore,
    pub runner: Arc<dyn CommandRunner>,

    pub queue: SubmapQueue,
    pub registry: RobotRegistry,
    pub blacklist: Blacklist,

    pub shut_down_requested: AtomicBool,
    pub merging_thread_busy: AtomicBool,
    pub duration_last_merging_loop_s: Mutex<f64>,

    /// Per-submap command currently executing, keyed by map hash.
    pub submap_commands: Mutex<HashMap<u64, String>>,
    pub current_merge_command: Mutex<Option<String>>,

    pub pose_correction_publisher: Mutex<Option<Arc<dyn PoseCorrectionPublisher>>>,
    pub status_publisher: Mutex<Option<Arc<dyn StatusPublisher>>>,
    pub visualizer: Mutex<Option<Arc<dyn MapVisualizer>>>,
}

impl ServerContext {
    pub fn new(config: ServerNodeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            store: MapStore::new(),
            runner,
            queue: SubmapQueue::new(),
            registry: RobotRegistry::new(),
            blacklist: Blacklist::new(),
            shut_down_requested: AtomicBool::new(false),
            merging_thread_busy: AtomicBool::new(false),
            duration_last_merging_loop_s: Mutex::new(0.0),
            submap_commands: Mutex::new(HashMap::new()),
            current_merge_command: Mutex::new(None),
            pose_correction_publisher: Mutex::new(None),
            status_publisher: Mutex::new(None),
            visualizer: Mutex::new(None),
        }
    }

    pub fn request_shutdown(&self) {
        self.shut_down_requested.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shut_down_requested.load(Ordering::Acquire)
    }

    /// Store key for a freshly loaded submap.
    pub fn submap_map_key(map_hash: u64) -> String {
        format!("submap_{}", format_submap_hash(map_hash))
    }

    pub fn merged_map(&self) -> Option<MapHandle> {
        self.store.get(MERGED_MAP_KEY)
    }

    pub fn is_mission_blacklisted(&self, mission_id: &MissionId) -> bool {
        self.blacklist.contains(mission_id)
    }

    pub fn set_submap_command(&self, map_hash: u64, command: &str) {
        self.submap_commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(map_hash, command.to_string());
    }

    pub fn clear_submap_command(&self, map_hash: u64) {
        self.submap_commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&map_hash);
    }

    pub fn set_current_merge_command(&self, command: Option<&str>) {
        *self
            .current_merge_command
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = command.map(str::to_string);
    }

    /// Hand a correction to the registered publisher, if any.
    pub fn publish_correction(&self, correction: &PoseCorrection) {
        let publisher = self
            .pose_correction_publisher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(publisher) = publisher {
            publisher.publish(correction);
        }
    }

    /// Assemble the status snapshot for the status thread.
    pub fn build_status(&self) -> ServerStatus {
        let commands = self
            .submap_commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let queue = self
            .queue
            .snapshot()
            .into_iter()
            .map(|record| SubmapQueueEntry {
                map_hash: record.map_hash,
                robot_name: record.robot_name.clone(),
                is_loaded: record.is_loaded(),
                is_processed: record.is_processed(),
                processing_failed: record.processing_failed(),
                is_merged: record.is_merged(),
                current_command: commands.get(&record.map_hash).cloned(),
            })
            .collect();

        let (merged_map_missions, merged_map_vertices) = match self.merged_map() {
            Some(handle) => {
                let map = handle.read().unwrap_or_else(|p| p.into_inner());
                (map.num_missions(), map.total_vertices())
            }
            None => (0, 0),
        };

        ServerStatus {
            queue,
            merging_thread_busy: self.merging_thread_busy.load(Ordering::Acquire),
            current_merge_command: self
                .current_merge_command
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            duration_last_merging_loop_s: *self
                .duration_last_merging_loop_s
                .lock()
                .unwrap_or_else(|p| p.into_inner()),
            merged_map_missions,
            merged_map_vertices,
            blacklist: self.blacklist.snapshot(),
            robots: self.registry.snapshot(),
        }
    }
}
