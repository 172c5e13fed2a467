//! The server node: lifecycle and public operations.
//!
//! `ServerNode` owns the shared context and the three thread groups (ingest
//! pool, merge loop, status reporter). External callers such as the CLI
//! wrapper and the message-bus integration go through the operations here:
//! submap admission, map lookup, mission deletion, saving, visualization
//! and callback registration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nalgebra::Vector3;

use crate::config::ServerNodeConfig;
use crate::console::CommandRunner;
use crate::core::types::{MIN_MISSION_ID_PREFIX, MissionId, TimestampNs, submap_hash};
use crate::error::ServerError;
use crate::map::{MERGED_MAP_KEY, SensorType};
use crate::server::callbacks::{MapVisualizer, PoseCorrectionPublisher, StatusPublisher};
use crate::server::context::ServerContext;
use crate::server::lookup::{self, MapLookup, MapLookupError};
use crate::state::{ServerStatus, SubmapProcess};
use crate::threads::{IngestPool, MergeThread, StatusThread};

/// Central aggregation node of the multi-robot mapping service.
///
/// Configuration is frozen once `start()` has been called. A node that has
/// been shut down cannot be restarted.
pub struct ServerNode {
    context: Arc<ServerContext>,
    ingest_pool: Option<IngestPool>,
    merge_thread: Option<MergeThread>,
    status_thread: Option<StatusThread>,
    is_running: bool,
}

impl ServerNode {
    pub fn new(config: ServerNodeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            context: Arc::new(ServerContext::new(config, runner)),
            ingest_pool: None,
            merge_thread: None,
            status_thread: None,
            is_running: false,
        }
    }

    /// Register the pose-correction publisher. Call before `start()`.
    pub fn register_pose_correction_publisher(&self, publisher: Arc<dyn PoseCorrectionPublisher>) {
        *self
            .context
            .pose_correction_publisher
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(publisher);
    }

    /// Register the status publisher. Call before `start()`.
    pub fn register_status_publisher(&self, publisher: Arc<dyn StatusPublisher>) {
        *self
            .context
            .status_publisher
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(publisher);
    }

    /// Register the map visualizer. Call before `start()`.
    pub fn register_map_visualizer(&self, visualizer: Arc<dyn MapVisualizer>) {
        *self
            .context
            .visualizer
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(visualizer);
    }

    /// Freeze the configuration and spawn the worker threads.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.is_running || self.context.shutdown_requested() {
            return Err(ServerError::AlreadyStarted);
        }

        let config = &self.context.config;
        log::info!("Server node starting");
        log::info!("  Ingest parallelism: {}", config.ingest_parallelism);
        log::info!("  Submap commands: {:?}", config.submap_commands);
        log::info!("  Global commands: {:?}", config.global_commands);
        log::info!(
            "  Checkpoint: {} every {}s",
            config.checkpoint_path.display(),
            config.checkpoint_interval_s
        );
        if config.blacklist_on_command_failure {
            log::info!("  Command failure policy: blacklist mission");
        } else {
            log::info!("  Command failure policy: merge processed-with-error");
        }

        self.ingest_pool = Some(IngestPool::spawn(self.context.clone()));
        self.merge_thread = Some(MergeThread::spawn(self.context.clone()));
        self.status_thread = Some(StatusThread::spawn(self.context.clone()));
        self.is_running = true;

        log::info!("Server node running");
        Ok(())
    }

    /// Stop accepting work, drain in-flight submaps, write a final
    /// checkpoint and join all threads.
    pub fn shutdown(&mut self) {
        if !self.is_running {
            return;
        }
        log::info!("Server node shutting down...");
        self.context.request_shutdown();

        if let Some(pool) = self.ingest_pool.take() {
            pool.join();
        }
        if let Some(thread) = self.merge_thread.take()
            && let Err(e) = thread.join()
        {
            log::error!("Merge thread panicked: {:?}", e);
        }
        if let Some(thread) = self.status_thread.take()
            && let Err(e) = thread.join()
        {
            log::error!("Status thread panicked: {:?}", e);
        }

        self.is_running = false;
        log::info!("Server node shutdown complete");
    }

    /// Admit a submap notification: enqueue the record and hand it to the
    /// ingest pool.
    ///
    /// Succeeds when the submap was enqueued; duplicate notifications and
    /// malformed input are rejected. A submap whose mission turns out to be
    /// blacklisted is discarded later, by policy, without failing this call.
    pub fn load_and_process_submap(
        &self,
        robot_name: &str,
        submap_path: &str,
    ) -> Result<(), ServerError> {
        if robot_name.trim().is_empty() {
            return Err(ServerError::InvalidArgument("empty robot name".to_string()));
        }
        if submap_path.trim().is_empty() {
            return Err(ServerError::InvalidArgument("empty submap path".to_string()));
        }
        if self.context.shutdown_requested() || !self.is_running {
            return Err(ServerError::ShuttingDown);
        }

        let map_hash = submap_hash(submap_path);
        let record = Arc::new(SubmapProcess::new(
            robot_name.to_string(),
            PathBuf::from(submap_path),
            map_hash,
        ));

        if !self.context.queue.push_if_new(record.clone()) {
            return Err(ServerError::DuplicateSubmap(submap_path.to_string()));
        }

        let pool = self.ingest_pool.as_ref().ok_or(ServerError::ShuttingDown)?;
        if let Err(e) = pool.dispatch(record) {
            self.context.queue.remove(map_hash);
            return Err(e);
        }

        log::info!(
            "Accepted submap notification from robot {} ({})",
            robot_name,
            submap_path
        );
        Ok(())
    }

    /// Save the merged map to the configured checkpoint path.
    pub fn save_map(&self) -> Result<(), ServerError> {
        let path = self.context.config.checkpoint_path.clone();
        self.save_map_to(&path)
    }

    /// Save the merged map to `path`, atomically replacing any previous file.
    pub fn save_map_to(&self, path: &Path) -> Result<(), ServerError> {
        if !self.context.store.contains(MERGED_MAP_KEY) {
            return Err(ServerError::NotFound("no merged map yet".to_string()));
        }
        self.context.store.save_to_file(MERGED_MAP_KEY, path)?;
        log::info!("Saved merged map to {}", path.display());
        Ok(())
    }

    /// Transform a sensor-frame point into the optimized global frame.
    pub fn map_lookup(
        &self,
        robot_name: &str,
        sensor_type: SensorType,
        timestamp_ns: TimestampNs,
        p_s: &Vector3<f64>,
    ) -> Result<MapLookup, MapLookupError> {
        lookup::map_lookup(&self.context, robot_name, sensor_type, timestamp_ns, p_s)
    }

    /// Blacklist the mission matching a partial id; the merge loop evicts it
    /// within one iteration and future submaps of it are dropped at ingest.
    ///
    /// The partial id must be at least four characters of the canonical
    /// lowercase-hex form and match exactly one known mission.
    pub fn delete_mission(&self, partial_mission_id: &str) -> Result<String, ServerError> {
        let prefix = partial_mission_id.trim().to_ascii_lowercase();
        if prefix.len() < MIN_MISSION_ID_PREFIX {
            return Err(ServerError::InvalidArgument(format!(
                "partial mission id must have at least {} characters",
                MIN_MISSION_ID_PREFIX
            )));
        }
        if !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ServerError::InvalidArgument(format!(
                "partial mission id '{}' is not hexadecimal",
                prefix
            )));
        }

        let matches: Vec<MissionId> = self
            .known_mission_ids()
            .into_iter()
            .filter(|id| id.matches_prefix(&prefix))
            .collect();

        let mission_id = match matches.as_slice() {
            [] => {
                return Err(ServerError::NotFound(format!(
                    "no mission matches prefix '{}'",
                    prefix
                )));
            }
            [unique] => unique.clone(),
            _ => return Err(ServerError::AmbiguousMissionId(prefix, matches.len())),
        };

        let inserted = self
            .context
            .blacklist
            .insert(mission_id.clone(), "deletion requested".to_string());
        let message = if inserted {
            format!(
                "Mission {} scheduled for deletion; it will be removed from the merged map within one merge iteration",
                mission_id
            )
        } else {
            format!("Mission {} is already scheduled for deletion", mission_id)
        };
        log::info!("{}", message);
        Ok(message)
    }

    /// Blacklist every mission of `robot_name`. Idempotent.
    pub fn delete_all_robot_missions(&self, robot_name: &str) -> Result<String, ServerError> {
        if !self.context.registry.known_robot(robot_name) {
            return Err(ServerError::NotFound(format!(
                "unknown robot '{}'",
                robot_name
            )));
        }

        let missions = self.context.registry.missions_of_robot(robot_name);
        let mut newly_blacklisted = 0;
        for mission_id in &missions {
            if self.context.blacklist.insert(
                mission_id.clone(),
                format!("deletion of all missions of robot '{}'", robot_name),
            ) {
                newly_blacklisted += 1;
            }
        }

        let message = format!(
            "Scheduled {} missions of robot {} for deletion ({} were already scheduled)",
            missions.len(),
            robot_name,
            missions.len() - newly_blacklisted
        );
        log::info!("{}", message);
        Ok(message)
    }

    /// Push the merged map to the registered visualizer.
    pub fn visualize_map(&self) {
        let visualizer = self
            .context
            .visualizer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let Some(visualizer) = visualizer else {
            log::warn!("visualize_map called without a registered visualizer");
            return;
        };
        match self.context.merged_map() {
            Some(handle) => {
                let map = handle.read().unwrap_or_else(|p| p.into_inner());
                visualizer.publish_map(&map);
            }
            None => log::info!("No merged map to visualize yet"),
        }
    }

    /// Snapshot of the current server status (the same data the status
    /// thread reports).
    pub fn status(&self) -> ServerStatus {
        self.context.build_status()
    }

    /// Mission ids known to the registry or present in the merged map.
    fn known_mission_ids(&self) -> Vec<MissionId> {
        let mut ids: BTreeSet<MissionId> =
            self.context.registry.known_mission_ids().into_iter().collect();
        if let Some(handle) = self.context.merged_map() {
            let map = handle.read().unwrap_or_else(|p| p.into_inner());
            ids.extend(map.mission_ids().cloned());
        }
        ids.into_iter().collect()
    }
}

impl Drop for ServerNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}
