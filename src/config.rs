//! Server configuration, frozen at `start()`.

use std::path::PathBuf;

use crate::map::SensorType;

/// Merge-loop cadence when nothing overrides it: one attempt per second.
pub const SECONDS_TO_SLEEP_BETWEEN_ATTEMPTS: f64 = 1.0;

/// Default status-report cadence.
pub const SECONDS_TO_SLEEP_BETWEEN_STATUS: f64 = 1.0;

/// Immutable server configuration.
///
/// The node takes this by value at construction; nothing can be reconfigured
/// after `start()`.
#[derive(Debug, Clone)]
pub struct ServerNodeConfig {
    /// Commands applied to every submap, in order, before merging.
    pub submap_commands: Vec<String>,
    /// Commands applied to the merged map each merge iteration.
    pub global_commands: Vec<String>,
    /// Worker count of the ingest pool; bounds concurrent submap loads.
    pub ingest_parallelism: usize,
    /// Seconds between merged-map checkpoints.
    pub checkpoint_interval_s: f64,
    /// Checkpoint target; replaced atomically on every save.
    pub checkpoint_path: PathBuf,
    /// Seconds between status reports.
    pub status_interval_s: f64,
    /// Seconds the merge loop sleeps between iterations.
    pub merge_loop_period_s: f64,
    /// Sensor types `map_lookup` may serve. `None` allows all.
    pub lookup_sensor_whitelist: Option<Vec<SensorType>>,
    /// Escalate a failed submap command to a mission blacklist instead of
    /// merging the submap processed-with-error.
    pub blacklist_on_command_failure: bool,
}

impl Default for ServerNodeConfig {
    fn default() -> Self {
        Self {
            submap_commands: Vec::new(),
            global_commands: Vec::new(),
            ingest_parallelism: 4,
            checkpoint_interval_s: 300.0,
            checkpoint_path: PathBuf::from("maps/merged_map.json"),
            status_interval_s: SECONDS_TO_SLEEP_BETWEEN_STATUS,
            merge_loop_period_s: SECONDS_TO_SLEEP_BETWEEN_ATTEMPTS,
            lookup_sensor_whitelist: None,
            blacklist_on_command_failure: false,
        }
    }
}
