//! triveni-server - Multi-robot map aggregation daemon
//!
//! Central node of the mapping fleet: robots drop submaps on a shared
//! filesystem and notify the server through `.ready` marker files in a spool
//! directory. The daemon ingests and processes submaps in parallel, merges
//! them into one global map, runs global optimization commands, checkpoints
//! the merged map and publishes per-robot pose corrections as JSON lines.
//!
//! # Usage
//!
//! ```bash
//! # With default config
//! cargo run --release
//!
//! # With custom config file
//! cargo run --release -- --config triveni-server.toml
//! ```
//!
//! # Notification protocol
//!
//! A robot (or the message-bus bridge acting for it) writes the submap file
//! first, then a marker `<name>.ready` into the spool directory:
//!
//! ```json
//! {"robot_name": "alpha", "submap_path": "/data/submaps/alpha_0042.json"}
//! ```
//!
//! The marker is consumed after the admission attempt.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;

use triveni_server::server::PoseCorrection;
use triveni_server::{
    MapConsole, PoseCorrectionPublisher, SensorType, ServerError, ServerNode, ServerNodeConfig,
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    checkpoint: CheckpointSection,
    #[serde(default)]
    status: StatusSection,
    #[serde(default)]
    lookup: LookupSection,
    #[serde(default)]
    spool: SpoolSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ServerSection {
    /// Commands applied to every submap before merging.
    submap_commands: Vec<String>,
    /// Commands applied to the merged map each merge iteration.
    global_commands: Vec<String>,
    /// Ingest pool size.
    ingest_parallelism: usize,
    /// Seconds between merge attempts.
    merge_loop_period_s: f64,
    /// Blacklist a mission when one of its submap commands fails.
    blacklist_on_command_failure: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            submap_commands: vec!["update_global_poses".to_string()],
            global_commands: vec![
                "relax_vertex_poses 2".to_string(),
                "prune_empty_missions".to_string(),
            ],
            ingest_parallelism: 4,
            merge_loop_period_s: 1.0,
            blacklist_on_command_failure: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CheckpointSection {
    interval_s: f64,
    path: String,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            interval_s: 300.0,
            path: "/var/lib/triveni/merged_map.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StatusSection {
    interval_s: f64,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self { interval_s: 1.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
struct LookupSection {
    /// Sensor types lookups may use (e.g. "lidar", "camera"). Empty allows
    /// all.
    sensor_whitelist: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SpoolSection {
    /// Directory watched for `.ready` notification markers.
    path: String,
    /// Poll interval for the spool directory.
    poll_interval_ms: u64,
    /// Pose corrections are appended here as JSON lines.
    corrections_path: String,
}

impl Default for SpoolSection {
    fn default() -> Self {
        Self {
            path: "/var/lib/triveni/spool".to_string(),
            poll_interval_ms: 200,
            corrections_path: "/var/lib/triveni/corrections.jsonl".to_string(),
        }
    }
}

// ============================================================================
// CLI Arguments
// ============================================================================

struct Args {
    config_path: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args { config_path: None };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    result.config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    result
}

fn print_help() {
    println!("triveni-server - multi-robot map aggregation daemon");
    println!();
    println!("USAGE:");
    println!("    triveni-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>     Configuration file (default: triveni-server.toml)");
    println!("    -h, --help              Print help information");
    println!();
    println!("CONFIGURATION:");
    println!("    All settings are configured via the TOML config file:");
    println!("    - [server] submap_commands, global_commands, ingest_parallelism");
    println!("    - [checkpoint] interval_s, path");
    println!("    - [spool] path: directory watched for .ready markers");
    println!();
    println!("THREADS:");
    println!("    The daemon runs with N+2 fixed threads:");
    println!("    - Ingest pool: loads and processes incoming submaps");
    println!("    - Merge thread: single writer of the merged map");
    println!("    - Status thread: periodic status reports");
}

fn load_config(args: &Args) -> Config {
    match &args.config_path {
        Some(path) => match fs::read_to_string(path) {
            Ok(contents) => match basic_toml::from_str(&contents) {
                Ok(cfg) => {
                    log::info!("Loaded config from {}", path);
                    cfg
                }
                Err(e) => {
                    log::warn!("Failed to parse config {}: {}", path, e);
                    Config::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read config {}: {}", path, e);
                Config::default()
            }
        },
        None => {
            for path in &["triveni-server.toml", "/etc/triveni-server.toml"] {
                if let Ok(contents) = fs::read_to_string(path)
                    && let Ok(cfg) = basic_toml::from_str(&contents)
                {
                    log::info!("Loaded config from {}", path);
                    return cfg;
                }
            }
            Config::default()
        }
    }
}

/// Build the frozen node configuration from the TOML sections.
fn build_server_config(config: &Config) -> Result<ServerNodeConfig, String> {
    let whitelist = if config.lookup.sensor_whitelist.is_empty() {
        None
    } else {
        let mut sensors = Vec::new();
        for raw in &config.lookup.sensor_whitelist {
            sensors.push(SensorType::parse(raw)?);
        }
        Some(sensors)
    };

    Ok(ServerNodeConfig {
        submap_commands: config.server.submap_commands.clone(),
        global_commands: config.server.global_commands.clone(),
        ingest_parallelism: config.server.ingest_parallelism,
        checkpoint_interval_s: config.checkpoint.interval_s,
        checkpoint_path: PathBuf::from(&config.checkpoint.path),
        status_interval_s: config.status.interval_s,
        merge_loop_period_s: config.server.merge_loop_period_s,
        lookup_sensor_whitelist: whitelist,
        blacklist_on_command_failure: config.server.blacklist_on_command_failure,
    })
}

// ============================================================================
// Correction publisher
// ============================================================================

/// Appends every pose correction as one JSON line.
///
/// Stands in for the message-bus publisher; a bridge process can tail the
/// file and forward corrections to the robots.
struct JsonlCorrectionPublisher {
    file: Mutex<fs::File>,
}

impl JsonlCorrectionPublisher {
    fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl PoseCorrectionPublisher for JsonlCorrectionPublisher {
    fn publish(&self, correction: &PoseCorrection) {
        let line = match serde_json::to_string(correction) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize pose correction: {}", e);
                return;
            }
        };
        if let Ok(mut file) = self.file.lock()
            && let Err(e) = writeln!(file, "{}", line)
        {
            log::error!("Failed to write pose correction: {}", e);
        }
        log::info!(
            "Pose correction for robot {} at t*={}",
            correction.robot_name,
            correction.timestamp_ns
        );
    }
}

// ============================================================================
// Spool watcher
// ============================================================================

/// Content of a `.ready` notification marker.
#[derive(Debug, Deserialize)]
struct SpoolNotification {
    robot_name: String,
    submap_path: String,
}

/// Scan the spool directory once and forward every marker to the node.
fn drain_spool(node: &ServerNode, spool_dir: &Path) {
    let entries = match fs::read_dir(spool_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("Spool directory not readable: {}", e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ready") {
            continue;
        }

        match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<SpoolNotification>(&raw).map_err(|e| e.to_string()))
        {
            Ok(notification) => {
                match node
                    .load_and_process_submap(&notification.robot_name, &notification.submap_path)
                {
                    Ok(()) => {}
                    Err(ServerError::DuplicateSubmap(_)) => {
                        log::debug!("Duplicate notification {}", path.display());
                    }
                    Err(e) => log::warn!("Rejected notification {}: {}", path.display(), e),
                }
            }
            Err(e) => log::warn!("Malformed notification {}: {}", path.display(), e),
        }

        // Consume the marker; the submap file itself belongs to the robot.
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("Failed to remove marker {}: {}", path.display(), e);
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = parse_args();
    let config = load_config(&args);

    let server_config = match build_server_config(&config) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("triveni-server starting");
    log::info!("  Spool: {}", config.spool.path);
    log::info!("  Checkpoint: {}", config.checkpoint.path);
    log::info!("  Corrections: {}", config.spool.corrections_path);

    // Setup signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .expect("Error setting Ctrl-C handler");

    if let Err(e) = run_server(&config, server_config, running) {
        log::error!("Daemon error: {}", e);
    }

    log::info!("triveni-server shutdown complete");
}

fn run_server(
    config: &Config,
    server_config: ServerNodeConfig,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let spool_dir = PathBuf::from(&config.spool.path);
    fs::create_dir_all(&spool_dir)?;

    let corrections =
        JsonlCorrectionPublisher::open(Path::new(&config.spool.corrections_path))?;

    let console = Arc::new(MapConsole::with_builtin_commands());
    let mut node = ServerNode::new(server_config, console);
    node.register_pose_correction_publisher(Arc::new(corrections));
    node.start()?;

    // Main thread watches the spool until shutdown.
    let poll_interval = Duration::from_millis(config.spool.poll_interval_ms.max(10));
    while running.load(Ordering::Relaxed) {
        drain_spool(&node, &spool_dir);
        std::thread::sleep(poll_interval);
    }

    log::info!("Shutdown signal received, waiting for threads...");
    node.shutdown();
    Ok(())
}
