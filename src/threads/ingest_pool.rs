//! Ingest Pool - bounded submap loading and processing.
//!
//! A fixed set of worker threads receives admitted `SubmapProcess` records
//! over a crossbeam channel and runs the per-submap pipeline:
//!
//! 1. Load the file into the map store under a fresh key
//! 2. Drop the submap if its mission is blacklisted
//! 3. Update the robot registry and extract the odometry anchors
//! 4. Run the configured submap commands, then mark the record processed
//!
//! CRITICAL: workers never touch the merged map. Everything they produce is
//! handed over through the queue record and the map store; the merge thread
//! is the only writer of the merged map.
//!
//! On shutdown, in-flight records finish; records still sitting in the
//! channel are abandoned.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::core::types::format_submap_hash;
use crate::error::ServerError;
use crate::server::context::ServerContext;
use crate::state::SubmapProcess;

/// Ingest pool handle.
pub(crate) struct IngestPool {
    workers: Vec<JoinHandle<()>>,
    job_tx: Option<Sender<Arc<SubmapProcess>>>,
}

impl IngestPool {
    /// Spawn `config.ingest_parallelism` workers.
    pub fn spawn(context: Arc<ServerContext>) -> Self {
        let size = context.config.ingest_parallelism.max(1);
        let (job_tx, job_rx) = unbounded::<Arc<SubmapProcess>>();

        let workers = (0..size)
            .map(|index| {
                let context = context.clone();
                let job_rx = job_rx.clone();
                thread::Builder::new()
                    .name(format!("ingest-{}", index))
                    .spawn(move || run_worker_loop(context, job_rx))
                    .expect("Failed to spawn ingest worker")
            })
            .collect();

        Self {
            workers,
            job_tx: Some(job_tx),
        }
    }

    /// Hand a queued record to the pool.
    pub fn dispatch(&self, record: Arc<SubmapProcess>) -> Result<(), ServerError> {
        match &self.job_tx {
            Some(tx) => tx.send(record).map_err(|_| ServerError::ShuttingDown),
            None => Err(ServerError::ShuttingDown),
        }
    }

    /// Close the channel and wait for all workers to drain their in-flight
    /// work.
    pub fn join(mut self) {
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                log::error!("Ingest worker panicked: {:?}", e);
            }
        }
    }
}

fn run_worker_loop(context: Arc<ServerContext>, job_rx: Receiver<Arc<SubmapProcess>>) {
    loop {
        if context.shutdown_requested() {
            break;
        }
        match job_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(record) => {
                // Records still queued at shutdown are abandoned.
                if context.shutdown_requested() {
                    break;
                }
                load_and_process(&context, &record);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// The per-submap pipeline of one worker.
fn load_and_process(context: &ServerContext, record: &Arc<SubmapProcess>) {
    let hash = format_submap_hash(record.map_hash);
    let map_key = ServerContext::submap_map_key(record.map_hash);

    // 1. Load the file into the map store.
    if let Err(e) = context.store.load_from_file(&map_key, &record.path) {
        log::error!(
            "Failed to load submap [{}] from {}: {}",
            hash,
            record.path.display(),
            e
        );
        context.queue.remove(record.map_hash);
        return;
    }

    // Read mission id, anchors and sanity-check the file while holding the
    // submap's read lock briefly.
    let loaded = context.store.get(&map_key).and_then(|handle| {
        let map = handle.read().unwrap_or_else(|p| p.into_inner());
        map.single_mission().map(|mission| {
            (
                mission.id.clone(),
                mission
                    .latest_vertex()
                    .map(|v| (v.timestamp_ns, v.t_m_b, v.t_g_m)),
            )
        })
    });

    let Some((mission_id, anchor)) = loaded else {
        log::error!(
            "Submap [{}] from {} does not contain exactly one mission, discarding",
            hash,
            record.path.display()
        );
        context.store.remove(&map_key);
        context.queue.remove(record.map_hash);
        return;
    };

    // 2. Blacklisted missions are dropped before they reach the registry.
    if context.is_mission_blacklisted(&mission_id) {
        log::info!(
            "Dropping submap [{}] of blacklisted mission {}",
            hash,
            mission_id
        );
        context.store.remove(&map_key);
        context.queue.remove(record.map_hash);
        return;
    }

    // 3. Registry update and anchor extraction.
    context.registry.note_submap(&record.robot_name, &mission_id);
    if let Some((timestamp_ns, t_m_b, t_g_m)) = anchor {
        context
            .registry
            .record_anchor(&record.robot_name, timestamp_ns, t_m_b, t_g_m);
    } else {
        log::warn!("Submap [{}] has no vertices, nothing to anchor", hash);
    }

    record.set_identity(map_key.clone(), mission_id.clone());
    record.mark_loaded();

    // 4. Submap commands, in order. The first failure stops the chain.
    let mut failed_command: Option<(String, String)> = None;
    for command in &context.config.submap_commands {
        if context.shutdown_requested() {
            break;
        }
        context.set_submap_command(record.map_hash, command);
        if let Err(e) = context.runner.run(&context.store, &map_key, command) {
            failed_command = Some((command.clone(), e));
            break;
        }
    }
    context.clear_submap_command(record.map_hash);

    if let Some((command, message)) = failed_command {
        record.mark_processing_failed();
        if context.config.blacklist_on_command_failure {
            log::warn!(
                "Submap command '{}' failed on [{}]: {} - blacklisting mission {}",
                command,
                hash,
                message,
                mission_id
            );
            context.blacklist.insert(
                mission_id,
                format!("submap command '{}' failed: {}", command, message),
            );
        } else {
            log::warn!(
                "Submap command '{}' failed on [{}]: {} - submap will be merged anyway",
                command,
                hash,
                message
            );
        }
    }

    record.mark_processed();
    log::debug!("Submap [{}] of robot {} processed", hash, record.robot_name);
}
