//! Merge Thread - the single writer of the merged map.
//!
//! Each iteration:
//! 1. Evict blacklisted missions from the merged map
//! 2. Append the processed prefix of the submap queue
//! 3. Run the global map commands
//! 4. Publish pose corrections for robots with newly merged data
//! 5. Checkpoint the merged map when the interval has elapsed
//! 6. Sleep until the next attempt
//!
//! Global-map mutation stays serialized in this one thread; the ingest pool
//! only ever feeds it through the queue. Lookups take read handles and
//! therefore observe the map either before or after an iteration, never in
//! between.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::math::pose_correction;
use crate::core::types::format_submap_hash;
use crate::map::{MERGED_MAP_KEY, ViMap};
use crate::server::callbacks::PoseCorrection;
use crate::server::context::ServerContext;

use super::interruptible_sleep;

/// Merge thread handle.
pub(crate) struct MergeThread {
    handle: JoinHandle<()>,
}

impl MergeThread {
    pub fn spawn(context: Arc<ServerContext>) -> Self {
        let handle = thread::Builder::new()
            .name("merge".into())
            .spawn(move || run_merge_loop(context))
            .expect("Failed to spawn merge thread");
        Self { handle }
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_merge_loop(context: Arc<ServerContext>) {
    log::info!("Merge thread starting");
    let mut time_of_last_map_backup = Instant::now();

    loop {
        let iteration_started = Instant::now();
        context.merging_thread_busy.store(true, Ordering::Release);

        delete_blacklisted_missions(&context);
        let robots_with_new_data = append_available_submaps(&context);
        run_map_merging_commands(&context);
        publish_pose_corrections(&context, &robots_with_new_data);
        publish_map_visualization(&context);

        context.merging_thread_busy.store(false, Ordering::Release);

        save_map_every_interval(&context, &mut time_of_last_map_backup);

        *context
            .duration_last_merging_loop_s
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = iteration_started.elapsed().as_secs_f64();

        if context.shutdown_requested() {
            break;
        }
        interruptible_sleep(
            &context,
            Duration::from_secs_f64(context.config.merge_loop_period_s),
        );
        if context.shutdown_requested() {
            break;
        }
    }

    // Final checkpoint so a restart can seed from the latest merged state.
    if context.store.contains(MERGED_MAP_KEY) {
        match context
            .store
            .save_to_file(MERGED_MAP_KEY, &context.config.checkpoint_path)
        {
            Ok(()) => log::info!(
                "Final checkpoint written to {}",
                context.config.checkpoint_path.display()
            ),
            Err(e) => log::error!("Final checkpoint failed: {}", e),
        }
    }

    log::info!("Merge thread shutdown complete");
}

/// Evict every blacklisted mission from the merged map.
///
/// Registry entries are cleared for evicted missions; the blacklist entry
/// itself stays so future submaps of the mission keep being dropped.
fn delete_blacklisted_missions(context: &ServerContext) {
    let blacklisted = context.blacklist.snapshot();
    if blacklisted.is_empty() {
        return;
    }
    let Some(handle) = context.merged_map() else {
        return;
    };

    let mut removed = Vec::new();
    let now_empty = {
        let mut map = handle.write().unwrap_or_else(|p| p.into_inner());
        for (mission_id, reason) in &blacklisted {
            if map.remove_mission(mission_id) {
                log::info!(
                    "Removed blacklisted mission {} from merged map ({})",
                    mission_id,
                    reason
                );
                removed.push(mission_id.clone());
            }
        }
        map.is_empty()
    };

    for mission_id in &removed {
        context.registry.remove_mission(mission_id);
    }

    if now_empty {
        drop(handle);
        context.store.remove(MERGED_MAP_KEY);
        log::info!("Merged map lost its last mission and was destroyed");
    }
}

/// Transfer the processed queue prefix into the merged map.
///
/// Returns the names of robots that contributed new data this iteration.
fn append_available_submaps(context: &ServerContext) -> Vec<String> {
    let mut robots_with_new_data = Vec::new();

    for record in context.queue.pop_processed_prefix() {
        let hash = format_submap_hash(record.map_hash);
        let (Some(map_key), Some(mission_id)) = (record.map_key(), record.mission_id()) else {
            log::error!("Processed submap [{}] has no identity, discarding", hash);
            continue;
        };

        // Missions blacklisted after processing are filtered here.
        if context.is_mission_blacklisted(&mission_id) {
            log::info!(
                "Discarding processed submap [{}] of blacklisted mission {}",
                hash,
                mission_id
            );
            context.store.remove(&map_key);
            continue;
        }

        let Some(submap) = context.store.take(&map_key) else {
            log::error!("Submap [{}] vanished from the map store", hash);
            continue;
        };

        // The merged map is created lazily on the first successful append.
        if !context.store.contains(MERGED_MAP_KEY) {
            if let Err(e) = context.store.insert(MERGED_MAP_KEY, ViMap::new()) {
                log::error!("Failed to create merged map: {}", e);
                continue;
            }
        }
        if let Some(handle) = context.merged_map() {
            handle
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .absorb(submap);
        }

        record.mark_merged();
        if !robots_with_new_data.contains(&record.robot_name) {
            robots_with_new_data.push(record.robot_name.clone());
        }
        log::info!(
            "Merged submap [{}] of robot {} (mission {})",
            hash,
            record.robot_name,
            mission_id
        );
    }

    robots_with_new_data
}

/// One round of the configured global commands against the merged map.
fn run_map_merging_commands(context: &ServerContext) {
    if context.config.global_commands.is_empty() || !context.store.contains(MERGED_MAP_KEY) {
        return;
    }

    for command in &context.config.global_commands {
        // In-flight commands are never interrupted; shutdown is honored
        // between them.
        if context.shutdown_requested() {
            break;
        }
        context.set_current_merge_command(Some(command));
        if let Err(e) = context.runner.run(&context.store, MERGED_MAP_KEY, command) {
            log::warn!("Global command '{}' failed: {}", command, e);
        }
    }
    context.set_current_merge_command(None);
}

/// Compute and publish `T_B_old_B_new` for every robot that gained merged
/// data this iteration.
///
/// The anchor `t*` is the newest timestamp present both in the robot's
/// submitted anchors and as a merged-map vertex; producers guarantee the
/// timestamps match exactly.
fn publish_pose_corrections(context: &ServerContext, robots: &[String]) {
    if robots.is_empty() {
        return;
    }
    let Some(handle) = context.merged_map() else {
        return;
    };

    for robot_name in robots {
        let Some(mission_id) = context.registry.latest_mission(robot_name) else {
            continue;
        };
        let anchor_timestamps = context.registry.anchor_timestamps(robot_name);

        let anchored = {
            let map = handle.read().unwrap_or_else(|p| p.into_inner());
            map.mission(&mission_id).and_then(|mission| {
                anchor_timestamps
                    .iter()
                    .rev()
                    .find_map(|&ts| mission.vertex_at(ts).map(|v| (ts, v.t_g_b)))
            })
        };
        let Some((timestamp_ns, t_g_b_new)) = anchored else {
            continue;
        };
        let Some((t_m_b_old, t_g_m_old)) = context.registry.anchor_pair(robot_name, timestamp_ns)
        else {
            continue;
        };

        let correction = PoseCorrection {
            timestamp_ns,
            robot_name: robot_name.clone(),
            t_m_b_old,
            t_g_m_old,
            t_g_b_new,
            t_b_old_b_new: pose_correction(&t_g_m_old, &t_m_b_old, &t_g_b_new),
        };
        log::debug!(
            "Publishing pose correction for robot {} at t*={}",
            robot_name,
            timestamp_ns
        );
        context.publish_correction(&correction);
    }
}

fn publish_map_visualization(context: &ServerContext) {
    let visualizer = context
        .visualizer
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();
    let Some(visualizer) = visualizer else {
        return;
    };
    if let Some(handle) = context.merged_map() {
        let map = handle.read().unwrap_or_else(|p| p.into_inner());
        visualizer.publish_map(&map);
    }
}

/// Checkpoint the merged map once `checkpoint_interval_s` has elapsed.
fn save_map_every_interval(context: &ServerContext, time_of_last_map_backup: &mut Instant) {
    if time_of_last_map_backup.elapsed().as_secs_f64() < context.config.checkpoint_interval_s {
        return;
    }
    if !context.store.contains(MERGED_MAP_KEY) {
        return;
    }

    match context
        .store
        .save_to_file(MERGED_MAP_KEY, &context.config.checkpoint_path)
    {
        Ok(()) => log::info!(
            "Checkpointed merged map to {}",
            context.config.checkpoint_path.display()
        ),
        Err(e) => log::error!("Checkpoint failed (previous checkpoint preserved): {}", e),
    }
    *time_of_last_map_backup = Instant::now();
}
