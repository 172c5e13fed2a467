//! Status snapshot built by the status thread.

use std::fmt;

use crate::core::types::{MissionId, format_submap_hash};

/// One queue entry as it appears in the status report.
#[derive(Debug, Clone)]
pub struct SubmapQueueEntry {
    pub map_hash: u64,
    pub robot_name: String,
    pub is_loaded: bool,
    pub is_processed: bool,
    pub processing_failed: bool,
    pub is_merged: bool,
    /// Submap command currently executing against this record, if any.
    pub current_command: Option<String>,
}

/// Textual server snapshot delivered to the status callback.
#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    pub queue: Vec<SubmapQueueEntry>,
    pub merging_thread_busy: bool,
    pub current_merge_command: Option<String>,
    pub duration_last_merging_loop_s: f64,
    pub merged_map_missions: usize,
    pub merged_map_vertices: usize,
    pub blacklist: Vec<(MissionId, String)>,
    pub robots: Vec<(String, Vec<MissionId>)>,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=============================== server status ==============================="
        )?;

        writeln!(f, "Submap queue ({} entries):", self.queue.len())?;
        for entry in &self.queue {
            let mut stages = String::new();
            if entry.is_loaded {
                stages.push_str(" loaded");
            }
            if entry.is_processed {
                stages.push_str(" processed");
            }
            if entry.processing_failed {
                stages.push_str(" (with errors)");
            }
            if entry.is_merged {
                stages.push_str(" merged");
            }
            if stages.is_empty() {
                stages.push_str(" pending");
            }
            write!(
                f,
                "  [{}] robot={}{}",
                format_submap_hash(entry.map_hash),
                entry.robot_name,
                stages
            )?;
            match &entry.current_command {
                Some(cmd) => writeln!(f, " | running: {}", cmd)?,
                None => writeln!(f)?,
            }
        }

        let busy = if self.merging_thread_busy {
            "busy"
        } else {
            "idle"
        };
        writeln!(
            f,
            "Merge loop: {}, last iteration {:.3}s, command: {}",
            busy,
            self.duration_last_merging_loop_s,
            self.current_merge_command.as_deref().unwrap_or("-")
        )?;
        writeln!(
            f,
            "Merged map: {} missions, {} vertices",
            self.merged_map_missions, self.merged_map_vertices
        )?;

        writeln!(f, "Blacklist ({} entries):", self.blacklist.len())?;
        for (id, reason) in &self.blacklist {
            writeln!(f, "  {} : {}", id, reason)?;
        }

        writeln!(f, "Robots ({}):", self.robots.len())?;
        for (robot, missions) in &self.robots {
            let chain: Vec<String> = missions.iter().map(|m| m.to_string()).collect();
            writeln!(f, "  {}: [{}]", robot, chain.join(", "))?;
        }

        write!(
            f,
            "============================================================================="
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_renders_all_sections() {
        let status = ServerStatus {
            queue: vec![SubmapQueueEntry {
                map_hash: 0xabcd,
                robot_name: "alpha".to_string(),
                is_loaded: true,
                is_processed: false,
                processing_failed: false,
                is_merged: false,
                current_command: Some("relax_vertex_poses".to_string()),
            }],
            merging_thread_busy: true,
            current_merge_command: Some("update_global_poses".to_string()),
            duration_last_merging_loop_s: 0.125,
            merged_map_missions: 2,
            merged_map_vertices: 40,
            blacklist: vec![(
                MissionId::parse("00112233445566778899aabbccddeeff").unwrap(),
                "operator request".to_string(),
            )],
            robots: vec![(
                "alpha".to_string(),
                vec![MissionId::parse("00112233445566778899aabbccddeeff").unwrap()],
            )],
        };

        let text = status.to_string();
        assert!(text.contains("robot=alpha loaded"));
        assert!(text.contains("running: relax_vertex_poses"));
        assert!(text.contains("Merge loop: busy"));
        assert!(text.contains("operator request"));
        assert!(text.contains("2 missions, 40 vertices"));
    }
}
