//! Per-robot mission bookkeeping.
//!
//! Tracks, for every robot: the chain of mission ids (most recent first),
//! and the odometry-frame anchors of each ingested submap: the last
//! `(timestamp, T_M_B)` of the submap and the `T_G_M` it arrived with,
//! before global optimization touched it. The merge loop reads these anchors
//! to compute pose corrections.
//!
//! The forward map and the mission→robot reverse index live under one mutex
//! so they can never disagree.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::core::math::Transform;
use crate::core::types::{MissionId, TimestampNs};

/// Anchor entries kept per robot. Oldest entries past the cap are pruned;
/// entries are never rewritten.
const MAX_ANCHOR_HISTORY: usize = 4096;

/// Everything the server remembers about one robot.
#[derive(Debug, Default)]
pub struct RobotMissionInformation {
    /// Mission ids, most recent first.
    pub mission_ids: VecDeque<MissionId>,
    /// Body pose in the odometry mission frame at each submap's final vertex.
    pub t_m_b_submaps_input: BTreeMap<TimestampNs, Transform>,
    /// Mission-frame anchor at submap arrival, before optimization.
    pub t_g_m_submaps_input: BTreeMap<TimestampNs, Transform>,
}

#[derive(Debug, Default)]
struct Inner {
    robots: HashMap<String, RobotMissionInformation>,
    mission_to_robot: HashMap<MissionId, String>,
}

/// Thread-safe registry of robots, missions and anchors.
#[derive(Debug, Default)]
pub struct RobotRegistry {
    inner: Mutex<Inner>,
}

impl RobotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a submap of `mission_id` arrived from `robot`.
    ///
    /// A mission id that differs from the front of the robot's chain is
    /// prepended; the reverse index is updated in the same critical section.
    pub fn note_submap(&self, robot: &str, mission_id: &MissionId) {
        let mut inner = self.lock();
        let info = inner.robots.entry(robot.to_string()).or_default();
        if info.mission_ids.front() != Some(mission_id) {
            info.mission_ids.push_front(mission_id.clone());
        }
        inner
            .mission_to_robot
            .insert(mission_id.clone(), robot.to_string());
    }

    /// Store the anchor pair extracted from a submap's final vertex.
    ///
    /// Existing entries win: anchors are append-only.
    pub fn record_anchor(
        &self,
        robot: &str,
        timestamp_ns: TimestampNs,
        t_m_b: Transform,
        t_g_m: Transform,
    ) {
        let mut inner = self.lock();
        let info = inner.robots.entry(robot.to_string()).or_default();
        info.t_m_b_submaps_input.entry(timestamp_ns).or_insert(t_m_b);
        info.t_g_m_submaps_input.entry(timestamp_ns).or_insert(t_g_m);

        while info.t_m_b_submaps_input.len() > MAX_ANCHOR_HISTORY {
            if let Some((oldest, _)) = info.t_m_b_submaps_input.pop_first() {
                info.t_g_m_submaps_input.remove(&oldest);
            }
        }
    }

    /// The most recently ingested mission of `robot`.
    pub fn latest_mission(&self, robot: &str) -> Option<MissionId> {
        self.lock()
            .robots
            .get(robot)
            .and_then(|info| info.mission_ids.front().cloned())
    }

    pub fn robot_for_mission(&self, mission_id: &MissionId) -> Option<String> {
        self.lock().mission_to_robot.get(mission_id).cloned()
    }

    /// Every mission id of `robot`, most recent first.
    pub fn missions_of_robot(&self, robot: &str) -> Vec<MissionId> {
        self.lock()
            .robots
            .get(robot)
            .map(|info| info.mission_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn known_robot(&self, robot: &str) -> bool {
        self.lock().robots.contains_key(robot)
    }

    /// All mission ids the registry has ever seen (for prefix resolution).
    pub fn known_mission_ids(&self) -> Vec<MissionId> {
        self.lock().mission_to_robot.keys().cloned().collect()
    }

    /// Drop a mission from the forward chain and the reverse index.
    ///
    /// Anchors stay: they are keyed per robot, not per mission, and older
    /// corrections may still reference them.
    pub fn remove_mission(&self, mission_id: &MissionId) {
        let mut inner = self.lock();
        if let Some(robot) = inner.mission_to_robot.remove(mission_id)
            && let Some(info) = inner.robots.get_mut(&robot)
        {
            info.mission_ids.retain(|id| id != mission_id);
        }
    }

    /// All anchor timestamps of `robot`, ascending.
    ///
    /// The merge loop intersects these with the merged map's vertices to find
    /// the correction anchor `t*` without holding the registry lock across
    /// map access.
    pub fn anchor_timestamps(&self, robot: &str) -> Vec<TimestampNs> {
        self.lock()
            .robots
            .get(robot)
            .map(|info| info.t_m_b_submaps_input.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The `(T_M_B, T_G_M)` anchor pair recorded at `timestamp_ns`.
    pub fn anchor_pair(
        &self,
        robot: &str,
        timestamp_ns: TimestampNs,
    ) -> Option<(Transform, Transform)> {
        let inner = self.lock();
        let info = inner.robots.get(robot)?;
        let t_m_b = info.t_m_b_submaps_input.get(&timestamp_ns)?;
        let t_g_m = info.t_g_m_submaps_input.get(&timestamp_ns)?;
        Some((*t_m_b, *t_g_m))
    }

    /// Per-robot mission chains for status reporting, sorted by robot name.
    pub fn snapshot(&self) -> Vec<(String, Vec<MissionId>)> {
        let inner = self.lock();
        let mut robots: Vec<_> = inner
            .robots
            .iter()
            .map(|(name, info)| (name.clone(), info.mission_ids.iter().cloned().collect()))
            .collect();
        robots.sort_by(|a, b| a.0.cmp(&b.0));
        robots
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mission(tag: &str) -> MissionId {
        let mut s = tag.to_string();
        while s.len() < 32 {
            s.push('0');
        }
        MissionId::parse(&s).unwrap()
    }

    #[test]
    fn test_note_submap_prepends_new_mission() {
        let registry = RobotRegistry::new();
        let m1 = mission("aa");
        let m2 = mission("bb");

        registry.note_submap("alpha", &m1);
        registry.note_submap("alpha", &m1); // same mission, no duplicate
        registry.note_submap("alpha", &m2);

        assert_eq!(registry.latest_mission("alpha"), Some(m2.clone()));
        assert_eq!(registry.missions_of_robot("alpha"), vec![m2, m1]);
    }

    #[test]
    fn test_reverse_index_tracks_forward_map() {
        let registry = RobotRegistry::new();
        let m1 = mission("aa");
        registry.note_submap("alpha", &m1);
        assert_eq!(registry.robot_for_mission(&m1).as_deref(), Some("alpha"));

        registry.remove_mission(&m1);
        assert!(registry.robot_for_mission(&m1).is_none());
        assert!(registry.latest_mission("alpha").is_none());
    }

    #[test]
    fn test_anchors_are_append_only() {
        let registry = RobotRegistry::new();
        let original = Transform::translation(1.0, 0.0, 0.0);
        let rewrite = Transform::translation(9.0, 0.0, 0.0);

        registry.record_anchor("alpha", 100, original, Transform::identity());
        registry.record_anchor("alpha", 100, rewrite, Transform::identity());

        let (t_m_b, _) = registry.anchor_pair("alpha", 100).unwrap();
        assert!((t_m_b.translation.vector.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_anchor_timestamps_ascending() {
        let registry = RobotRegistry::new();
        registry.record_anchor("alpha", 300, Transform::identity(), Transform::identity());
        registry.record_anchor("alpha", 100, Transform::identity(), Transform::identity());
        registry.record_anchor("alpha", 200, Transform::identity(), Transform::identity());

        assert_eq!(registry.anchor_timestamps("alpha"), vec![100, 200, 300]);
        assert!(registry.anchor_timestamps("beta").is_empty());
        assert!(registry.anchor_pair("alpha", 150).is_none());
    }
}
