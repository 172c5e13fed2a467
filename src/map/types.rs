//! The visual-inertial map model.
//!
//! A `ViMap` holds missions; each mission is one contiguous session of a
//! single robot and carries its sensor table plus an ordered vertex
//! trajectory. Submaps arriving from robots are `ViMap`s with a single
//! mission covering a short time window; the merged map accumulates every
//! mission the server has accepted.
//!
//! Every vertex stores three transforms for the same instant:
//! - `t_g_b`: body pose in the global frame (rewritten by optimization)
//! - `t_m_b`: body pose in the odometry mission frame (as produced on-robot)
//! - `t_g_m`: mission-frame anchor in the global frame

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::math::Transform;
use crate::core::types::{MissionId, TimestampNs};

/// Sensor categories a mission can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Imu,
    Camera,
    Lidar,
    WheelOdometry,
    Gps,
}

impl SensorType {
    /// Parse the textual form used in configuration files.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imu" => Ok(Self::Imu),
            "camera" => Ok(Self::Camera),
            "lidar" => Ok(Self::Lidar),
            "wheel_odometry" => Ok(Self::WheelOdometry),
            "gps" => Ok(Self::Gps),
            other => Err(format!("unknown sensor type '{}'", other)),
        }
    }
}

/// A calibrated sensor attached to a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    /// Stable sensor identifier within the mission.
    pub id: String,
    pub sensor_type: SensorType,
    /// Extrinsic calibration: sensor frame expressed in the body frame.
    pub t_b_s: Transform,
}

/// One pose sample along a mission trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub timestamp_ns: TimestampNs,
    pub t_g_b: Transform,
    pub t_m_b: Transform,
    pub t_g_m: Transform,
}

/// One contiguous session of a single robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub sensors: Vec<Sensor>,
    /// Vertices ordered by strictly increasing timestamp.
    vertices: Vec<Vertex>,
}

impl Mission {
    pub fn new(id: MissionId) -> Self {
        Self {
            id,
            sensors: Vec::new(),
            vertices: Vec::new(),
        }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Mutable access for map-processing commands. Ordering is the caller's
    /// responsibility; commands rewrite poses, not timestamps.
    pub fn vertices_mut(&mut self) -> &mut [Vertex] {
        &mut self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn first_vertex(&self) -> Option<&Vertex> {
        self.vertices.first()
    }

    pub fn latest_vertex(&self) -> Option<&Vertex> {
        self.vertices.last()
    }

    /// Append a vertex, keeping timestamps strictly increasing.
    ///
    /// Vertices at or before the current latest timestamp are dropped; submap
    /// windows overlap at their boundary vertex and the copy already in the
    /// mission wins.
    pub fn push_vertex(&mut self, vertex: Vertex) -> bool {
        match self.vertices.last() {
            Some(last) if vertex.timestamp_ns <= last.timestamp_ns => false,
            _ => {
                self.vertices.push(vertex);
                true
            }
        }
    }

    /// Look up the first sensor of the given type.
    pub fn sensor_of_type(&self, sensor_type: SensorType) -> Option<&Sensor> {
        self.sensors.iter().find(|s| s.sensor_type == sensor_type)
    }

    /// Merge a sensor table, deduplicating by sensor id.
    pub fn merge_sensors(&mut self, sensors: Vec<Sensor>) {
        for sensor in sensors {
            if !self.sensors.iter().any(|s| s.id == sensor.id) {
                self.sensors.push(sensor);
            }
        }
    }

    /// The vertex at exactly `timestamp_ns`, if present.
    pub fn vertex_at(&self, timestamp_ns: TimestampNs) -> Option<&Vertex> {
        self.vertices
            .binary_search_by_key(&timestamp_ns, |v| v.timestamp_ns)
            .ok()
            .map(|i| &self.vertices[i])
    }

    /// The two vertices bracketing `timestamp_ns`.
    ///
    /// Returns `None` when the timestamp lies outside the trajectory. An
    /// exact hit returns the vertex paired with itself.
    pub fn bracketing_vertices(
        &self,
        timestamp_ns: TimestampNs,
    ) -> Option<(&Vertex, &Vertex)> {
        match self
            .vertices
            .binary_search_by_key(&timestamp_ns, |v| v.timestamp_ns)
        {
            Ok(i) => Some((&self.vertices[i], &self.vertices[i])),
            Err(0) => None,
            Err(i) if i == self.vertices.len() => None,
            Err(i) => Some((&self.vertices[i - 1], &self.vertices[i])),
        }
    }
}

/// A keyed collection of missions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViMap {
    missions: BTreeMap<MissionId, Mission>,
}

impl ViMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    pub fn num_missions(&self) -> usize {
        self.missions.len()
    }

    pub fn mission_ids(&self) -> impl Iterator<Item = &MissionId> {
        self.missions.keys()
    }

    pub fn mission(&self, id: &MissionId) -> Option<&Mission> {
        self.missions.get(id)
    }

    pub fn mission_mut(&mut self, id: &MissionId) -> Option<&mut Mission> {
        self.missions.get_mut(id)
    }

    pub fn missions(&self) -> impl Iterator<Item = &Mission> {
        self.missions.values()
    }

    pub fn missions_mut(&mut self) -> impl Iterator<Item = &mut Mission> {
        self.missions.values_mut()
    }

    pub fn contains_mission(&self, id: &MissionId) -> bool {
        self.missions.contains_key(id)
    }

    pub fn insert_mission(&mut self, mission: Mission) {
        self.missions.insert(mission.id.clone(), mission);
    }

    pub fn remove_mission(&mut self, id: &MissionId) -> bool {
        self.missions.remove(id).is_some()
    }

    pub fn total_vertices(&self) -> usize {
        self.missions.values().map(Mission::num_vertices).sum()
    }

    /// The single mission of a submap.
    ///
    /// Submaps produced by robots carry exactly one mission; anything else is
    /// a malformed file.
    pub fn single_mission(&self) -> Option<&Mission> {
        if self.missions.len() == 1 {
            self.missions.values().next()
        } else {
            None
        }
    }

    /// Transfer every mission of `other` into this map.
    ///
    /// Missions already present are extended: new vertices are appended in
    /// timestamp order and sensor tables are merged. Unknown missions move in
    /// whole.
    pub fn absorb(&mut self, other: ViMap) {
        for (id, mission) in other.missions {
            match self.missions.get_mut(&id) {
                Some(existing) => {
                    existing.merge_sensors(mission.sensors);
                    for vertex in mission.vertices {
                        existing.push_vertex(vertex);
                    }
                }
                None => {
                    self.missions.insert(id, mission);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::transform_from_parts;
    use nalgebra::{UnitQuaternion, Vector3};

    fn mission_id(prefix: &str) -> MissionId {
        let mut s = prefix.to_string();
        while s.len() < 32 {
            s.push('0');
        }
        MissionId::parse(&s).unwrap()
    }

    fn vertex(ts: TimestampNs, x: f64) -> Vertex {
        let pose = transform_from_parts(Vector3::new(x, 0.0, 0.0), UnitQuaternion::identity());
        Vertex {
            timestamp_ns: ts,
            t_g_b: pose,
            t_m_b: pose,
            t_g_m: Transform::identity(),
        }
    }

    #[test]
    fn test_push_vertex_keeps_strictly_increasing_order() {
        let mut mission = Mission::new(mission_id("aa"));
        assert!(mission.push_vertex(vertex(100, 0.0)));
        assert!(mission.push_vertex(vertex(200, 1.0)));
        // Boundary overlap with the previous submap window is dropped.
        assert!(!mission.push_vertex(vertex(200, 2.0)));
        assert!(!mission.push_vertex(vertex(150, 2.0)));
        assert_eq!(mission.num_vertices(), 2);
    }

    #[test]
    fn test_bracketing_vertices() {
        let mut mission = Mission::new(mission_id("aa"));
        mission.push_vertex(vertex(100, 0.0));
        mission.push_vertex(vertex(200, 1.0));
        mission.push_vertex(vertex(300, 2.0));

        let (a, b) = mission.bracketing_vertices(150).unwrap();
        assert_eq!((a.timestamp_ns, b.timestamp_ns), (100, 200));

        let (a, b) = mission.bracketing_vertices(200).unwrap();
        assert_eq!((a.timestamp_ns, b.timestamp_ns), (200, 200));

        assert!(mission.bracketing_vertices(50).is_none());
        assert!(mission.bracketing_vertices(350).is_none());
    }

    #[test]
    fn test_absorb_extends_existing_mission() {
        let id = mission_id("ab");

        let mut first = Mission::new(id.clone());
        first.push_vertex(vertex(100, 0.0));
        first.push_vertex(vertex(200, 1.0));
        let mut merged = ViMap::new();
        merged.insert_mission(first);

        let mut second = Mission::new(id.clone());
        second.push_vertex(vertex(200, 1.0));
        second.push_vertex(vertex(300, 2.0));
        let mut submap = ViMap::new();
        submap.insert_mission(second);

        merged.absorb(submap);

        let mission = merged.mission(&id).unwrap();
        let timestamps: Vec<_> = mission.vertices().iter().map(|v| v.timestamp_ns).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_absorb_moves_unknown_mission() {
        let mut merged = ViMap::new();
        let mut submap = ViMap::new();
        let mut mission = Mission::new(mission_id("cd"));
        mission.push_vertex(vertex(10, 0.0));
        submap.insert_mission(mission);

        merged.absorb(submap);
        assert_eq!(merged.num_missions(), 1);
        assert_eq!(merged.total_vertices(), 1);
    }

    #[test]
    fn test_single_mission_rejects_multi_mission_maps() {
        let mut map = ViMap::new();
        map.insert_mission(Mission::new(mission_id("aa")));
        assert!(map.single_mission().is_some());
        map.insert_mission(Mission::new(mission_id("bb")));
        assert!(map.single_mission().is_none());
    }

    #[test]
    fn test_sensor_lookup_and_merge_dedup() {
        let mut mission = Mission::new(mission_id("aa"));
        mission.merge_sensors(vec![Sensor {
            id: "lidar0".to_string(),
            sensor_type: SensorType::Lidar,
            t_b_s: Transform::identity(),
        }]);
        mission.merge_sensors(vec![
            Sensor {
                id: "lidar0".to_string(),
                sensor_type: SensorType::Lidar,
                t_b_s: Transform::identity(),
            },
            Sensor {
                id: "imu0".to_string(),
                sensor_type: SensorType::Imu,
                t_b_s: Transform::identity(),
            },
        ]);

        assert_eq!(mission.sensors.len(), 2);
        assert!(mission.sensor_of_type(SensorType::Lidar).is_some());
        assert!(mission.sensor_of_type(SensorType::Camera).is_none());
    }
}
