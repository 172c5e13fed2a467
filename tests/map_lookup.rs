//! Lookup contract: status matrix and interpolation correctness.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nalgebra::{UnitQuaternion, Vector3};
use tempfile::TempDir;

use triveni_server::core::math::{Transform, transform_from_parts};
use triveni_server::map::store::write_map_file_atomic;
use triveni_server::map::types::Vertex;
use triveni_server::server::POSE_LOOKUP_TOLERANCE_NS;
use triveni_server::{
    CommandRunner, MapConsole, MapLookupError, MapStore, Mission, MissionId, Sensor, SensorType,
    ServerNode, ServerNodeConfig, ViMap,
};

fn mission_id(tag: &str) -> MissionId {
    let mut s = tag.to_string();
    while s.len() < 32 {
        s.push('0');
    }
    MissionId::parse(&s).unwrap()
}

fn test_config(dir: &Path) -> ServerNodeConfig {
    ServerNodeConfig {
        submap_commands: Vec::new(),
        global_commands: Vec::new(),
        ingest_parallelism: 2,
        checkpoint_interval_s: 3600.0,
        checkpoint_path: dir.join("merged_map.json"),
        status_interval_s: 0.05,
        merge_loop_period_s: 0.02,
        lookup_sensor_whitelist: None,
        blacklist_on_command_failure: false,
    }
}

const T0: i64 = 1_000_000_000;
const T1: i64 = 2_000_000_000;

/// Submap with two vertices at `T0` (origin) and `T1` (1m along x, 90deg
/// yaw), carrying one lidar with a non-trivial extrinsic.
fn write_lookup_submap(dir: &Path, mission: &MissionId) -> PathBuf {
    let sensor = Sensor {
        id: "lidar0".to_string(),
        sensor_type: SensorType::Lidar,
        t_b_s: transform_from_parts(
            Vector3::new(0.1, 0.0, 0.3),
            UnitQuaternion::identity(),
        ),
    };

    let pose0 = Transform::identity();
    let pose1 = transform_from_parts(
        Vector3::new(1.0, 0.0, 0.0),
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
    );

    let mut m = Mission::new(mission.clone());
    m.merge_sensors(vec![sensor]);
    for (ts, pose) in [(T0, pose0), (T1, pose1)] {
        m.push_vertex(Vertex {
            timestamp_ns: ts,
            t_g_b: pose,
            t_m_b: pose,
            t_g_m: Transform::identity(),
        });
    }
    let mut map = ViMap::new();
    map.insert_mission(m);

    let path = dir.join("lookup_submap.json");
    write_map_file_atomic(&path, &map).unwrap();
    path
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn merged_node(dir: &Path) -> ServerNode {
    let mission = mission_id("abcd");
    let submap = write_lookup_submap(dir, &mission);
    let mut node = ServerNode::new(
        test_config(dir),
        Arc::new(MapConsole::with_builtin_commands()),
    );
    node.start().unwrap();
    node.load_and_process_submap("alpha", submap.to_str().unwrap())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        node.status().merged_map_vertices == 2
    }));
    node
}

#[test]
fn test_lookup_success_matches_manual_composition() {
    let dir = TempDir::new().unwrap();
    let mut node = merged_node(dir.path());

    let p_s = Vector3::new(1.0, 2.0, 3.0);
    let query_ts = (T0 + T1) / 2;
    let result = node
        .map_lookup("alpha", SensorType::Lidar, query_ts, &p_s)
        .unwrap();

    // Recompose by hand: interpolated body pose at the midpoint, then the
    // sensor extrinsic.
    let pose0 = Transform::identity();
    let pose1 = transform_from_parts(
        Vector3::new(1.0, 0.0, 0.0),
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
    );
    let t_g_b = transform_from_parts(
        pose0.translation.vector * 0.5 + pose1.translation.vector * 0.5,
        pose0.rotation.slerp(&pose1.rotation, 0.5),
    );
    let t_g_s = t_g_b * transform_from_parts(Vector3::new(0.1, 0.0, 0.3), UnitQuaternion::identity());

    let expected_p_g = t_g_s * nalgebra::Point3::from(p_s);
    assert!((result.p_g - expected_p_g.coords).norm() < 1e-9);
    assert!((result.sensor_p_g - t_g_s.translation.vector).norm() < 1e-9);

    node.shutdown();
}

#[test]
fn test_lookup_at_exact_vertex_timestamp() {
    let dir = TempDir::new().unwrap();
    let mut node = merged_node(dir.path());

    let result = node
        .map_lookup("alpha", SensorType::Lidar, T1, &Vector3::zeros())
        .unwrap();

    // At T1 the body sits at (1, 0, 0) rotated 90deg around z; the sensor
    // offset (0.1, 0, 0.3) rotates onto y.
    let expected = Vector3::new(1.0, 0.1, 0.3);
    assert!((result.sensor_p_g - expected).norm() < 1e-9);

    node.shutdown();
}

#[test]
fn test_lookup_status_matrix() {
    let dir = TempDir::new().unwrap();
    let mut node = merged_node(dir.path());
    let p = Vector3::zeros();

    // Unknown robot.
    assert_eq!(
        node.map_lookup("ghost", SensorType::Lidar, T0, &p).unwrap_err(),
        MapLookupError::NoSuchMission("ghost".to_string())
    );

    // Known mission, missing sensor type.
    assert_eq!(
        node.map_lookup("alpha", SensorType::Camera, T0, &p).unwrap_err(),
        MapLookupError::NoSuchSensor
    );

    // Future beyond tolerance: retryable.
    assert_eq!(
        node.map_lookup(
            "alpha",
            SensorType::Lidar,
            T1 + POSE_LOOKUP_TOLERANCE_NS + 1,
            &p
        )
        .unwrap_err(),
        MapLookupError::PoseNotAvailableYet
    );

    // Pre-history beyond tolerance: terminal.
    assert_eq!(
        node.map_lookup(
            "alpha",
            SensorType::Lidar,
            T0 - POSE_LOOKUP_TOLERANCE_NS - 1,
            &p
        )
        .unwrap_err(),
        MapLookupError::PoseNeverAvailable
    );

    // Inside the tolerance window the pose clamps to the boundary vertex.
    assert!(
        node.map_lookup("alpha", SensorType::Lidar, T1 + POSE_LOOKUP_TOLERANCE_NS / 2, &p)
            .is_ok()
    );
    assert!(
        node.map_lookup("alpha", SensorType::Lidar, T0 - POSE_LOOKUP_TOLERANCE_NS / 2, &p)
            .is_ok()
    );

    node.shutdown();
}

#[test]
fn test_lookup_before_first_merge_is_retryable() {
    // Hold the only submap in the processing stage: the robot is known to
    // the registry but nothing has reached the merged map yet.
    struct ClosedGate(AtomicBool);
    impl CommandRunner for ClosedGate {
        fn run(&self, _: &MapStore, _: &str, command: &str) -> Result<(), String> {
            if command == "gate" {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !self.0.load(Ordering::Acquire) {
                    if Instant::now() > deadline {
                        return Err("gate never released".to_string());
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
            Ok(())
        }
    }

    let dir = TempDir::new().unwrap();
    let mission = mission_id("ee12");
    let submap = write_lookup_submap(dir.path(), &mission);

    let gate = Arc::new(ClosedGate(AtomicBool::new(false)));
    let mut config = test_config(dir.path());
    config.submap_commands = vec!["gate".to_string()];
    let mut node = ServerNode::new(config, gate.clone());
    node.start().unwrap();

    node.load_and_process_submap("alpha", submap.to_str().unwrap())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        node.status().robots.iter().any(|(name, _)| name == "alpha")
    }));

    assert_eq!(
        node.map_lookup("alpha", SensorType::Lidar, T0, &Vector3::zeros())
            .unwrap_err(),
        MapLookupError::PoseNotAvailableYet
    );

    gate.0.store(true, Ordering::Release);
    assert!(wait_until(Duration::from_secs(5), || {
        node.status().merged_map_vertices == 2
    }));
    assert!(
        node.map_lookup("alpha", SensorType::Lidar, T0, &Vector3::zeros())
            .is_ok()
    );

    node.shutdown();
}

#[test]
fn test_lookup_sensor_whitelist() {
    let dir = TempDir::new().unwrap();
    let mission = mission_id("ff34");
    let submap = write_lookup_submap(dir.path(), &mission);

    let mut config = test_config(dir.path());
    config.lookup_sensor_whitelist = Some(vec![SensorType::Camera]);
    let mut node = ServerNode::new(config, Arc::new(MapConsole::with_builtin_commands()));
    node.start().unwrap();

    node.load_and_process_submap("alpha", submap.to_str().unwrap())
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        node.status().merged_map_vertices == 2
    }));

    // Lidar exists on the mission but is not whitelisted.
    assert_eq!(
        node.map_lookup("alpha", SensorType::Lidar, T0, &Vector3::zeros())
            .unwrap_err(),
        MapLookupError::NoSuchSensor
    );

    node.shutdown();
}
