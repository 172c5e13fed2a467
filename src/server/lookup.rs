//! Point lookups against the merged map.
//!
//! Transforms a point from a robot's sensor frame into the optimized global
//! frame. Lookups take a read handle on the merged map, so they block while
//! the merge loop holds the write handle and otherwise observe a consistent
//! pre- or post-iteration map.

use nalgebra::Vector3;
use thiserror::Error;

use crate::core::math::{interpolate_pose, transform_point};
use crate::core::types::TimestampNs;
use crate::map::SensorType;
use crate::server::context::ServerContext;

/// Queries within this window beyond the trajectory ends are clamped to the
/// boundary vertex instead of being rejected.
pub const POSE_LOOKUP_TOLERANCE_NS: TimestampNs = 100_000_000;

/// Why a lookup produced no pose.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapLookupError {
    #[error("no mission known for robot '{0}'")]
    NoSuchMission(String),

    #[error("mission has no usable sensor of the requested type")]
    NoSuchSensor,

    /// The trajectory has not reached the queried timestamp; retry later.
    #[error("pose not available yet at the queried timestamp")]
    PoseNotAvailableYet,

    /// The queried timestamp predates the mission; it will never resolve.
    #[error("pose never available at the queried timestamp")]
    PoseNeverAvailable,
}

/// Successful lookup result: the queried point and the sensor origin, both
/// in the global frame.
#[derive(Debug, Clone)]
pub struct MapLookup {
    pub p_g: Vector3<f64>,
    pub sensor_p_g: Vector3<f64>,
}

pub(crate) fn map_lookup(
    context: &ServerContext,
    robot_name: &str,
    sensor_type: SensorType,
    timestamp_ns: TimestampNs,
    p_s: &Vector3<f64>,
) -> Result<MapLookup, MapLookupError> {
    if let Some(whitelist) = &context.config.lookup_sensor_whitelist
        && !whitelist.contains(&sensor_type)
    {
        log::debug!(
            "Lookup rejected: sensor type {:?} not whitelisted",
            sensor_type
        );
        return Err(MapLookupError::NoSuchSensor);
    }

    let mission_id = context
        .registry
        .latest_mission(robot_name)
        .ok_or_else(|| MapLookupError::NoSuchMission(robot_name.to_string()))?;

    // A robot whose mission has not reached the merged map yet is a
    // retryable condition, not an unknown mission.
    let Some(handle) = context.merged_map() else {
        return Err(MapLookupError::PoseNotAvailableYet);
    };
    let map = handle.read().unwrap_or_else(|p| p.into_inner());
    let Some(mission) = map.mission(&mission_id) else {
        return Err(MapLookupError::PoseNotAvailableYet);
    };

    let sensor = mission
        .sensor_of_type(sensor_type)
        .ok_or(MapLookupError::NoSuchSensor)?;

    let (Some(first), Some(last)) = (mission.first_vertex(), mission.latest_vertex()) else {
        return Err(MapLookupError::PoseNotAvailableYet);
    };
    if last.timestamp_ns < timestamp_ns - POSE_LOOKUP_TOLERANCE_NS {
        return Err(MapLookupError::PoseNotAvailableYet);
    }
    if timestamp_ns < first.timestamp_ns - POSE_LOOKUP_TOLERANCE_NS {
        return Err(MapLookupError::PoseNeverAvailable);
    }

    let clamped = timestamp_ns.clamp(first.timestamp_ns, last.timestamp_ns);
    let (earlier, later) = mission
        .bracketing_vertices(clamped)
        .ok_or(MapLookupError::PoseNotAvailableYet)?;

    let t_g_b = interpolate_pose(
        (earlier.timestamp_ns, &earlier.t_g_b),
        (later.timestamp_ns, &later.t_g_b),
        clamped,
    );
    let t_g_s = t_g_b * sensor.t_b_s;

    Ok(MapLookup {
        p_g: transform_point(&t_g_s, p_s),
        sensor_p_g: t_g_s.translation.vector,
    })
}
