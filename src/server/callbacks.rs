//! Publisher interfaces the server calls out through.
//!
//! Each collaborator is a single-method trait so tests can inject recording
//! fakes and the binary can plug in its transport of choice. Implementations
//! are called from server threads and must be thread-safe; they must not
//! block the merge loop meaningfully.

use serde::{Deserialize, Serialize};

use crate::core::math::Transform;
use crate::core::types::TimestampNs;
use crate::map::ViMap;

/// A pose correction emitted after a merge iteration.
///
/// `t_b_old_b_new` re-references a robot's live odometry trajectory into the
/// optimized global frame; the remaining transforms let the robot audit the
/// computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseCorrection {
    /// Anchor timestamp `t*`: newest instant present both in the merged map
    /// and in the robot's submitted odometry anchors.
    pub timestamp_ns: TimestampNs,
    pub robot_name: String,
    /// Body pose in the odometry mission frame, as submitted.
    pub t_m_b_old: Transform,
    /// Mission anchor at submission time, before optimization.
    pub t_g_m_old: Transform,
    /// Optimized body pose at `t*` from the merged map.
    pub t_g_b_new: Transform,
    /// `(T_G_M_old * T_M_B_old)^-1 * T_G_B_new`.
    pub t_b_old_b_new: Transform,
}

/// Receives pose corrections from the merge loop.
pub trait PoseCorrectionPublisher: Send + Sync {
    fn publish(&self, correction: &PoseCorrection);
}

/// Receives the periodic textual status report.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, status: &str);
}

/// Receives the merged map for visualization.
pub trait MapVisualizer: Send + Sync {
    fn publish_map(&self, map: &ViMap);
}
