//! Rigid-transform math for the frame conventions used by the server.
//!
//! Frames follow the glossary: G (global), M (odometry mission frame),
//! B (body), S (sensor). `T_X_Y` transforms coordinates from frame Y into
//! frame X, so composition reads right to left: `T_G_B = T_G_M * T_M_B`.

use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::core::types::TimestampNs;

/// A rigid transform between two frames.
pub type Transform = Isometry3<f64>;

/// Build a transform from a translation and a unit quaternion.
pub fn transform_from_parts(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Transform {
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// Interpolate a body pose at `timestamp_ns` between two bracketing poses.
///
/// Linear interpolation for the translation, unit-quaternion SLERP for the
/// rotation. Callers must pass `earlier.0 <= timestamp_ns <= later.0`;
/// timestamps outside the bracket are clamped.
pub fn interpolate_pose(
    earlier: (TimestampNs, &Transform),
    later: (TimestampNs, &Transform),
    timestamp_ns: TimestampNs,
) -> Transform {
    let (t0, pose0) = earlier;
    let (t1, pose1) = later;
    if t1 <= t0 {
        return *pose0;
    }

    let alpha = ((timestamp_ns - t0) as f64 / (t1 - t0) as f64).clamp(0.0, 1.0);

    let translation =
        pose0.translation.vector + alpha * (pose1.translation.vector - pose0.translation.vector);
    // Antipodal rotations have no unique SLERP path; snap to the nearer
    // endpoint instead of panicking on degenerate producer data.
    let rotation = pose0
        .rotation
        .try_slerp(&pose1.rotation, alpha, 1e-9)
        .unwrap_or(if alpha < 0.5 {
            pose0.rotation
        } else {
            pose1.rotation
        });

    transform_from_parts(translation, rotation)
}

/// Compute the pose correction a robot applies to re-reference its live
/// odometry into the optimized global frame:
///
/// `T_B_old_B_new = (T_G_M_old * T_M_B_old)^-1 * T_G_B_new`
pub fn pose_correction(
    t_g_m_old: &Transform,
    t_m_b_old: &Transform,
    t_g_b_new: &Transform,
) -> Transform {
    (t_g_m_old * t_m_b_old).inverse() * t_g_b_new
}

/// Transform a point expressed in the source frame of `t` into its target frame.
pub fn transform_point(t: &Transform, p: &Vector3<f64>) -> Vector3<f64> {
    (t * Point3::from(*p)).coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn translation(x: f64, y: f64, z: f64) -> Transform {
        transform_from_parts(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    #[test]
    fn test_interpolate_translation_midpoint() {
        let a = translation(0.0, 0.0, 0.0);
        let b = translation(2.0, 4.0, 6.0);
        let mid = interpolate_pose((100, &a), (200, &b), 150);
        assert!((mid.translation.vector - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn test_interpolate_rotation_slerp() {
        let a = transform_from_parts(Vector3::zeros(), UnitQuaternion::identity());
        let b = transform_from_parts(
            Vector3::zeros(),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
        );
        let mid = interpolate_pose((0, &a), (100, &b), 50);
        let angle = mid.rotation.angle();
        assert!((angle - FRAC_PI_2 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_clamps_outside_bracket() {
        let a = translation(0.0, 0.0, 0.0);
        let b = translation(1.0, 0.0, 0.0);
        let before = interpolate_pose((100, &a), (200, &b), 50);
        let after = interpolate_pose((100, &a), (200, &b), 250);
        assert!((before.translation.vector - a.translation.vector).norm() < 1e-12);
        assert!((after.translation.vector - b.translation.vector).norm() < 1e-12);
    }

    #[test]
    fn test_pose_correction_identity_when_unoptimized() {
        // If the optimized pose equals the composed input pose, the
        // correction must be identity.
        let t_g_m = transform_from_parts(
            Vector3::new(1.0, 2.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3),
        );
        let t_m_b = transform_from_parts(
            Vector3::new(0.5, -0.5, 0.1),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.2),
        );
        let t_g_b = t_g_m * t_m_b;

        let correction = pose_correction(&t_g_m, &t_m_b, &t_g_b);
        assert!(correction.translation.vector.norm() < 1e-12);
        assert!(correction.rotation.angle() < 1e-9);
    }

    #[test]
    fn test_pose_correction_captures_optimization_shift() {
        let t_g_m = translation(1.0, 0.0, 0.0);
        let t_m_b = translation(0.0, 1.0, 0.0);
        // Optimization moved the body 0.25m along x.
        let t_g_b_new = translation(1.25, 1.0, 0.0);

        let correction = pose_correction(&t_g_m, &t_m_b, &t_g_b_new);
        assert!((correction.translation.vector - Vector3::new(0.25, 0.0, 0.0)).norm() < 1e-12);
    }
}
