// Straight-line interpolation between end-effector poses

use super::kinematics::CartesianPose;

fn lerp(a: f64, b: f64, ratio: f64) -> f64 {
    a + (b - a) * ratio
}

/// Pose at `ratio` (0..=1) along the line from `from` to `to`
pub fn lerp_pose(from: &CartesianPose, to: &CartesianPose, ratio: f64) -> CartesianPose {
    CartesianPose {
        x: lerp(from.x, to.x, ratio),
        y: lerp(from.y, to.y, ratio),
        z: lerp(from.z, to.z, ratio),
        pitch: lerp(from.pitch, to.pitch, ratio),
    }
}

/// Intermediate poses for `steps` equal steps, excluding `from` and ending
/// exactly on `to`
pub fn interpolate(from: &CartesianPose, to: &CartesianPose, steps: usize) -> Vec<CartesianPose> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| {
            if i == steps {
                *to
            } else {
                lerp_pose(from, to, i as f64 / steps as f64)
            }
        })
        .collect()
}
