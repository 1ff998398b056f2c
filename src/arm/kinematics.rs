// Closed-form inverse kinematics for the 4-DOF arm
//
// The base yaws the arm plane toward the target; shoulder, elbow and wrist
// pitch form a planar 3-link chain. The wrist link is removed along the
// commanded pitch first, leaving a 2-link problem for shoulder and elbow.

use serde::{Deserialize, Serialize};

use super::diagnostics::Diagnostic;
use crate::error::{ArmError, Result};
use crate::servo::Joint;

/// Below this squared planar distance the shoulder angle is undefined
const SINGULAR_DISTANCE_SQ: f64 = 1e-9;

/// Link lengths in centimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmGeometry {
    /// Shoulder to elbow
    pub l1: f64,
    /// Elbow to wrist
    pub l2: f64,
    /// Wrist to tool tip
    pub l3: f64,
}

impl Default for ArmGeometry {
    fn default() -> Self {
        Self {
            l1: 10.0,
            l2: 9.9,
            l3: 10.2,
        }
    }
}

impl ArmGeometry {
    /// Furthest the wrist can be from the shoulder
    pub fn max_reach(&self) -> f64 {
        self.l1 + self.l2
    }

    pub fn validate(&self) -> Result<()> {
        for (name, length) in [("l1", self.l1), ("l2", self.l2), ("l3", self.l3)] {
            if !length.is_finite() || length <= 0.0 {
                return Err(ArmError::invalid(format!(
                    "link length {} must be positive, got {}",
                    name, length
                )));
            }
        }
        Ok(())
    }
}

/// End-effector target: position in cm, pitch in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub pitch: f64,
}

impl CartesianPose {
    pub fn new(x: f64, y: f64, z: f64, pitch: f64) -> Self {
        Self { x, y, z, pitch }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.pitch.is_finite()
    }
}

/// Solved joint angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointAngles {
    pub base: f64,
    pub shoulder: f64,
    pub elbow: f64,
    pub wrist_pitch: f64,
}

impl JointAngles {
    pub fn new(base: f64, shoulder: f64, elbow: f64, wrist_pitch: f64) -> Self {
        Self {
            base,
            shoulder,
            elbow,
            wrist_pitch,
        }
    }

    /// The four IK joints paired with their angles
    pub fn iter(&self) -> impl Iterator<Item = (Joint, f64)> {
        [
            (Joint::Base, self.base),
            (Joint::Shoulder, self.shoulder),
            (Joint::Elbow, self.elbow),
            (Joint::WristPitch, self.wrist_pitch),
        ]
        .into_iter()
    }

    pub fn set(&mut self, joint: Joint, angle: f64) {
        match joint {
            Joint::Base => self.base = angle,
            Joint::Shoulder => self.shoulder = angle,
            Joint::Elbow => self.elbow = angle,
            Joint::WristPitch => self.wrist_pitch = angle,
            Joint::WristRoll => {}
        }
    }

    pub fn is_finite(&self) -> bool {
        self.iter().all(|(_, angle)| angle.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkSolution {
    pub joints: JointAngles,
    pub diagnostics: Vec<Diagnostic>,
}

/// Solve joint angles placing the tool tip at `target` with the requested
/// pitch. Elbow-down branch. Targets beyond reach are pulled onto the
/// reachable sphere rather than rejected.
pub fn solve(geometry: &ArmGeometry, target: &CartesianPose) -> Result<IkSolution> {
    if !target.is_finite() {
        return Err(ArmError::invalid(format!(
            "non-finite IK target {:?}",
            target
        )));
    }

    let ArmGeometry { l1, l2, l3 } = *geometry;
    let mut diagnostics = Vec::new();
    let phi = target.pitch.to_radians();

    // Azimuth and horizontal distance on the XY plane
    let theta_base = target.y.atan2(target.x);
    let r3 = target.x.hypot(target.y);

    // Wrist position in the arm plane
    let mut r2 = r3 - l3 * phi.cos();
    let mut z2 = target.z - l3 * phi.sin();

    let max_reach = geometry.max_reach();
    let distance = r2.hypot(z2);
    if distance > max_reach {
        let scale = max_reach / distance;
        r2 *= scale;
        z2 *= scale;
        diagnostics.push(Diagnostic::ScaledToReach {
            distance,
            max_reach,
            r: r2,
            z: z2,
        });
    }

    let d2 = r2 * r2 + z2 * z2;
    if d2 < SINGULAR_DISTANCE_SQ {
        return Err(ArmError::Unreachable {
            x: target.x,
            y: target.y,
            z: target.z,
            reason: "wrist centre coincides with the shoulder axis",
        });
    }

    let raw_c2 = (d2 - l1 * l1 - l2 * l2) / (2.0 * l1 * l2);
    let c2 = raw_c2.clamp(-1.0, 1.0);
    // Overshoot past 1 is expected float noise on the reach boundary
    if raw_c2 < -1.0 - 1e-9 || raw_c2 > 1.0 + 1e-9 {
        diagnostics.push(Diagnostic::ElbowSaturated { cosine: raw_c2 });
    }
    let s2 = -(1.0 - c2 * c2).sqrt();
    let theta_elbow = s2.atan2(c2);

    let k1 = l1 + l2 * c2;
    let k2 = l2 * s2;
    let s1 = (k1 * z2 - k2 * r2) / d2;
    let c1 = (k1 * r2 + k2 * z2) / d2;
    let theta_shoulder = s1.atan2(c1);

    let theta_wrist = phi - theta_shoulder - theta_elbow;

    Ok(IkSolution {
        joints: JointAngles {
            base: theta_base.to_degrees(),
            shoulder: theta_shoulder.to_degrees(),
            elbow: theta_elbow.to_degrees(),
            wrist_pitch: theta_wrist.to_degrees(),
        },
        diagnostics,
    })
}

/// Tool tip pose reached by a set of joint angles
pub fn forward(geometry: &ArmGeometry, joints: &JointAngles) -> CartesianPose {
    let base = joints.base.to_radians();
    let a1 = joints.shoulder.to_radians();
    let a2 = a1 + joints.elbow.to_radians();
    let a3 = a2 + joints.wrist_pitch.to_radians();

    let r = geometry.l1 * a1.cos() + geometry.l2 * a2.cos() + geometry.l3 * a3.cos();
    let z = geometry.l1 * a1.sin() + geometry.l2 * a2.sin() + geometry.l3 * a3.sin();

    CartesianPose {
        x: r * base.cos(),
        y: r * base.sin(),
        z,
        pitch: a3.to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-3;

    fn assert_close(actual: f64, expected: f64, what: &str) {
        assert!(
            (actual - expected).abs() < TOL,
            "{}: expected {}, got {}",
            what,
            expected,
            actual
        );
    }

    #[test]
    fn test_regression_fixture() {
        let geometry = ArmGeometry::default();
        let solution = solve(&geometry, &CartesianPose::new(21.0, 0.0, 10.0, 0.0)).unwrap();
        let j = solution.joints;

        assert!(solution.diagnostics.is_empty());
        assert_eq!(j.base, 0.0);
        assert!((j.shoulder - 84.8359142121355).abs() < 1e-9);
        assert!((j.elbow - -84.60100163324739).abs() < 1e-9);
        assert!((j.wrist_pitch - -0.23491257888812034).abs() < 1e-9);
    }

    #[test]
    fn test_forward_check_reachable_targets() {
        let geometry = ArmGeometry::default();
        let targets = [
            CartesianPose::new(21.0, 0.0, 10.0, 0.0),
            CartesianPose::new(15.0, 8.0, 5.0, -30.0),
            CartesianPose::new(-10.0, 12.0, 12.0, 20.0),
            CartesianPose::new(5.0, -5.0, -8.0, -90.0),
            CartesianPose::new(0.0, 18.0, 20.0, 45.0),
        ];

        for target in targets {
            let solution = solve(&geometry, &target).unwrap();
            assert!(solution.diagnostics.is_empty(), "{:?}", solution.diagnostics);
            let reached = forward(&geometry, &solution.joints);
            assert_close(reached.x, target.x, "x");
            assert_close(reached.y, target.y, "y");
            assert_close(reached.z, target.z, "z");
            assert_close(reached.pitch, target.pitch, "pitch");
        }
    }

    #[test]
    fn test_elbow_down_branch() {
        let solution = solve(&ArmGeometry::default(), &CartesianPose::new(15.0, 0.0, 5.0, 0.0)).unwrap();
        assert!(solution.joints.elbow < 0.0);
    }

    #[test]
    fn test_out_of_reach_is_scaled_onto_sphere() {
        let geometry = ArmGeometry::default();
        let target = CartesianPose::new(60.0, 0.0, 30.0, 0.0);
        let solution = solve(&geometry, &target).unwrap();

        // Planar wrist target before scaling
        let r = 60.0 - geometry.l3;
        let z = 30.0;
        let d = f64::hypot(r, z);

        match solution.diagnostics.as_slice() {
            [Diagnostic::ScaledToReach { distance, max_reach, .. }] => {
                assert_close(*distance, d, "distance");
                assert_close(*max_reach, 19.9, "max reach");
            }
            other => panic!("unexpected diagnostics {:?}", other),
        }

        // Wrist lands at full extension along the requested direction
        let j = solution.joints;
        assert_close(j.elbow, 0.0, "elbow straight");
        let a1 = j.shoulder.to_radians();
        let wrist_r = geometry.l1 * a1.cos() + geometry.l2 * (a1 + j.elbow.to_radians()).cos();
        let wrist_z = geometry.l1 * a1.sin() + geometry.l2 * (a1 + j.elbow.to_radians()).sin();
        assert_close(wrist_r.hypot(wrist_z), geometry.max_reach(), "solved distance");
        assert_close(wrist_r / geometry.max_reach(), r / d, "direction r");
        assert_close(wrist_z / geometry.max_reach(), z / d, "direction z");
    }

    #[test]
    fn test_inner_limit_saturates_elbow() {
        let geometry = ArmGeometry {
            l1: 10.0,
            l2: 5.0,
            l3: 2.0,
        };
        // Wrist 1cm from the shoulder, inside |l1 - l2|
        let solution = solve(&geometry, &CartesianPose::new(3.0, 0.0, 0.0, 0.0)).unwrap();
        assert!(matches!(
            solution.diagnostics.as_slice(),
            [Diagnostic::ElbowSaturated { .. }]
        ));
        assert!(solution.joints.is_finite());
    }

    #[test]
    fn test_singular_target_is_unreachable() {
        let geometry = ArmGeometry::default();
        // Wrist centre lands exactly on the shoulder
        let target = CartesianPose::new(geometry.l3, 0.0, 0.0, 0.0);
        assert!(matches!(
            solve(&geometry, &target),
            Err(ArmError::Unreachable { .. })
        ));
    }

    #[test]
    fn test_non_finite_target_rejected() {
        let target = CartesianPose::new(f64::NAN, 0.0, 0.0, 0.0);
        assert!(matches!(
            solve(&ArmGeometry::default(), &target),
            Err(ArmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_geometry_validation() {
        ArmGeometry::default().validate().unwrap();
        let bad = ArmGeometry {
            l1: 0.0,
            ..ArmGeometry::default()
        };
        assert!(bad.validate().is_err());
    }
}
