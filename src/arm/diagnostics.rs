// Non-fatal conditions corrected on the way from a pose to servo commands

use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::servo::Joint;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Joint angle outside its calibrated range, replaced by the nearest limit
    AngleClamped {
        joint: Joint,
        servo_id: u8,
        requested: f64,
        clamped: f64,
        min: f64,
        max: f64,
    },
    /// Wrist target beyond the reachable sphere, pulled onto its boundary
    ScaledToReach {
        distance: f64,
        max_reach: f64,
        r: f64,
        z: f64,
    },
    /// Elbow cosine outside [-1, 1], target inside the inner workspace limit
    ElbowSaturated { cosine: f64 },
    GripperClamped { requested: u16, clamped: u16 },
}

impl Diagnostic {
    /// Route the diagnostic to the log
    pub fn emit(&self) {
        match *self {
            Diagnostic::AngleClamped {
                joint,
                servo_id,
                requested,
                clamped,
                min,
                max,
            } => warn!(
                %joint,
                servo_id, requested, clamped, min, max, "Joint angle out of range, clamped"
            ),
            Diagnostic::ScaledToReach {
                distance,
                max_reach,
                r,
                z,
            } => warn!(
                distance,
                max_reach, r, z, "Target out of reach, moving to closest reachable point"
            ),
            Diagnostic::ElbowSaturated { cosine } => {
                warn!(cosine, "Target inside inner workspace limit, elbow saturated")
            }
            Diagnostic::GripperClamped { requested, clamped } => {
                warn!(requested, clamped, "Gripper position above limit, clamped")
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::AngleClamped {
                joint,
                servo_id,
                requested,
                clamped,
                min,
                max,
            } => write!(
                f,
                "servo {} ({}): angle {:.2} out of range ({} to {}), using {:.2}",
                servo_id, joint, requested, min, max, clamped
            ),
            Diagnostic::ScaledToReach { distance, max_reach, r, z } => write!(
                f,
                "target distance {:.2} exceeds reach {:.2}, moved to ({:.2}, {:.2})",
                distance, max_reach, r, z
            ),
            Diagnostic::ElbowSaturated { cosine } => {
                write!(f, "elbow cosine {:.4} saturated to [-1, 1]", cosine)
            }
            Diagnostic::GripperClamped { requested, clamped } => {
                write!(f, "gripper {} above limit, using {}", requested, clamped)
            }
        }
    }
}
