// Define message types for the runtime

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arm::{CartesianPose, Diagnostic, JointAngles};
use crate::config::DEFAULT_DURATION_MS;
use crate::error::{ArmError, Result};
use crate::servo::{Joint, ServoTarget};

fn default_duration() -> u16 {
    DEFAULT_DURATION_MS
}

fn default_wrist_roll() -> f64 {
    90.0
}

// Command from teleop/scripts -> runtime, tagged by "type"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArmCommand {
    /// Tool tip target in cm / degrees
    Pose {
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        pitch: f64,
        #[serde(default = "default_wrist_roll")]
        wrist_roll: f64,
        grip: u16,
        #[serde(default = "default_duration")]
        duration_ms: u16,
        /// Interpolate from the previous pose in this many steps
        #[serde(default)]
        steps: Option<usize>,
    },
    /// Explicit joint angles in degrees
    Joints {
        base: f64,
        shoulder: f64,
        elbow: f64,
        wrist_pitch: f64,
        #[serde(default = "default_wrist_roll")]
        wrist_roll: f64,
        grip: u16,
        #[serde(default = "default_duration")]
        duration_ms: u16,
    },
    /// Raw servo positions, passed through unchanged
    Servos {
        servo_id: Vec<u8>,
        position: Vec<u16>,
        #[serde(default = "default_duration")]
        duration_ms: u16,
    },
    /// Power off servos (all of them when the list is empty)
    Unload {
        #[serde(default)]
        servo_id: Vec<u8>,
    },
}

impl ArmCommand {
    /// Motion commands supersede each other; unloads never get dropped
    pub fn is_motion(&self) -> bool {
        !matches!(self, ArmCommand::Unload { .. })
    }

    pub fn pose(&self) -> Option<CartesianPose> {
        match *self {
            ArmCommand::Pose { x, y, z, pitch, .. } => Some(CartesianPose::new(x, y, z, pitch)),
            _ => None,
        }
    }

    pub fn joints(&self) -> Option<JointAngles> {
        match *self {
            ArmCommand::Joints {
                base,
                shoulder,
                elbow,
                wrist_pitch,
                ..
            } => Some(JointAngles::new(base, shoulder, elbow, wrist_pitch)),
            _ => None,
        }
    }

    /// Pair up a raw servo command
    pub fn servo_targets(&self) -> Result<Vec<ServoTarget>> {
        match self {
            ArmCommand::Servos {
                servo_id, position, ..
            } => {
                if servo_id.len() != position.len() {
                    return Err(ArmError::invalid(format!(
                        "{} servo ids but {} positions",
                        servo_id.len(),
                        position.len()
                    )));
                }
                Ok(servo_id
                    .iter()
                    .zip(position)
                    .map(|(&id, &pos)| ServoTarget::new(id, pos))
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }
}

// Telemetry from runtime -> subscribers
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArmTelemetry {
    pub battery_v: Option<f32>,
    pub positions: BTreeMap<u8, u16>,
    pub joints: BTreeMap<Joint, f64>,
    pub last_pose: Option<CartesianPose>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    BusFault,
}
