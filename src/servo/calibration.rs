// Per-joint servo calibration: angle range <-> raw position range

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{ArmError, Result};

/// Calibrated joints of the arm, in move-frame order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Base,
    Shoulder,
    Elbow,
    WristPitch,
    WristRoll,
}

impl Joint {
    pub const ALL: [Joint; 5] = [
        Joint::Base,
        Joint::Shoulder,
        Joint::Elbow,
        Joint::WristPitch,
        Joint::WristRoll,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Joint::Base => "base",
            Joint::Shoulder => "shoulder",
            Joint::Elbow => "elbow",
            Joint::WristPitch => "wrist_pitch",
            Joint::WristRoll => "wrist_roll",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One servo on the bus and its calibration.
///
/// `raw_min` may be larger than `raw_max` for servos mounted the other way
/// round; the mapping is linear in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServoChannel {
    pub id: u8,
    pub angle_min: f64,
    pub angle_max: f64,
    pub raw_min: u16,
    pub raw_max: u16,
}

impl ServoChannel {
    pub const fn new(id: u8, angle_min: f64, angle_max: f64, raw_min: u16, raw_max: u16) -> Self {
        Self {
            id,
            angle_min,
            angle_max,
            raw_min,
            raw_max,
        }
    }

    pub fn clamp(&self, angle: f64) -> f64 {
        clamp(angle, self.angle_min, self.angle_max)
    }

    pub fn to_raw(&self, angle: f64) -> u16 {
        to_raw_position(angle, self)
    }

    pub fn to_angle(&self, raw: u16) -> f64 {
        to_angle(raw, self)
    }

    fn validate(&self, joint: Joint) -> Result<()> {
        if !self.angle_min.is_finite() || !self.angle_max.is_finite() {
            return Err(ArmError::invalid(format!(
                "{} angle range must be finite",
                joint
            )));
        }
        if self.angle_min >= self.angle_max {
            return Err(ArmError::invalid(format!(
                "{} angle range [{}, {}] is empty",
                joint, self.angle_min, self.angle_max
            )));
        }
        if self.raw_min == self.raw_max {
            return Err(ArmError::invalid(format!(
                "{} raw range collapses to {}",
                joint, self.raw_min
            )));
        }
        Ok(())
    }
}

/// Gripper servo, commanded directly in raw units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GripperChannel {
    pub id: u8,
    pub raw_max: u16,
}

impl GripperChannel {
    pub fn clamp(&self, raw: u16) -> u16 {
        raw.min(self.raw_max)
    }
}

/// Calibration table for the whole arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoDirectory {
    pub base: ServoChannel,
    pub shoulder: ServoChannel,
    pub elbow: ServoChannel,
    pub wrist_pitch: ServoChannel,
    pub wrist_roll: ServoChannel,
    pub gripper: GripperChannel,
}

impl Default for ServoDirectory {
    fn default() -> Self {
        Self {
            base: ServoChannel::new(6, -90.0, 90.0, 100, 860),
            shoulder: ServoChannel::new(5, 0.0, 180.0, 250, 690),
            elbow: ServoChannel::new(4, -135.0, 127.0, 1000, 0),
            wrist_pitch: ServoChannel::new(3, -103.0, 120.0, 75, 1000),
            wrist_roll: ServoChannel::new(2, 0.0, 180.0, 900, 20),
            gripper: GripperChannel { id: 1, raw_max: 1000 },
        }
    }
}

impl ServoDirectory {
    pub fn channel(&self, joint: Joint) -> &ServoChannel {
        match joint {
            Joint::Base => &self.base,
            Joint::Shoulder => &self.shoulder,
            Joint::Elbow => &self.elbow,
            Joint::WristPitch => &self.wrist_pitch,
            Joint::WristRoll => &self.wrist_roll,
        }
    }

    pub fn joint_for_id(&self, id: u8) -> Option<Joint> {
        Joint::ALL.into_iter().find(|&j| self.channel(j).id == id)
    }

    /// Bus ids in move-frame order: base, shoulder, elbow, wrist pitch,
    /// wrist roll, gripper
    pub fn ids(&self) -> [u8; 6] {
        [
            self.base.id,
            self.shoulder.id,
            self.elbow.id,
            self.wrist_pitch.id,
            self.wrist_roll.id,
            self.gripper.id,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for joint in Joint::ALL {
            self.channel(joint).validate(joint)?;
        }
        let unique: BTreeSet<u8> = self.ids().into_iter().collect();
        if unique.len() != self.ids().len() {
            return Err(ArmError::invalid(format!(
                "servo ids must be unique: {:?}",
                self.ids()
            )));
        }
        Ok(())
    }
}

/// Standard min/max clamp. NaN collapses to `min`.
pub fn clamp(angle: f64, min: f64, max: f64) -> f64 {
    angle.max(min).min(max)
}

/// Map a joint angle to the servo's raw position, rounded to the nearest
/// step and confined to the raw range
pub fn to_raw_position(angle: f64, servo: &ServoChannel) -> u16 {
    let span = servo.angle_max - servo.angle_min;
    let t = if span.abs() > f64::EPSILON {
        ((angle - servo.angle_min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let raw_min = servo.raw_min as f64;
    let raw_max = servo.raw_max as f64;
    let raw = raw_min + t * (raw_max - raw_min);
    raw.round().clamp(raw_min.min(raw_max), raw_min.max(raw_max)) as u16
}

/// Inverse of [`to_raw_position`], for positions read back from the bus
pub fn to_angle(raw: u16, servo: &ServoChannel) -> f64 {
    let raw_span = servo.raw_max as f64 - servo.raw_min as f64;
    if raw_span == 0.0 {
        return servo.angle_min;
    }
    let t = ((raw as f64 - servo.raw_min as f64) / raw_span).clamp(0.0, 1.0);
    servo.angle_min + t * (servo.angle_max - servo.angle_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directory_is_valid() {
        let dir = ServoDirectory::default();
        dir.validate().unwrap();
        assert_eq!(dir.ids(), [6, 5, 4, 3, 2, 1]);
        assert_eq!(dir.joint_for_id(4), Some(Joint::Elbow));
        assert_eq!(dir.joint_for_id(1), None);
    }

    #[test]
    fn test_to_raw_position_fixture() {
        let dir = ServoDirectory::default();
        assert_eq!(dir.base.to_raw(0.0), 480);
        assert_eq!(dir.base.to_raw(-90.0), 100);
        assert_eq!(dir.base.to_raw(90.0), 860);
        assert_eq!(dir.shoulder.to_raw(84.8359142121355), 457);
        assert_eq!(dir.wrist_roll.to_raw(90.0), 460);
    }

    #[test]
    fn test_inverted_channel() {
        let elbow = ServoDirectory::default().elbow;
        assert_eq!(elbow.to_raw(-135.0), 1000);
        assert_eq!(elbow.to_raw(127.0), 0);
        assert_eq!(elbow.to_raw(-84.60100163324739), 808);
        // Raw span is confined even if the caller skipped clamping
        assert_eq!(elbow.to_raw(500.0), 0);
        assert_eq!(elbow.to_raw(-500.0), 1000);
    }

    #[test]
    fn test_clamp_idempotent() {
        let (lo, hi) = (-103.0, 120.0);
        for a in [-1e9, -200.0, -103.0, -0.5, 0.0, 42.0, 120.0, 120.0001, 1e9, f64::NAN] {
            let once = clamp(a, lo, hi);
            assert_eq!(clamp(once, lo, hi), once);
            assert!((lo..=hi).contains(&once));
        }
        assert_eq!(clamp(f64::NAN, lo, hi), lo);
    }

    #[test]
    fn test_to_angle_inverts_mapping() {
        let dir = ServoDirectory::default();
        for joint in Joint::ALL {
            let channel = dir.channel(joint);
            let step = (channel.angle_max - channel.angle_min)
                / (channel.raw_max as f64 - channel.raw_min as f64).abs();
            for angle in [channel.angle_min, 0.0_f64.max(channel.angle_min), channel.angle_max] {
                let back = channel.to_angle(channel.to_raw(angle));
                assert!(
                    (back - angle).abs() <= step / 2.0 + 1e-9,
                    "{}: {} -> {}",
                    joint,
                    angle,
                    back
                );
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let mut dir = ServoDirectory::default();
        dir.wrist_roll.id = 6;
        assert!(dir.validate().is_err());

        let mut dir = ServoDirectory::default();
        dir.shoulder.angle_min = 180.0;
        assert!(dir.validate().is_err());

        let mut dir = ServoDirectory::default();
        dir.base.angle_max = f64::INFINITY;
        assert!(dir.validate().is_err());
    }

    #[test]
    fn test_gripper_clamp() {
        let gripper = ServoDirectory::default().gripper;
        assert_eq!(gripper.clamp(1500), 1000);
        assert_eq!(gripper.clamp(300), 300);
    }
}
