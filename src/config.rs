// Timeouts, topics, arm configuration
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::arm::ArmGeometry;
use crate::error::{ArmError, Result};
use crate::servo::bus::{BusTiming, DEFAULT_BAUDRATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
use crate::servo::ServoDirectory;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 20;

// Telemetry is read from the bus every this many ticks
pub const TELEMETRY_EVERY_TICKS: u64 = 10;

// No command for this long marks the command stream stale (the arm holds position)
pub const CMD_TIMEOUT: Duration = Duration::from_secs(2);

// Zenoh topics
pub const TOPIC_CMD_ARM: &str = "xarm/cmd/arm"; // commands
pub const TOPIC_TELEMETRY: &str = "xarm/state/telemetry"; // positions, battery
pub const TOPIC_HEALTH: &str = "xarm/state/health"; // health status

// Serial port of the servo controller board
pub const DEFAULT_PORT: &str = "/dev/ttyS0";

// Move duration when a command does not give one
pub const DEFAULT_DURATION_MS: u16 = 900;

// Upper bound on straight-line interpolation steps per command
pub const MAX_INTERPOLATION_STEPS: usize = 100;

/// Everything needed to drive one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub port: String,
    pub baud_rate: u32,
    pub poll_interval_ms: u64,
    pub response_timeout_ms: u64,
    pub default_duration_ms: u16,
    pub geometry: ArmGeometry,
    pub servos: ServoDirectory,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            response_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_duration_ms: DEFAULT_DURATION_MS,
            geometry: ArmGeometry::default(),
            servos: ServoDirectory::default(),
        }
    }
}

impl ArmConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(ArmError::invalid("baud rate must be non-zero"));
        }
        if self.response_timeout_ms == 0 {
            return Err(ArmError::invalid("response timeout must be non-zero"));
        }
        self.geometry.validate()?;
        self.servos.validate()
    }

    pub fn bus_timing(&self) -> BusTiming {
        BusTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ArmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.bus_timing().timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ArmConfig::from_json(r#"{ "port": "/dev/ttyAMA0", "geometry": { "l1": 10.0, "l2": 9.6, "l3": 10.2 } }"#)
            .unwrap();
        assert_eq!(config.port, "/dev/ttyAMA0");
        assert_eq!(config.geometry.l2, 9.6);
        assert_eq!(config.servos, ServoDirectory::default());
    }

    #[test]
    fn test_json_round_trip_through_serde() {
        let json = serde_json::to_string(&ArmConfig::default()).unwrap();
        assert_eq!(ArmConfig::from_json(&json).unwrap(), ArmConfig::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ArmConfig::default();
        config.servos.gripper.id = config.servos.base.id;
        let json = serde_json::to_string(&config).unwrap();
        assert!(matches!(
            ArmConfig::from_json(&json),
            Err(ArmError::InvalidArgument(_))
        ));

        assert!(matches!(
            ArmConfig::from_json("{ not json"),
            Err(ArmError::Config(_))
        ));
    }
}
