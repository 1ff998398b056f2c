// Error types shared by the protocol, bus, kinematics and controller layers

/// Errors raised while talking to the servo controller or solving a pose
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout after {timeout_ms}ms waiting for {expected} bytes ({received} received)")]
    Timeout {
        expected: usize,
        received: usize,
        timeout_ms: u64,
    },

    #[error("Target ({x:.2}, {y:.2}, {z:.2}) has no defined IK solution: {reason}")]
    Unreachable {
        x: f64,
        y: f64,
        z: f64,
        reason: &'static str,
    },

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ArmError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ArmError::InvalidArgument(reason.into())
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        ArmError::Protocol(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, ArmError>;
