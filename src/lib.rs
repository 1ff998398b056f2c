pub mod arm;
pub mod config;
pub mod error;
pub mod messages;
pub mod runtime;
pub mod servo;

pub use error::{ArmError, Result};
