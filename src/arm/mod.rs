// Arm control module
//
// Provides:
// - Closed-form inverse kinematics (pose -> joint angles) and forward check
// - Straight-line pose interpolation
// - Structured diagnostics for corrected (non-fatal) inputs
// - The high-level controller turning poses into bus commands

pub mod controller;
pub mod diagnostics;
pub mod kinematics;
pub mod trajectory;

pub use controller::{ArmController, MoveReport};
pub use diagnostics::Diagnostic;
pub use kinematics::{ArmGeometry, CartesianPose, IkSolution, JointAngles};
