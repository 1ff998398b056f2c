// Serial bus servo layer for the arm
//
// Provides:
// - Hiwonder bus servo controller protocol (frame encode/decode)
// - Timeout-bounded bus transceiver over a serial port
// - Per-joint calibration (angle <-> raw position)
// - A simulated controller for dry runs and tests

pub mod bus;
pub mod calibration;
pub mod protocol;
pub mod sim;

pub use bus::{BusPort, BusTiming, ExchangeState, SerialLink, ServoBus};
pub use calibration::{GripperChannel, Joint, ServoChannel, ServoDirectory};
pub use protocol::ServoTarget;
pub use sim::SimulatedController;
