// Half-duplex bus transceiver for the servo controller board
//
// One request/response exchange at a time: stale input is discarded before
// each request and every read is bounded by a deadline.

use serialport::{ClearBuffer, SerialPort};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::protocol::{self, ServoTarget};
use crate::error::{ArmError, Result};

/// The controller board talks at 9600 baud (the servos themselves run at
/// 115200 on the other side of the board)
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2;

/// Byte transport underneath [`ServoBus`]
pub trait BusPort: Send {
    /// Number of received bytes waiting to be read
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Drop everything currently buffered on the receive side
    fn discard_input(&mut self) -> io::Result<()>;

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Fill `buf` completely
    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl<P: BusPort + ?Sized> BusPort for Box<P> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        (**self).write_frame(frame)
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_frame(buf)
    }
}

/// Serial device handle
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(timeout)
            .open()?;
        Ok(Self { port })
    }
}

impl BusPort for SerialLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.port.read_exact(buf)
    }
}

/// Polling cadence and deadline for response reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Where the last request/response exchange ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    AwaitingResponse,
    Complete,
    TimedOut,
    ProtocolMismatch,
}

/// Servo controller bus - exclusive owner of the transport
pub struct ServoBus<P: BusPort = SerialLink> {
    port: P,
    timing: BusTiming,
    state: ExchangeState,
}

impl ServoBus<SerialLink> {
    /// Open the controller on a serial device
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with(port_name, DEFAULT_BAUDRATE, BusTiming::default())
    }

    pub fn open_with(port_name: &str, baudrate: u32, timing: BusTiming) -> Result<Self> {
        let link = SerialLink::open(port_name, baudrate, timing.timeout)?;
        Ok(Self::with_port(link, timing))
    }
}

impl<P: BusPort> ServoBus<P> {
    pub fn with_port(port: P, timing: BusTiming) -> Self {
        Self {
            port,
            timing,
            state: ExchangeState::Idle,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn timing(&self) -> BusTiming {
        self.timing
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Write a frame to the bus
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        debug!("TX {:02X?}", frame);
        self.port.write_frame(frame)?;
        Ok(())
    }

    /// Wait until `expected_len` bytes are buffered, then read exactly that
    /// many. Gives up with [`ArmError::Timeout`] once `timeout` has elapsed.
    pub fn receive_exact(
        &mut self,
        expected_len: usize,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let available = self.port.bytes_available()?;
            if available >= expected_len {
                if available > expected_len {
                    debug!(
                        available,
                        expected_len, "More bytes buffered than the response needs"
                    );
                }
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ArmError::Timeout {
                    expected: expected_len,
                    received: available,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(poll_interval.min(deadline - now));
        }

        let mut buf = vec![0u8; expected_len];
        self.port.read_frame(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                ArmError::Timeout {
                    expected: expected_len,
                    received: 0,
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                ArmError::Io(e)
            }
        })?;
        debug!("RX {:02X?}", buf);
        Ok(buf)
    }

    fn discard_stale(&mut self) -> Result<()> {
        let stale = self.port.bytes_available()?;
        if stale > 0 {
            debug!(stale, "Discarding stale input before request");
            self.port.discard_input()?;
        }
        Ok(())
    }

    /// Discard stale input, send `frame`, collect and decode the response
    fn exchange<T>(
        &mut self,
        frame: &[u8],
        expected_len: usize,
        decode: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        if let Err(e) = self.discard_stale().and_then(|()| self.send(frame)) {
            self.state = ExchangeState::Idle;
            warn!(state = ?self.state, "Bus request not sent: {}", e);
            return Err(e);
        }
        self.state = ExchangeState::AwaitingResponse;

        let timing = self.timing;
        let result = self
            .receive_exact(expected_len, timing.poll_interval, timing.timeout)
            .and_then(|bytes| decode(&bytes));

        self.state = match &result {
            Ok(_) => ExchangeState::Complete,
            Err(ArmError::Timeout { .. }) => ExchangeState::TimedOut,
            Err(ArmError::Protocol(_)) => ExchangeState::ProtocolMismatch,
            Err(_) => ExchangeState::Idle,
        };
        if let Err(e) = &result {
            warn!(state = ?self.state, "Bus request failed: {}", e);
        }
        result
    }

    // === Controller commands ===

    /// Move several servos in one frame. Positions are sent as given.
    pub fn move_servos(&mut self, targets: &[ServoTarget], duration_ms: u16) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        if targets.len() > protocol::MAX_SERVOS_PER_MOVE {
            return Err(ArmError::invalid(format!(
                "{} servos exceed the {} per move frame limit",
                targets.len(),
                protocol::MAX_SERVOS_PER_MOVE
            )));
        }
        debug!(count = targets.len(), duration_ms, "Move servos");
        self.send(&protocol::encode_move(targets, duration_ms))
    }

    /// Cut motor power on the given servos
    pub fn unload(&mut self, ids: &[u8]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        debug!(?ids, "Unload servos");
        self.send(&protocol::encode_unload(ids))
    }

    /// Read raw positions of several servos
    pub fn read_positions(&mut self, ids: &[u8]) -> Result<BTreeMap<u8, u16>> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let frame = protocol::encode_position_read_request(ids);
        self.exchange(&frame, protocol::position_response_len(ids.len()), |bytes| {
            protocol::decode_position_read_response(bytes, ids)
        })
    }

    /// Controller supply voltage in volts
    pub fn battery_voltage(&mut self) -> Result<f32> {
        let frame = protocol::encode_battery_voltage_request();
        self.exchange(
            &frame,
            protocol::BATTERY_RESPONSE_LEN,
            protocol::decode_battery_voltage_response,
        )
    }
}
