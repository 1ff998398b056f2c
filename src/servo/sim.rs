// In-memory stand-in for the servo controller board
//
// Speaks the same wire protocol as the hardware: move frames update the
// simulated positions instantly, read requests queue a response frame.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use tracing::{debug, warn};

use super::bus::BusPort;
use super::protocol::{self, Command, HEADER, ServoTarget};

/// Raw position reported for servos that were never commanded
pub const SIM_REST_POSITION: u16 = 500;
pub const SIM_BATTERY_MV: u16 = 7_400;

#[derive(Debug, Default)]
pub struct SimulatedController {
    positions: BTreeMap<u8, u16>,
    unloaded: BTreeSet<u8>,
    battery_mv: Option<u16>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    moves: Vec<(u16, Vec<ServoTarget>)>,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_battery(millivolts: u16) -> Self {
        Self {
            battery_mv: Some(millivolts),
            ..Self::default()
        }
    }

    pub fn position(&self, id: u8) -> u16 {
        self.positions.get(&id).copied().unwrap_or(SIM_REST_POSITION)
    }

    pub fn is_unloaded(&self, id: u8) -> bool {
        self.unloaded.contains(&id)
    }

    /// Every move frame received so far, decoded
    pub fn moves(&self) -> &[(u16, Vec<ServoTarget>)] {
        &self.moves
    }

    /// Inject bytes on the receive side, as line noise would
    pub fn inject_noise(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let command = match Command::try_from(frame[3]) {
            Ok(command) => command,
            Err(e) => {
                warn!("Simulated controller ignoring frame: {}", e);
                return;
            }
        };

        let result = match command {
            Command::ServoMove => protocol::decode_move(frame).map(|(duration, targets)| {
                for target in &targets {
                    self.positions.insert(target.id, target.position);
                    self.unloaded.remove(&target.id);
                }
                self.moves.push((duration, targets));
            }),
            Command::MultiServoUnload => protocol::decode_id_request(frame, command).map(|ids| {
                self.unloaded.extend(ids);
            }),
            Command::MultiServoPositionRead => {
                protocol::decode_id_request(frame, command).map(|ids| {
                    let readings: Vec<ServoTarget> = ids
                        .iter()
                        .map(|&id| ServoTarget::new(id, self.position(id)))
                        .collect();
                    self.rx
                        .extend(protocol::encode_position_read_response(&readings));
                })
            }
            Command::BatteryVoltage => {
                let millivolts = self.battery_mv.unwrap_or(SIM_BATTERY_MV);
                self.rx
                    .extend(protocol::encode_battery_voltage_response(millivolts));
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Simulated controller rejected {:?} frame: {}", command, e);
        } else {
            debug!("Simulated controller handled {:?}", command);
        }
    }
}

impl BusPort for SimulatedController {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.rx.len())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(frame);

        loop {
            // Resync on the header if the stream starts with garbage
            match self.pending.windows(2).position(|w| w == HEADER) {
                Some(0) => {}
                Some(skip) => {
                    self.pending.drain(..skip);
                }
                None => {
                    let keep = usize::from(self.pending.last() == Some(&HEADER[0]));
                    let drop = self.pending.len() - keep;
                    self.pending.drain(..drop);
                    break;
                }
            }

            match protocol::frame_length(&self.pending) {
                Some(len) if len >= 4 && self.pending.len() >= len => {
                    let frame: Vec<u8> = self.pending.drain(..len).collect();
                    self.handle_frame(&frame);
                }
                Some(len) if len < 4 => {
                    self.pending.drain(..2);
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.rx.len() < buf.len() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        for byte in buf.iter_mut() {
            // length checked above
            *byte = self.rx.pop_front().unwrap_or_default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::bus::{BusTiming, ServoBus};

    #[test]
    fn test_move_then_read_back() {
        let mut bus = ServoBus::with_port(SimulatedController::new(), BusTiming::default());
        bus.move_servos(&[ServoTarget::new(6, 480), ServoTarget::new(5, 457)], 900)
            .unwrap();

        let positions = bus.read_positions(&[6, 5, 1]).unwrap();
        assert_eq!(positions.get(&6), Some(&480));
        assert_eq!(positions.get(&5), Some(&457));
        assert_eq!(positions.get(&1), Some(&SIM_REST_POSITION));
        assert_eq!(bus.port().moves().len(), 1);
        assert_eq!(bus.port().moves()[0].0, 900);
    }

    #[test]
    fn test_battery_and_unload() {
        let mut bus = ServoBus::with_port(SimulatedController::with_battery(6_800), BusTiming::default());
        let volts = bus.battery_voltage().unwrap();
        assert!((volts - 6.8).abs() < 1e-6);

        bus.unload(&[1, 2]).unwrap();
        assert!(bus.port().is_unloaded(1));
        assert!(bus.port().is_unloaded(2));
        assert!(!bus.port().is_unloaded(3));
    }

    #[test]
    fn test_resyncs_after_garbage_and_split_writes() {
        let mut sim = SimulatedController::new();
        let frame = protocol::encode_move(&[ServoTarget::new(4, 808)], 500);
        sim.write_frame(&[0x00, 0x13]).unwrap();
        sim.write_frame(&frame[..5]).unwrap();
        assert!(sim.moves().is_empty());
        sim.write_frame(&frame[5..]).unwrap();
        assert_eq!(sim.position(4), 808);
    }

    #[test]
    fn test_noise_is_flushed_before_requests() {
        let mut bus = ServoBus::with_port(SimulatedController::new(), BusTiming::default());
        bus.port_mut().inject_noise(&[0x55, 0x55, 0x04]);
        let volts = bus.battery_voltage().unwrap();
        assert!((volts - SIM_BATTERY_MV as f32 / 1000.0).abs() < 1e-6);
    }
}
