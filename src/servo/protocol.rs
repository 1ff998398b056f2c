// Hiwonder serial bus servo controller protocol
//
// Frame format: [0x55, 0x55, Length, Command, Params...]
// Length counts itself, the command byte and the params (params + 2).
// There is no checksum and no per-frame servo id: the controller board
// fans commands out to the servos on its own bus.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ArmError, Result};

/// Packet header bytes
pub const HEADER: [u8; 2] = [0x55, 0x55];

/// Battery voltage response: header, length, command, voltage lo/hi
pub const BATTERY_RESPONSE_LEN: usize = 6;

/// Largest servo count whose move frame still fits the 8-bit length field
pub const MAX_SERVOS_PER_MOVE: usize = (u8::MAX as usize - 5) / 3;

/// Controller command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ServoMove = 0x03,
    BatteryVoltage = 0x0F,
    MultiServoUnload = 0x14,
    MultiServoPositionRead = 0x15,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = ArmError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x03 => Ok(Command::ServoMove),
            0x0F => Ok(Command::BatteryVoltage),
            0x14 => Ok(Command::MultiServoUnload),
            0x15 => Ok(Command::MultiServoPositionRead),
            other => Err(ArmError::protocol(format!(
                "unknown command code 0x{:02X}",
                other
            ))),
        }
    }
}

/// One (servo id, raw position) entry of a move frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoTarget {
    pub id: u8,
    pub position: u16,
}

impl ServoTarget {
    pub fn new(id: u8, position: u16) -> Self {
        Self { id, position }
    }

    /// Truncate wider integers to the low 8/16 bits, exactly as the
    /// controller firmware would see them on the wire.
    pub fn masked(id: i64, position: i64) -> Self {
        Self {
            id: (id & 0xFF) as u8,
            position: (position & 0xFFFF) as u16,
        }
    }
}

/// Expected length of a position read response for `count` servos
pub fn position_response_len(count: usize) -> usize {
    count * 3 + 5
}

/// Total frame size announced by the header at the start of `buf`, if any
pub fn frame_length(buf: &[u8]) -> Option<usize> {
    if buf.len() < 3 || buf[..2] != HEADER {
        return None;
    }
    Some(buf[2] as usize + HEADER.len())
}

/// Build a frame with header and length byte
fn build_packet(command: Command, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(((params.len() + 2) & 0xFF) as u8);
    packet.push(command.code());
    packet.extend_from_slice(params);
    packet
}

/// Move several servos to raw positions over a shared duration.
///
/// All servos in one frame start moving together.
pub fn encode_move(targets: &[ServoTarget], duration_ms: u16) -> Vec<u8> {
    let mut params = Vec::with_capacity(3 + targets.len() * 3);
    params.push((targets.len() & 0xFF) as u8);
    params.extend_from_slice(&duration_ms.to_le_bytes());
    for target in targets {
        params.push(target.id);
        params.extend_from_slice(&target.position.to_le_bytes());
    }
    build_packet(Command::ServoMove, &params)
}

/// Validating variant of [`encode_move`]: rejects values that would be
/// silently truncated instead of masking them.
pub fn encode_move_checked(targets: &[(i64, i64)], duration_ms: i64) -> Result<Vec<u8>> {
    if targets.is_empty() {
        return Err(ArmError::invalid("move needs at least one servo"));
    }
    if targets.len() > MAX_SERVOS_PER_MOVE {
        return Err(ArmError::invalid(format!(
            "{} servos exceed the {} per move frame limit",
            targets.len(),
            MAX_SERVOS_PER_MOVE
        )));
    }
    let duration_ms = u16::try_from(duration_ms)
        .map_err(|_| ArmError::invalid(format!("duration {}ms out of range", duration_ms)))?;

    let checked = targets
        .iter()
        .map(|&(id, position)| {
            let id = u8::try_from(id)
                .map_err(|_| ArmError::invalid(format!("servo id {} out of range", id)))?;
            let position = u16::try_from(position).map_err(|_| {
                ArmError::invalid(format!("servo {} position {} out of range", id, position))
            })?;
            Ok(ServoTarget::new(id, position))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(encode_move(&checked, duration_ms))
}

/// Power off the motors of several servos
pub fn encode_unload(ids: &[u8]) -> Vec<u8> {
    build_packet(Command::MultiServoUnload, &id_list(ids))
}

/// Ask the controller for the present raw position of several servos
pub fn encode_position_read_request(ids: &[u8]) -> Vec<u8> {
    build_packet(Command::MultiServoPositionRead, &id_list(ids))
}

pub fn encode_battery_voltage_request() -> Vec<u8> {
    build_packet(Command::BatteryVoltage, &[])
}

fn id_list(ids: &[u8]) -> Vec<u8> {
    let mut params = Vec::with_capacity(1 + ids.len());
    params.push((ids.len() & 0xFF) as u8);
    params.extend_from_slice(ids);
    params
}

/// Check header and command code of a received frame
fn check_frame(bytes: &[u8], command: Command) -> Result<()> {
    if bytes.len() < 4 {
        return Err(ArmError::protocol(format!(
            "{:?} frame too short: {} bytes",
            command,
            bytes.len()
        )));
    }
    if bytes[..2] != HEADER {
        return Err(ArmError::protocol(format!(
            "invalid header: {:02X?}",
            &bytes[..2]
        )));
    }
    if bytes[3] != command.code() {
        return Err(ArmError::protocol(format!(
            "command mismatch: expected 0x{:02X}, got 0x{:02X}",
            command.code(),
            bytes[3]
        )));
    }
    Ok(())
}

fn check_len(bytes: &[u8], expected: usize, command: Command) -> Result<()> {
    if bytes.len() != expected {
        return Err(ArmError::protocol(format!(
            "{:?} response length mismatch: expected {}, got {}",
            command,
            expected,
            bytes.len()
        )));
    }
    Ok(())
}

/// Decode a position read response into id -> raw position
pub fn decode_position_read_response(
    bytes: &[u8],
    expected_ids: &[u8],
) -> Result<BTreeMap<u8, u16>> {
    let command = Command::MultiServoPositionRead;
    check_len(bytes, position_response_len(expected_ids.len()), command)?;
    check_frame(bytes, command)?;

    if bytes[4] as usize != expected_ids.len() {
        return Err(ArmError::protocol(format!(
            "position count mismatch: expected {}, got {}",
            expected_ids.len(),
            bytes[4]
        )));
    }

    let mut positions = BTreeMap::new();
    for (i, &id) in expected_ids.iter().enumerate() {
        let offset = 6 + 3 * i;
        let echoed = bytes[offset - 1];
        if echoed != id {
            return Err(ArmError::protocol(format!(
                "position slot {} belongs to servo {}, expected {}",
                i, echoed, id
            )));
        }
        positions.insert(id, u16::from_le_bytes([bytes[offset], bytes[offset + 1]]));
    }
    Ok(positions)
}

/// Decode a battery voltage response, in volts
pub fn decode_battery_voltage_response(bytes: &[u8]) -> Result<f32> {
    let command = Command::BatteryVoltage;
    check_len(bytes, BATTERY_RESPONSE_LEN, command)?;
    check_frame(bytes, command)?;
    let millivolts = u16::from_le_bytes([bytes[4], bytes[5]]);
    Ok(millivolts as f32 / 1000.0)
}

/// Decode a move frame back into its duration and targets
pub fn decode_move(bytes: &[u8]) -> Result<(u16, Vec<ServoTarget>)> {
    let command = Command::ServoMove;
    check_frame(bytes, command)?;
    if bytes.len() < 7 {
        return Err(ArmError::protocol("move frame too short"));
    }
    let count = bytes[4] as usize;
    check_len(bytes, count * 3 + 7, command)?;
    if bytes[2] as usize != (count * 3 + 5) & 0xFF {
        return Err(ArmError::protocol(format!(
            "move length byte {} does not match {} servos",
            bytes[2], count
        )));
    }

    let duration_ms = u16::from_le_bytes([bytes[5], bytes[6]]);
    let targets = bytes[7..]
        .chunks_exact(3)
        .map(|chunk| ServoTarget::new(chunk[0], u16::from_le_bytes([chunk[1], chunk[2]])))
        .collect();
    Ok((duration_ms, targets))
}

/// Decode the id list of an unload or position read request
pub fn decode_id_request(bytes: &[u8], command: Command) -> Result<Vec<u8>> {
    check_frame(bytes, command)?;
    if bytes.len() < 5 {
        return Err(ArmError::protocol(format!("{:?} frame too short", command)));
    }
    let count = bytes[4] as usize;
    check_len(bytes, count + 5, command)?;
    Ok(bytes[5..].to_vec())
}

/// Controller side: battery voltage response frame
pub fn encode_battery_voltage_response(millivolts: u16) -> Vec<u8> {
    build_packet(Command::BatteryVoltage, &millivolts.to_le_bytes())
}

/// Controller side: position read response frame
pub fn encode_position_read_response(positions: &[ServoTarget]) -> Vec<u8> {
    let mut params = Vec::with_capacity(1 + positions.len() * 3);
    params.push((positions.len() & 0xFF) as u8);
    for reading in positions {
        params.push(reading.id);
        params.extend_from_slice(&reading.position.to_le_bytes());
    }
    build_packet(Command::MultiServoPositionRead, &params)
}
