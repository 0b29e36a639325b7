// Serial protocol for the PWM co-processor
//
// The co-processor owns the PWM timers and H-bridge pins; the runtime talks to it over
// a framed serial link:
// Packet format: [0xFF, 0xFF, Channel, Length, Instruction, Params..., Checksum]
// Every write is answered with a status packet: [0xFF, 0xFF, Channel, Length, Status, Checksum]

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::{ActuationError, MotorBus, ServoBus, Spin};

/// Default serial configuration for the bridge
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Channel id addressing the co-processor itself
pub const BRIDGE_ID: u8 = 0xFE;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    SetPulse = 0x10,     // u32 ns, little-endian
    SetDuty = 0x11,      // u16, little-endian
    SetDirection = 0x12, // u8: 0=stop, 1=forward, 2=backward
    Release = 0x13,
}

/// Error types for bridge communication
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response for channel {channel}: {reason}")]
    InvalidResponse { channel: u8, reason: String },

    #[error("Checksum mismatch for channel {channel}")]
    ChecksumMismatch { channel: u8 },

    #[error("Channel {channel} returned error status: 0x{status:02X}")]
    DeviceError { channel: u8, status: u8 },

    #[error("Timeout waiting for response on channel {channel}")]
    Timeout { channel: u8 },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Serial connection to the PWM co-processor
pub struct PwmBridge {
    port: Box<dyn SerialPort>,
}

impl PwmBridge {
    /// Connect at the default baudrate
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Second handle on the same port, so the arm and chassis can each own one
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self { port: self.port.try_clone()? })
    }

    /// Inverted low byte of the sum of channel, length, instruction and params
    fn checksum(frame: &[u8]) -> u8 {
        !frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    /// Frame one instruction for `channel`. Params are at most a u32, so the length fits a byte.
    fn build_packet(channel: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        // length counts the instruction byte, params and the trailing checksum
        let length = params.len() as u8 + 2;
        let mut packet = HEADER.to_vec();
        packet.extend([channel, length, instruction as u8]);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[HEADER.len()..]));
        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a status packet and return its parameters
    fn read_response(&mut self, expected: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BridgeError::Timeout { channel: expected }
            } else {
                BridgeError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(BridgeError::InvalidResponse {
                channel: expected,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut channel_length = [0u8; 2];
        self.port.read_exact(&mut channel_length)?;
        let channel = channel_length[0];
        let length = channel_length[1] as usize;

        if channel != expected {
            return Err(BridgeError::InvalidResponse {
                channel: expected,
                reason: format!("Channel mismatch: expected {}, got {}", expected, channel),
            });
        }
        if length < 2 {
            return Err(BridgeError::InvalidResponse {
                channel,
                reason: format!("Length {} too short for a status packet", length),
            });
        }

        // status + params + checksum
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining)?;
        validate_status(channel, &remaining)
    }

    /// Send one instruction and wait for its status packet
    fn transact(&mut self, channel: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = Self::build_packet(channel, instruction, params);
        debug!("Bridge {:?} on channel {}: {:02X?}", instruction, channel, params);
        self.send_packet(&packet)?;
        self.read_response(channel)
    }

    /// Check that the co-processor answers
    pub fn ping(&mut self) -> Result<bool> {
        match self.transact(BRIDGE_ID, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(BridgeError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_pulse(&mut self, channel: u8, pulse_ns: u32) -> Result<()> {
        self.transact(channel, Instruction::SetPulse, &pulse_ns.to_le_bytes())?;
        Ok(())
    }

    pub fn write_duty(&mut self, channel: u8, duty: u16) -> Result<()> {
        self.transact(channel, Instruction::SetDuty, &duty.to_le_bytes())?;
        Ok(())
    }

    pub fn write_direction(&mut self, channel: u8, spin: Spin) -> Result<()> {
        self.transact(channel, Instruction::SetDirection, &[spin as u8])?;
        Ok(())
    }

    pub fn write_release(&mut self, channel: u8) -> Result<()> {
        self.transact(channel, Instruction::Release, &[])?;
        Ok(())
    }
}

/// Check checksum and status byte of a status packet body, returning its parameters.
/// `body` is everything after the length byte.
fn validate_status(channel: u8, body: &[u8]) -> Result<Vec<u8>> {
    let (checksum, payload) = match body.split_last() {
        Some(split) => split,
        None => {
            return Err(BridgeError::InvalidResponse {
                channel,
                reason: "Empty status packet".to_string(),
            });
        }
    };

    let mut checksum_data = vec![channel, body.len() as u8];
    checksum_data.extend_from_slice(payload);
    if PwmBridge::checksum(&checksum_data) != *checksum {
        return Err(BridgeError::ChecksumMismatch { channel });
    }

    match payload.split_first() {
        Some((&0, params)) => Ok(params.to_vec()),
        Some((&status, _)) => Err(BridgeError::DeviceError { channel, status }),
        None => Err(BridgeError::InvalidResponse {
            channel,
            reason: "Missing status byte".to_string(),
        }),
    }
}

impl ServoBus for PwmBridge {
    fn set_pulse_ns(&mut self, channel: u8, pulse_ns: u32) -> std::result::Result<(), ActuationError> {
        Ok(self.write_pulse(channel, pulse_ns)?)
    }

    fn release(&mut self, channel: u8) -> std::result::Result<(), ActuationError> {
        Ok(self.write_release(channel)?)
    }
}

impl MotorBus for PwmBridge {
    fn set_duty(&mut self, channel: u8, duty: u16) -> std::result::Result<(), ActuationError> {
        Ok(self.write_duty(channel, duty)?)
    }

    fn set_spin(&mut self, channel: u8, spin: Spin) -> std::result::Result<(), ActuationError> {
        Ok(self.write_direction(channel, spin)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // Channel=1, Length=4, Instruction=SET_DUTY, Duty=0x0200
        let data = [1u8, 4, 0x11, 0x00, 0x02];
        // ~(1+4+17+0+2) = ~24 = 231
        assert_eq!(PwmBridge::checksum(&data), 231);
        // Only the low byte of the sum counts
        assert_eq!(PwmBridge::checksum(&[0xFF, 0x02]), 0xFE);
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = PwmBridge::build_packet(BRIDGE_ID, Instruction::Ping, &[]);
        // Header (2) + Channel (1) + Length (1) + Instruction (1) + Checksum (1) = 6 bytes
        assert_eq!(packet.len(), 6);
        assert_eq!(&packet[..2], &HEADER);
        assert_eq!(packet[2], BRIDGE_ID);
        assert_eq!(packet[3], 2); // Length (instruction + checksum)
        assert_eq!(packet[4], 0x01);
    }

    #[test]
    fn test_build_pulse_packet() {
        let packet = PwmBridge::build_packet(2, Instruction::SetPulse, &1_500_000u32.to_le_bytes());
        assert_eq!(packet.len(), 10);
        assert_eq!(packet[3], 6);
        assert_eq!(&packet[5..9], &[0x60, 0xE3, 0x16, 0x00]);
        assert_eq!(packet[9], PwmBridge::checksum(&packet[2..9]));
    }

    #[test]
    fn test_validate_status_ok() {
        // Body: status=0, checksum over [channel, length, status]
        let checksum = PwmBridge::checksum(&[3, 2, 0]);
        assert_eq!(validate_status(3, &[0, checksum]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_validate_status_errors() {
        let checksum = PwmBridge::checksum(&[3, 2, 0x04]);
        assert!(matches!(
            validate_status(3, &[0x04, checksum]),
            Err(BridgeError::DeviceError { channel: 3, status: 0x04 })
        ));
        assert!(matches!(
            validate_status(3, &[0, 0x00]),
            Err(BridgeError::ChecksumMismatch { channel: 3 })
        ));
    }
}
