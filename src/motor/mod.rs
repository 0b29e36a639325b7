// Actuation layer for the rover chassis and arm
//
// Provides:
// - Joint calibration and shoulder-elbow coupling correction
// - Framed serial protocol for the PWM co-processor
// - Arm and chassis drivers on top of the ServoBus / MotorBus traits
// - An in-memory bus for simulation and tests

pub mod arm;
pub mod bridge;
pub mod calibration;
pub mod chassis;
pub mod sim;

pub use arm::{ArmDriver, ArmPose};
pub use bridge::{BridgeError, PwmBridge};
pub use calibration::{ChassisCalibration, Joint, JointCalibration, correct_elbow};
pub use chassis::ChassisDriver;
pub use sim::{BusEvent, SimBus};

/// Rotation command for one H-bridge channel
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spin {
    Stop = 0,
    Forward = 1,
    Backward = 2,
}

/// Errors raised while driving the hardware
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    #[error("PWM bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Expected exactly 3 joint angles, got {got}")]
    InvalidAngleCount { got: usize },

    #[error("Channel {channel} rejected the write: {reason}")]
    Rejected { channel: u8, reason: String },
}

/// Servo outputs driven by pulse width
pub trait ServoBus {
    fn set_pulse_ns(&mut self, channel: u8, pulse_ns: u32) -> Result<(), ActuationError>;

    /// Stop generating pulses on a channel so the servo goes limp
    fn release(&mut self, channel: u8) -> Result<(), ActuationError>;
}

/// DC motor outputs: a duty cycle plus direction pins per channel
pub trait MotorBus {
    /// Duty cycle in 0..=65535
    fn set_duty(&mut self, channel: u8, duty: u16) -> Result<(), ActuationError>;

    fn set_spin(&mut self, channel: u8, spin: Spin) -> Result<(), ActuationError>;
}
