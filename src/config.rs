// Timeouts, topics, calibration constants and command line overrides
use clap::Parser;

// Receive loop frequency (documents are polled, never awaited)
pub const LOOP_HZ: u64 = 10;

// Zenoh topics
pub const TOPIC_CMD_SEQUENCE: &str = "rover/cmd/sequence"; // step-sequence documents
pub const TOPIC_STATUS: &str = "rover/state/status"; // runtime status
pub const TOPIC_DISPLAY: &str = "rover/display/text"; // status display lines

// Serial port of the PWM co-processor driving servos and motors
pub const BRIDGE_PORT: &str = "/dev/ttyACM0";

// Bridge channels
pub const CHANNEL_BASE: u8 = 0;
pub const CHANNEL_SHOULDER: u8 = 1;
pub const CHANNEL_ELBOW: u8 = 2;
pub const CHANNEL_MOTOR_LEFT: u8 = 8;
pub const CHANNEL_MOTOR_RIGHT: u8 = 9;

// Joint calibration: pulse_ns = slope * angle_deg + intercept
pub const BASE_CALIBRATION: (f64, f64) = (-9717.0, 1_532_862.0);
pub const SHOULDER_CALIBRATION: (f64, f64) = (-11111.0, 1_550_000.0);
pub const ELBOW_CALIBRATION: (f64, f64) = (-11668.0, 1_550_000.0);

// Interpolation samples per joint move
pub const INTERPOLATION_STEPS: u32 = 1000;

// Default servo move time when a step omits t_ser (seconds)
pub const DEFAULT_ARM_DURATION_S: f64 = 1.0;

// Chassis duty cycle baseline (0-65535) and per-motor trim.
// Lower a trim if the rover drifts towards the other side on straight runs.
pub const BASE_DUTY: u16 = 40_000;
pub const LEFT_MOTOR_TRIM: f64 = 0.75;
pub const RIGHT_MOTOR_TRIM: f64 = 1.00;

// Temporary boosts applied while turning
pub const TURN_LEFT_RIGHT_BOOST: f64 = 1.5;
pub const TURN_RIGHT_LEFT_BOOST: f64 = 1.2;

// Open-loop speed model at BASE_DUTY.
// Undershooting targets means the constant is too high, overshooting means too low.
pub const LINEAR_SPEED: f64 = 25.0; // distance units per second
pub const ANGULAR_SPEED: f64 = 120.0; // degrees per second

// Turn speed used when a step omits vel_grados_s (degrees per second)
pub const DEFAULT_TURN_SPEED: f64 = 60.0;

/// Command line overrides for the runtime
#[derive(Debug, Clone, Parser)]
#[command(version, about = "Executes rover step sequences received over zenoh")]
pub struct Args {
    /// Serial port of the PWM bridge
    #[arg(long, default_value = BRIDGE_PORT)]
    pub port: String,

    /// Run against the in-memory bus instead of hardware
    #[arg(long)]
    pub simulate: bool,

    /// Only accept documents whose `ip_destino` matches this address
    #[arg(long)]
    pub address: Option<String>,

    #[arg(long, default_value = TOPIC_CMD_SEQUENCE)]
    pub cmd_topic: String,

    #[arg(long, default_value = TOPIC_STATUS)]
    pub status_topic: String,

    /// Topic for display lines. Empty writes them to the log instead.
    #[arg(long, default_value = TOPIC_DISPLAY)]
    pub display_topic: String,
}
