// Calibration maps for the arm joints and the chassis motors
// All values are empirical fits, not derived from a kinematic model.

use crate::config::{
    ANGULAR_SPEED, BASE_CALIBRATION, BASE_DUTY, ELBOW_CALIBRATION, LEFT_MOTOR_TRIM, LINEAR_SPEED,
    RIGHT_MOTOR_TRIM, SHOULDER_CALIBRATION, TURN_LEFT_RIGHT_BOOST, TURN_RIGHT_LEFT_BOOST,
};

/// Arm joints in the order they are moved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joint {
    Base,
    Shoulder,
    Elbow,
}

impl Joint {
    pub const ALL: [Joint; 3] = [Joint::Base, Joint::Shoulder, Joint::Elbow];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Linear map from joint angle (degrees) to servo pulse width (ns)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointCalibration {
    pub slope: f64,
    pub intercept: f64,
}

impl JointCalibration {
    pub const fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    pub fn for_joint(joint: Joint) -> Self {
        let (slope, intercept) = match joint {
            Joint::Base => BASE_CALIBRATION,
            Joint::Shoulder => SHOULDER_CALIBRATION,
            Joint::Elbow => ELBOW_CALIBRATION,
        };
        Self::new(slope, intercept)
    }

    /// Pulse width for an angle, truncated and clamped to the u32 range
    pub fn pulse_ns(&self, angle_deg: f64) -> u32 {
        let pulse = self.slope * angle_deg + self.intercept;
        pulse.clamp(0.0, u32::MAX as f64) as u32
    }
}

/// Correct the elbow target for the linkage coupling with the shoulder.
///
/// The fit only covers shoulder targets in (0, 90]; outside it the raw elbow is used.
pub fn correct_elbow(shoulder_deg: f64, elbow_deg: f64) -> f64 {
    if shoulder_deg == 90.0 {
        -elbow_deg + 90.0
    } else if shoulder_deg > 0.0 && shoulder_deg < 90.0 {
        -0.6429 * elbow_deg + 102.86
    } else {
        elbow_deg
    }
}

/// Open-loop chassis model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChassisCalibration {
    pub base_duty: u16,
    pub left_trim: f64,
    pub right_trim: f64,
    /// Right motor multiplier while turning left
    pub turn_left_boost: f64,
    /// Left motor multiplier while turning right
    pub turn_right_boost: f64,
    /// Distance units per second at base duty
    pub linear_speed: f64,
    /// Degrees per second when turning in place
    pub angular_speed: f64,
}

impl Default for ChassisCalibration {
    fn default() -> Self {
        Self {
            base_duty: BASE_DUTY,
            left_trim: LEFT_MOTOR_TRIM,
            right_trim: RIGHT_MOTOR_TRIM,
            turn_left_boost: TURN_LEFT_RIGHT_BOOST,
            turn_right_boost: TURN_RIGHT_LEFT_BOOST,
            linear_speed: LINEAR_SPEED,
            angular_speed: ANGULAR_SPEED,
        }
    }
}

impl ChassisCalibration {
    /// Baseline (left, right) duty after trim
    pub fn baseline(&self) -> (u16, u16) {
        self.boosted(1.0, 1.0)
    }

    /// (left, right) duty with temporary multipliers on top of the trim
    pub fn boosted(&self, left: f64, right: f64) -> (u16, u16) {
        let base = self.base_duty as f64;
        (
            to_duty(base * self.left_trim * left),
            to_duty(base * self.right_trim * right),
        )
    }

    /// Seconds needed to cover a distance
    pub fn travel_time_s(&self, distance: f64) -> f64 {
        distance / self.linear_speed
    }

    /// Seconds needed to turn an angle in place
    pub fn turn_time_s(&self, angle_deg: f64) -> f64 {
        angle_deg / self.angular_speed
    }
}

fn to_duty(value: f64) -> u16 {
    value.clamp(0.0, u16::MAX as f64) as u16
}
