// Message types shared by the parser, executor and runtime

use serde::{Deserialize, Serialize};

/// Chassis motion shape of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    Straight,
    TurnThenStraight,
}

/// Direction of the straight leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// Direction of an in-place turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Left,
    Right,
}

/// Target arm pose of a step (base, shoulder, raw elbow) and the time to reach it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmMove {
    pub angles: [f64; 3],
    pub duration_s: f64,
}

/// One validated, normalized step of a maneuver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Numeric index n of the `Paso_<n>` key
    pub step: u64,
    pub kind: MotionKind,
    pub distance_abs: f64,
    pub direction: Direction,
    pub speed: f64,
    pub turn_angle_abs: f64,
    pub turn_direction: Option<TurnDirection>,
    pub turn_speed: f64,
    pub arm: Option<ArmMove>,
}

impl Command {
    /// Modeled time of the straight leg in seconds (0 when speed is not positive)
    pub fn straight_duration_s(&self) -> f64 {
        modeled_duration(self.distance_abs, self.speed)
    }

    /// Modeled time of the turn in seconds (0 when turn speed is not positive)
    pub fn turn_duration_s(&self) -> f64 {
        modeled_duration(self.turn_angle_abs, self.turn_speed)
    }

    /// Label of the step as it appears in the document
    pub fn label(&self) -> String {
        format!("Paso_{}", self.step)
    }
}

fn modeled_duration(amount: f64, rate: f64) -> f64 {
    if rate > 0.0 { amount / rate } else { 0.0 }
}

/// Status published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Idle,
    Executing,
    Completed,
    Rejected,
    Aborted,
}

/// A line of text for the status display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight(distance_abs: f64, speed: f64) -> Command {
        Command {
            step: 1,
            kind: MotionKind::Straight,
            distance_abs,
            direction: Direction::Forward,
            speed,
            turn_angle_abs: 0.0,
            turn_direction: None,
            turn_speed: 0.0,
            arm: None,
        }
    }

    #[test]
    fn test_straight_duration() {
        assert_eq!(straight(100.0, 25.0).straight_duration_s(), 4.0);
    }

    #[test]
    fn test_zero_or_negative_speed_gives_zero_duration() {
        assert_eq!(straight(100.0, 0.0).straight_duration_s(), 0.0);
        assert_eq!(straight(100.0, -10.0).straight_duration_s(), 0.0);
    }

    #[test]
    fn test_turn_duration() {
        let cmd = Command {
            kind: MotionKind::TurnThenStraight,
            turn_angle_abs: 90.0,
            turn_direction: Some(TurnDirection::Left),
            turn_speed: 60.0,
            ..straight(0.0, 0.0)
        };
        assert_eq!(cmd.turn_duration_s(), 1.5);
        assert_eq!(cmd.label(), "Paso_1");
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RuntimeStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
