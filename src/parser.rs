// Step-sequence document parser
//
// Turns a `{"Carro_<id>": {"Paso_<n>": {...}}}` document into an ordered list of
// validated Commands. Validation is all-or-nothing: the first invalid step rejects the
// whole document.

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{DEFAULT_ARM_DURATION_S, DEFAULT_TURN_SPEED};
use crate::messages::{ArmMove, Command, Direction, MotionKind, TurnDirection};

const CAR_PREFIX: &str = "Carro_";
const STEP_PREFIX: &str = "Paso_";

const MOVEMENT: &str = "Movimiento";
const DISTANCE: &str = "distancia_mm";
const SPEED: &str = "velocidad_mm_s";
const RADIUS: &str = "radio_mm";
const TURN_SPEED: &str = "vel_grados_s";

const ARM: &str = "Brazo";
const ARM_ANGLES: [&str; 3] = ["angulo0_grados", "angulo1_grados", "angulo2_grados"];
const ARM_DURATION: &str = "t_ser";

/// Reasons a document is rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Document is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Document has no 'Carro_<id>' key")]
    MissingCarKey,

    #[error("Document has several car keys: {}", keys.join(", "))]
    AmbiguousCarKey { keys: Vec<String> },

    #[error("'{car}' contains no steps")]
    EmptySequence { car: String },

    #[error("Step key '{key}' does not end in a step number")]
    InvalidStepKey { key: String },

    #[error("Step keys '{first}' and '{second}' have the same number")]
    DuplicateStep { first: String, second: String },

    #[error("{step}: missing 'Movimiento'")]
    MissingMovimiento { step: String },

    #[error("{step}: 'Movimiento' is missing '{field}'")]
    MissingMovementField { step: String, field: &'static str },

    #[error("{step}: '{field}' must be a number")]
    NonNumericField { step: String, field: &'static str },

    #[error("{step}: 'radio_mm' must be \"inf\" or a number of degrees")]
    InvalidRadius { step: String },

    #[error("{step}: 'Brazo' is missing '{field}'")]
    MissingArmField { step: String, field: &'static str },

    #[error("{step}: arm angle '{field}' must be a number")]
    NonNumericArmAngle { step: String, field: &'static str },
}

impl ParseError {
    /// Short name of the failure, for the status display
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::InvalidJson(_) => "InvalidJson",
            ParseError::MissingCarKey => "MissingCarKey",
            ParseError::AmbiguousCarKey { .. } => "AmbiguousCarKey",
            ParseError::EmptySequence { .. } => "EmptySequence",
            ParseError::InvalidStepKey { .. } => "InvalidStepKey",
            ParseError::DuplicateStep { .. } => "DuplicateStep",
            ParseError::MissingMovimiento { .. } => "MissingMovimiento",
            ParseError::MissingMovementField { .. } => "MissingMovementField",
            ParseError::NonNumericField { .. } => "NonNumericField",
            ParseError::InvalidRadius { .. } => "InvalidRadius",
            ParseError::MissingArmField { .. } => "MissingArmField",
            ParseError::NonNumericArmAngle { .. } => "NonNumericArmAngle",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Decode and parse a raw payload
pub fn parse_slice(payload: &[u8]) -> Result<Vec<Command>> {
    let document: Value =
        serde_json::from_slice(payload).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    parse(&document)
}

/// Parse a decoded document into Commands ordered by step number
pub fn parse(document: &Value) -> Result<Vec<Command>> {
    let (car, steps) = select_car(document)?;

    let steps = match steps.as_object() {
        Some(steps) => steps,
        None => return Err(ParseError::EmptySequence { car: car.to_string() }),
    };

    let ordered = order_steps(steps)?;
    if ordered.is_empty() {
        return Err(ParseError::EmptySequence { car: car.to_string() });
    }

    let commands = ordered
        .into_iter()
        .map(|(n, key, body)| parse_step(n, key, body))
        .collect::<Result<Vec<_>>>()?;

    debug!("Parsed {} steps for {}", commands.len(), car);
    Ok(commands)
}

/// Find the single `Carro_<id>` entry
fn select_car(document: &Value) -> Result<(&str, &Value)> {
    let root = document.as_object().ok_or(ParseError::MissingCarKey)?;

    let mut cars = root.iter().filter(|(key, _)| key.starts_with(CAR_PREFIX));
    let (key, steps) = cars.next().ok_or(ParseError::MissingCarKey)?;

    let extra: Vec<String> = cars.map(|(k, _)| k.clone()).collect();
    if !extra.is_empty() {
        let mut keys = vec![key.clone()];
        keys.extend(extra);
        return Err(ParseError::AmbiguousCarKey { keys });
    }

    Ok((key.as_str(), steps))
}

/// Collect `Paso_<n>` entries sorted by n
fn order_steps(steps: &Map<String, Value>) -> Result<Vec<(u64, &str, &Value)>> {
    let mut ordered = Vec::with_capacity(steps.len());

    for (key, body) in steps {
        let Some(number) = key.strip_prefix(STEP_PREFIX) else {
            debug!("Ignoring non-step key '{}'", key);
            continue;
        };
        let n = number
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidStepKey { key: key.clone() })?;
        ordered.push((n, key.as_str(), body));
    }

    ordered.sort_by_key(|&(n, _, _)| n);

    if let Some(pair) = ordered.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(ParseError::DuplicateStep {
            first: pair[0].1.to_string(),
            second: pair[1].1.to_string(),
        });
    }

    Ok(ordered)
}

fn parse_step(n: u64, label: &str, body: &Value) -> Result<Command> {
    let movement = body
        .get(MOVEMENT)
        .and_then(Value::as_object)
        .ok_or_else(|| ParseError::MissingMovimiento { step: label.to_string() })?;

    for field in [DISTANCE, SPEED, RADIUS] {
        if !movement.contains_key(field) {
            return Err(ParseError::MissingMovementField { step: label.to_string(), field });
        }
    }

    let distance = number(movement, DISTANCE, label)?;
    let speed = number(movement, SPEED, label)?;

    let (kind, turn_angle_abs, turn_direction, turn_speed) = match movement.get(RADIUS) {
        Some(Value::String(s)) if s.eq_ignore_ascii_case("inf") => {
            (MotionKind::Straight, 0.0, None, 0.0)
        }
        Some(Value::Number(radius)) => {
            let radius = radius.as_f64().unwrap_or_default();
            let direction = if radius < 0.0 { TurnDirection::Left } else { TurnDirection::Right };
            let turn_speed = match movement.get(TURN_SPEED) {
                Some(_) => number(movement, TURN_SPEED, label)?,
                None => DEFAULT_TURN_SPEED,
            };
            (MotionKind::TurnThenStraight, radius.abs(), Some(direction), turn_speed)
        }
        _ => return Err(ParseError::InvalidRadius { step: label.to_string() }),
    };

    let arm = match body.get(ARM) {
        Some(arm) => Some(parse_arm(arm, label)?),
        None => None,
    };

    Ok(Command {
        step: n,
        kind,
        distance_abs: distance.abs(),
        direction: if distance < 0.0 { Direction::Backward } else { Direction::Forward },
        speed,
        turn_angle_abs,
        turn_direction,
        turn_speed,
        arm,
    })
}

fn parse_arm(arm: &Value, label: &str) -> Result<ArmMove> {
    let mut angles = [0.0; 3];

    for (slot, field) in angles.iter_mut().zip(ARM_ANGLES) {
        let value = arm
            .get(field)
            .ok_or_else(|| ParseError::MissingArmField { step: label.to_string(), field })?;
        *slot = value
            .as_f64()
            .ok_or_else(|| ParseError::NonNumericArmAngle { step: label.to_string(), field })?;
    }

    let duration_s = match arm.get(ARM_DURATION) {
        Some(value) => value.as_f64().ok_or_else(|| ParseError::NonNumericField {
            step: label.to_string(),
            field: ARM_DURATION,
        })?,
        None => DEFAULT_ARM_DURATION_S,
    };

    Ok(ArmMove { angles, duration_s })
}

fn number(object: &Map<String, Value>, field: &'static str, label: &str) -> Result<f64> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| ParseError::NonNumericField { step: label.to_string(), field })
}
