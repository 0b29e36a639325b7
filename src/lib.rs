// Rover maneuver runtime
//
// Receives step-sequence documents, validates them into Commands and executes them
// open-loop on a differential-drive chassis and a 3-joint arm.

pub mod clock;
pub mod config;
pub mod display;
pub mod executor;
pub mod messages;
pub mod motor;
pub mod parser;
pub mod runtime;
pub mod transport;
