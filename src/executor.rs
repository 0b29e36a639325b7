// Sequential execution of parsed Commands
//
// Each step runs the arm move (if any), then the chassis leg(s), then stops the chassis
// no matter how the step ended. The first failing step aborts the rest of the sequence.

use tracing::{error, info, warn};

use crate::clock::{Clock, secs};
use crate::messages::{Command, Direction, MotionKind, TurnDirection};
use crate::motor::{ActuationError, ArmDriver, ArmPose, ChassisDriver, MotorBus, ServoBus};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Step Paso_{step} failed: {source}")]
    ActuationFailure {
        step: u64,
        #[source]
        source: ActuationError,
    },
}

pub struct MotionExecutor<S: ServoBus, M: MotorBus, C: Clock> {
    arm: ArmDriver<S, C>,
    chassis: ChassisDriver<M, C>,
    clock: C,
    pose: ArmPose,
}

impl<S: ServoBus, M: MotorBus, C: Clock + Clone> MotionExecutor<S, M, C> {
    /// Build the drivers around the given buses. The arm is assumed to be at its home pose.
    pub fn new(servo_bus: S, motor_bus: M, clock: C) -> Result<Self, ActuationError> {
        let chassis = ChassisDriver::new(motor_bus, clock.clone())?;
        let arm = ArmDriver::new(servo_bus, clock.clone());
        Ok(Self::from_drivers(arm, chassis, clock, ArmPose::home()))
    }
}

impl<S: ServoBus, M: MotorBus, C: Clock> MotionExecutor<S, M, C> {
    pub fn from_drivers(
        arm: ArmDriver<S, C>,
        chassis: ChassisDriver<M, C>,
        clock: C,
        pose: ArmPose,
    ) -> Self {
        Self { arm, chassis, clock, pose }
    }

    /// Drive the arm to its start-up pose
    pub fn home(&mut self) -> Result<(), ActuationError> {
        self.pose = self.arm.home(&self.pose)?;
        Ok(())
    }

    /// Execute every command in order. Returns the number of steps completed.
    pub fn run(&mut self, commands: &[Command]) -> Result<usize, ExecutionError> {
        for (i, command) in commands.iter().enumerate() {
            info!("--- Step {} ({}) ---", i + 1, command.label());

            let outcome = self.execute_step(command);
            let stopped = self.chassis.stop();

            if let Err(source) = outcome {
                if let Err(e) = stopped {
                    warn!("Stop after failed step also failed: {}", e);
                }
                error!("Aborting sequence at {}: {}", command.label(), source);
                return Err(ExecutionError::ActuationFailure { step: command.step, source });
            }
            stopped.map_err(|source| ExecutionError::ActuationFailure { step: command.step, source })?;
        }

        info!("All {} steps completed", commands.len());
        Ok(commands.len())
    }

    fn execute_step(&mut self, command: &Command) -> Result<(), ActuationError> {
        if let Some(arm) = &command.arm {
            info!("Positioning arm at {:?} over {}s", arm.angles, arm.duration_s);
            self.pose = self.arm.move_to(&self.pose, &arm.angles, arm.duration_s)?;
            self.clock.sleep(secs(arm.duration_s));
        }

        if command.kind == MotionKind::TurnThenStraight {
            self.turn(command)?;
        }

        self.straight_leg(command)
    }

    fn turn(&mut self, command: &Command) -> Result<(), ActuationError> {
        if command.turn_angle_abs <= 0.0 {
            info!("{}: zero turn angle, no turn", command.label());
            return Ok(());
        }
        let Some(direction) = command.turn_direction else {
            warn!(
                "{}: turn of {}° has no direction, skipping turn",
                command.label(),
                command.turn_angle_abs
            );
            return Ok(());
        };

        info!(
            "Turning {:?} {}° at {}°/s",
            direction, command.turn_angle_abs, command.turn_speed
        );
        match direction {
            TurnDirection::Left => self.chassis.turn_left(command.turn_angle_abs)?,
            TurnDirection::Right => self.chassis.turn_right(command.turn_angle_abs)?,
        }

        let wait = command.turn_duration_s();
        info!("Estimated turn time: {:.1}s", wait);
        self.clock.sleep(secs(wait));
        Ok(())
    }

    fn straight_leg(&mut self, command: &Command) -> Result<(), ActuationError> {
        if command.distance_abs <= 0.0 {
            info!("{}: zero distance, no straight motion", command.label());
            return Ok(());
        }

        info!(
            "Driving {:?} {} at {}/s",
            command.direction, command.distance_abs, command.speed
        );
        match command.direction {
            Direction::Forward => self.chassis.forward(command.distance_abs)?,
            Direction::Backward => self.chassis.backward(command.distance_abs)?,
        }

        let wait = command.straight_duration_s();
        info!("Estimated travel time: {:.1}s", wait);
        self.clock.sleep(secs(wait));
        Ok(())
    }

    /// Stop the chassis and release the arm servos
    pub fn shutdown(&mut self) {
        if let Err(e) = self.chassis.stop() {
            warn!("Failed to stop chassis on shutdown: {}", e);
        }
        self.arm.power_off();
    }

    /// Current arm pose (elbow corrected)
    pub fn pose(&self) -> ArmPose {
        self.pose
    }
}
