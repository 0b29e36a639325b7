// Three-joint arm driver
//
// Moves base, shoulder and elbow one after another with bounded-step linear
// interpolation. The current pose is not stored here: callers pass it in and get the
// new pose back once every joint has finished.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::calibration::{Joint, JointCalibration, correct_elbow};
use super::{ActuationError, ServoBus};
use crate::clock::{Clock, secs};
use crate::config::{CHANNEL_BASE, CHANNEL_ELBOW, CHANNEL_SHOULDER, INTERPOLATION_STEPS};

/// Joint angles in degrees, elbow stored after coupling correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmPose {
    pub angles: [f64; 3],
}

impl ArmPose {
    /// Raw homing target. With the shoulder at 90 the elbow corrects to 90.
    pub const HOME_TARGET: [f64; 3] = [0.0, 90.0, 0.0];

    /// Pose the arm is assumed to be in at power-up, before homing
    pub fn home() -> Self {
        Self { angles: [0.0, 90.0, correct_elbow(90.0, 90.0)] }
    }
}

/// Output channel and calibration of one joint
#[derive(Debug, Clone, Copy)]
struct JointOutput {
    joint: Joint,
    channel: u8,
    calibration: JointCalibration,
}

pub struct ArmDriver<S: ServoBus, C: Clock> {
    bus: S,
    clock: C,
    joints: [JointOutput; 3],
}

impl<S: ServoBus, C: Clock> ArmDriver<S, C> {
    /// Driver on the default channels and calibration
    pub fn new(bus: S, clock: C) -> Self {
        Self::with_channels(bus, clock, [CHANNEL_BASE, CHANNEL_SHOULDER, CHANNEL_ELBOW])
    }

    pub fn with_channels(bus: S, clock: C, channels: [u8; 3]) -> Self {
        let joints = Joint::ALL.map(|joint| JointOutput {
            joint,
            channel: channels[joint.index()],
            calibration: JointCalibration::for_joint(joint),
        });
        Self { bus, clock, joints }
    }

    /// Move to `angles` (base, shoulder, raw elbow), spending `duration_s` on each joint.
    ///
    /// Returns the pose to use for the next move. On error the caller should keep
    /// `current`, since no joint is known to have reached its target.
    pub fn move_to(
        &mut self,
        current: &ArmPose,
        angles: &[f64],
        duration_s: f64,
    ) -> Result<ArmPose, ActuationError> {
        let &[base, shoulder, elbow] = angles else {
            return Err(ActuationError::InvalidAngleCount { got: angles.len() });
        };

        let target = [base, shoulder, correct_elbow(shoulder, elbow)];
        let step_delay = secs(duration_s) / INTERPOLATION_STEPS;

        info!(
            "Moving arm from {:?} to {:?} ({:.2}s per joint)",
            current.angles, target, duration_s
        );

        for output in self.joints {
            let index = output.joint.index();
            self.sweep(output, current.angles[index], target[index], step_delay)?;
        }

        Ok(ArmPose { angles: target })
    }

    /// Drive the servos to the start-up pose, ending at [0, 90, 90]
    pub fn home(&mut self, current: &ArmPose) -> Result<ArmPose, ActuationError> {
        self.move_to(current, &ArmPose::HOME_TARGET, 1.0)
    }

    /// Release all servos. Failures are logged and the remaining channels still released.
    pub fn power_off(&mut self) {
        info!("Releasing arm servos");
        for output in self.joints {
            if let Err(e) = self.bus.release(output.channel) {
                warn!("Failed to release {:?} servo: {}", output.joint, e);
            }
        }
    }

    /// Interpolate one joint from `from` to `to` in INTERPOLATION_STEPS increments
    fn sweep(
        &mut self,
        output: JointOutput,
        from: f64,
        to: f64,
        step_delay: Duration,
    ) -> Result<(), ActuationError> {
        debug!("{:?}: {:.2} -> {:.2}", output.joint, from, to);
        let delta = (to - from) / INTERPOLATION_STEPS as f64;

        for i in 0..=INTERPOLATION_STEPS {
            let angle = from + delta * i as f64;
            self.bus
                .set_pulse_ns(output.channel, output.calibration.pulse_ns(angle))?;
            if i < INTERPOLATION_STEPS {
                self.clock.sleep(step_delay);
            }
        }
        Ok(())
    }
}
