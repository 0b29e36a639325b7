// Differential-drive chassis driver
//
// Open-loop: every maneuver converts its distance or angle into a hold time using the
// calibration speed constants, drives the motors for that long and stops them again.

use tracing::{debug, info, warn};

use super::calibration::ChassisCalibration;
use super::{ActuationError, MotorBus, Spin};
use crate::clock::{Clock, secs};
use crate::config::{CHANNEL_MOTOR_LEFT, CHANNEL_MOTOR_RIGHT};

pub struct ChassisDriver<M: MotorBus, C: Clock> {
    bus: M,
    clock: C,
    calibration: ChassisCalibration,
    channels: [u8; 2], // [left, right]
}

impl<M: MotorBus, C: Clock> ChassisDriver<M, C> {
    /// Create a driver on the default channels and calibration
    pub fn new(bus: M, clock: C) -> Result<Self, ActuationError> {
        Self::with_calibration(
            bus,
            clock,
            ChassisCalibration::default(),
            [CHANNEL_MOTOR_LEFT, CHANNEL_MOTOR_RIGHT],
        )
    }

    /// Create with custom calibration and channels.
    ///
    /// Stops both motors and applies the baseline duty.
    pub fn with_calibration(
        bus: M,
        clock: C,
        calibration: ChassisCalibration,
        channels: [u8; 2],
    ) -> Result<Self, ActuationError> {
        let mut driver = Self { bus, clock, calibration, channels };
        info!(
            "Chassis on channels {:?}, baseline duty {:?}",
            channels,
            calibration.baseline()
        );
        driver.stop()?;
        driver.apply_duty(1.0, 1.0)?;
        Ok(driver)
    }

    pub fn forward(&mut self, distance: f64) -> Result<(), ActuationError> {
        let hold = self.calibration.travel_time_s(distance);
        debug!("Forward {} for {:.2}s", distance, hold);
        self.maneuver(Spin::Forward, Spin::Forward, (1.0, 1.0), hold)
    }

    pub fn backward(&mut self, distance: f64) -> Result<(), ActuationError> {
        let hold = self.calibration.travel_time_s(distance);
        debug!("Backward {} for {:.2}s", distance, hold);
        self.maneuver(Spin::Backward, Spin::Backward, (1.0, 1.0), hold)
    }

    /// Turn counter-clockwise in place. The right motor is boosted to keep the pivot centered.
    pub fn turn_left(&mut self, angle_deg: f64) -> Result<(), ActuationError> {
        let hold = self.calibration.turn_time_s(angle_deg);
        debug!("Turn left {}° for {:.2}s", angle_deg, hold);
        let boost = (1.0, self.calibration.turn_left_boost);
        self.maneuver(Spin::Backward, Spin::Forward, boost, hold)
    }

    /// Turn clockwise in place. The left motor is boosted.
    pub fn turn_right(&mut self, angle_deg: f64) -> Result<(), ActuationError> {
        let hold = self.calibration.turn_time_s(angle_deg);
        debug!("Turn right {}° for {:.2}s", angle_deg, hold);
        let boost = (self.calibration.turn_right_boost, 1.0);
        self.maneuver(Spin::Forward, Spin::Backward, boost, hold)
    }

    /// Put both motors in the stop state. Both channels are attempted.
    pub fn stop(&mut self) -> Result<(), ActuationError> {
        let [left, right] = self.channels;
        let left = self.bus.set_spin(left, Spin::Stop);
        let right = self.bus.set_spin(right, Spin::Stop);
        left.and(right)
    }

    /// Engage the motors for `hold_s` seconds, then stop and restore the baseline duty
    /// whatever happened while engaged. Non-positive holds never engage the motors.
    fn maneuver(
        &mut self,
        left: Spin,
        right: Spin,
        boost: (f64, f64),
        hold_s: f64,
    ) -> Result<(), ActuationError> {
        if hold_s.is_nan() || hold_s <= 0.0 {
            debug!("Zero-length maneuver skipped");
            return Ok(());
        }

        let engaged = self.engage(left, right, boost).map(|()| self.clock.sleep(secs(hold_s)));

        let stopped = self.stop();
        let restored = self.apply_duty(1.0, 1.0);
        if engaged.is_err() && (stopped.is_err() || restored.is_err()) {
            warn!("Chassis cleanup failed after an aborted maneuver");
        }

        engaged.and(stopped).and(restored)
    }

    fn engage(&mut self, left: Spin, right: Spin, boost: (f64, f64)) -> Result<(), ActuationError> {
        self.apply_duty(boost.0, boost.1)?;
        let [left_channel, right_channel] = self.channels;
        self.bus.set_spin(left_channel, left)?;
        self.bus.set_spin(right_channel, right)
    }

    fn apply_duty(&mut self, left: f64, right: f64) -> Result<(), ActuationError> {
        let (left_duty, right_duty) = self.calibration.boosted(left, right);
        let [left_channel, right_channel] = self.channels;
        self.bus.set_duty(left_channel, left_duty)?;
        self.bus.set_duty(right_channel, right_duty)
    }
}

impl<M: MotorBus, C: Clock> Drop for ChassisDriver<M, C> {
    fn drop(&mut self) {
        // Never leave the motors engaged when the driver goes away
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::motor::sim::{BusEvent, SimBus};
    use std::time::Duration;

    const L: u8 = CHANNEL_MOTOR_LEFT;
    const R: u8 = CHANNEL_MOTOR_RIGHT;

    fn driver() -> (ChassisDriver<SimBus, VirtualClock>, SimBus, VirtualClock) {
        let bus = SimBus::recording();
        let clock = VirtualClock::new();
        let chassis = ChassisDriver::new(bus.clone(), clock.clone()).unwrap();
        (chassis, bus, clock)
    }

    fn startup() -> Vec<BusEvent> {
        vec![
            BusEvent::Spin { channel: L, spin: Spin::Stop },
            BusEvent::Spin { channel: R, spin: Spin::Stop },
            BusEvent::Duty { channel: L, duty: 30_000 },
            BusEvent::Duty { channel: R, duty: 40_000 },
        ]
    }

    #[test]
    fn test_startup_applies_baseline() {
        let (_chassis, bus, _) = driver();
        assert_eq!(bus.events(), startup());
    }

    #[test]
    fn test_forward_sequence_and_timing() {
        let (mut chassis, bus, clock) = driver();
        chassis.forward(100.0).unwrap();

        let events = bus.events();
        assert_eq!(
            &events[4..],
            &[
                BusEvent::Duty { channel: L, duty: 30_000 },
                BusEvent::Duty { channel: R, duty: 40_000 },
                BusEvent::Spin { channel: L, spin: Spin::Forward },
                BusEvent::Spin { channel: R, spin: Spin::Forward },
                BusEvent::Spin { channel: L, spin: Spin::Stop },
                BusEvent::Spin { channel: R, spin: Spin::Stop },
                BusEvent::Duty { channel: L, duty: 30_000 },
                BusEvent::Duty { channel: R, duty: 40_000 },
            ]
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn test_turn_left_boosts_right_motor_then_restores() {
        let (mut chassis, bus, clock) = driver();
        chassis.turn_left(90.0).unwrap();

        let events = bus.events();
        assert_eq!(events[5], BusEvent::Duty { channel: R, duty: 60_000 });
        assert_eq!(events[6], BusEvent::Spin { channel: L, spin: Spin::Backward });
        assert_eq!(events[7], BusEvent::Spin { channel: R, spin: Spin::Forward });
        assert_eq!(events.last(), Some(&BusEvent::Duty { channel: R, duty: 40_000 }));
        assert_eq!(clock.elapsed(), Duration::from_millis(750));
    }

    #[test]
    fn test_turn_right_boosts_left_motor() {
        let (mut chassis, bus, _) = driver();
        chassis.turn_right(30.0).unwrap();

        let events = bus.events();
        assert_eq!(events[4], BusEvent::Duty { channel: L, duty: 36_000 });
        assert_eq!(events[6], BusEvent::Spin { channel: L, spin: Spin::Forward });
        assert_eq!(events[7], BusEvent::Spin { channel: R, spin: Spin::Backward });
    }

    #[test]
    fn test_non_positive_amounts_are_noops() {
        let (mut chassis, bus, clock) = driver();
        chassis.forward(0.0).unwrap();
        chassis.backward(-20.0).unwrap();
        chassis.turn_left(0.0).unwrap();
        assert_eq!(bus.events(), startup());
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_failed_engage_still_stops() {
        let bus = SimBus::recording()
            .fail_when(|e| *e == BusEvent::Spin { channel: R, spin: Spin::Backward });
        let mut chassis = ChassisDriver::new(bus.clone(), VirtualClock::new()).unwrap();

        assert!(chassis.backward(50.0).is_err());
        let events = bus.events();
        assert_eq!(
            &events[events.len() - 4..],
            &[
                BusEvent::Spin { channel: L, spin: Spin::Stop },
                BusEvent::Spin { channel: R, spin: Spin::Stop },
                BusEvent::Duty { channel: L, duty: 30_000 },
                BusEvent::Duty { channel: R, duty: 40_000 },
            ]
        );
    }

    #[test]
    fn test_drop_stops_motors() {
        let (chassis, bus, _) = driver();
        drop(chassis);
        let events = bus.events();
        assert_eq!(
            &events[events.len() - 2..],
            &[
                BusEvent::Spin { channel: L, spin: Spin::Stop },
                BusEvent::Spin { channel: R, spin: Spin::Stop },
            ]
        );
    }
}
