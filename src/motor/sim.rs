// In-memory bus for simulation and tests
//
// Implements both ServoBus and MotorBus. Clones share the same event log, so the
// arm and chassis drivers can each own a handle while a test inspects the combined
// write order.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use super::{ActuationError, MotorBus, ServoBus, Spin};

/// A single write seen by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Pulse { channel: u8, pulse_ns: u32 },
    Release { channel: u8 },
    Duty { channel: u8, duty: u16 },
    Spin { channel: u8, spin: Spin },
}

impl BusEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            BusEvent::Pulse { channel, .. }
            | BusEvent::Release { channel }
            | BusEvent::Duty { channel, .. }
            | BusEvent::Spin { channel, .. } => channel,
        }
    }
}

type FailurePredicate = Rc<dyn Fn(&BusEvent) -> bool>;

#[derive(Default)]
struct SimState {
    record: bool,
    events: Vec<BusEvent>,
    writes: usize,
}

/// Simulated PWM outputs
#[derive(Clone, Default)]
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
    fail_when: Option<FailurePredicate>,
}

impl SimBus {
    /// Bus that only counts writes
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus that keeps every write for later inspection
    pub fn recording() -> Self {
        let bus = Self::default();
        bus.state.borrow_mut().record = true;
        bus
    }

    /// Reject every write matching `predicate` (on this handle and later clones of it)
    pub fn fail_when(mut self, predicate: impl Fn(&BusEvent) -> bool + 'static) -> Self {
        self.fail_when = Some(Rc::new(predicate));
        self
    }

    /// Recorded writes, oldest first
    pub fn events(&self) -> Vec<BusEvent> {
        self.state.borrow().events.clone()
    }

    /// Number of accepted writes
    pub fn writes(&self) -> usize {
        self.state.borrow().writes
    }

    fn apply(&mut self, event: BusEvent) -> Result<(), ActuationError> {
        if let Some(fail) = &self.fail_when {
            if fail(&event) {
                return Err(ActuationError::Rejected {
                    channel: event.channel(),
                    reason: format!("simulated failure on {:?}", event),
                });
            }
        }

        trace!("Sim bus write: {:?}", event);
        let mut state = self.state.borrow_mut();
        state.writes += 1;
        if state.record {
            state.events.push(event);
        }
        Ok(())
    }
}

impl ServoBus for SimBus {
    fn set_pulse_ns(&mut self, channel: u8, pulse_ns: u32) -> Result<(), ActuationError> {
        self.apply(BusEvent::Pulse { channel, pulse_ns })
    }

    fn release(&mut self, channel: u8) -> Result<(), ActuationError> {
        self.apply(BusEvent::Release { channel })
    }
}

impl MotorBus for SimBus {
    fn set_duty(&mut self, channel: u8, duty: u16) -> Result<(), ActuationError> {
        self.apply(BusEvent::Duty { channel, duty })
    }

    fn set_spin(&mut self, channel: u8, spin: Spin) -> Result<(), ActuationError> {
        self.apply(BusEvent::Spin { channel, spin })
    }
}
