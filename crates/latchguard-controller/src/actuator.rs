//! Lock relay pulses

use std::time::{Duration, Instant};

use tracing::info;

use latchguard_core::{Actuator, Feedback, FeedbackPattern};

/// Sole owner of the lock actuator
///
/// An unlock is a pulse: open now, relock once `unlock_duration` has
/// passed. A second unlock while a pulse is running is refused.
pub struct ActuatorController {
    actuator: Box<dyn Actuator>,
    unlock_duration: Duration,
    relock_at: Option<Instant>,
    pulses: u64,
}

impl ActuatorController {
    /// Take ownership of the actuator and drive it to the locked position
    pub fn new(mut actuator: Box<dyn Actuator>, unlock_duration: Duration) -> Self {
        actuator.set_locked(true);
        Self {
            actuator,
            unlock_duration,
            relock_at: None,
            pulses: 0,
        }
    }

    /// Start an unlock pulse; false if one is already running
    pub fn unlock(&mut self, now: Instant, feedback: &mut dyn Feedback) -> bool {
        if self.relock_at.is_some() {
            return false;
        }

        feedback.play(FeedbackPattern::Success);
        self.actuator.set_locked(false);
        self.relock_at = Some(now + self.unlock_duration);
        self.pulses += 1;
        info!("Door unlocked for {:?}", self.unlock_duration);
        true
    }

    /// Relock once the pulse is over; returns true on the tick that relocks
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.relock_at {
            Some(at) if now >= at => {
                self.actuator.set_locked(true);
                self.relock_at = None;
                info!("Door locked");
                true
            }
            _ => false,
        }
    }

    /// Whether a pulse is running
    pub fn is_active(&self) -> bool {
        self.relock_at.is_some()
    }

    /// Pulses started since boot
    pub fn pulse_count(&self) -> u64 {
        self.pulses
    }
}
