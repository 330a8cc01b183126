//! Backlight and hibernation management

use std::time::{Duration, Instant};

use tracing::{debug, info};

use latchguard_core::{Display, Power};

const BACKLIGHT_CHECK: Duration = Duration::from_secs(1);
const HIBERNATE_CHECK: Duration = Duration::from_secs(2);

/// What a power check did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    None,
    BacklightOn,
    BacklightOff,
    /// The device slept and has just woken up
    Hibernated,
}

/// Inactivity tracking
///
/// Knows nothing about authentication; the controller decides when
/// hibernation is allowed.
#[derive(Debug, Clone)]
pub struct PowerManager {
    inactivity_timeout: Duration,
    last_activity: Instant,
    backlight_on: bool,
    last_backlight_check: Instant,
    last_hibernate_check: Instant,
}

impl PowerManager {
    pub fn new(inactivity_timeout: Duration, now: Instant) -> Self {
        Self {
            inactivity_timeout,
            last_activity: now,
            backlight_on: true,
            last_backlight_check: now,
            last_hibernate_check: now,
        }
    }

    /// Note user or sensor activity; turns the backlight back on
    pub fn record_activity(&mut self, now: Instant, display: &mut dyn Display) {
        self.last_activity = now;
        if !self.backlight_on {
            display.set_backlight(true);
            self.backlight_on = true;
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn backlight_on(&self) -> bool {
        self.backlight_on
    }

    /// Run the periodic checks
    ///
    /// `may_hibernate` is false while anything is in progress that sleep
    /// would lose (a lockout, a pending factor, an admin flow).
    pub fn poll(
        &mut self,
        now: Instant,
        may_hibernate: bool,
        display: &mut dyn Display,
        power: &mut dyn Power,
    ) -> PowerEvent {
        let mut event = PowerEvent::None;

        if now.saturating_duration_since(self.last_backlight_check) >= BACKLIGHT_CHECK {
            self.last_backlight_check = now;
            let want_on = self.idle_for(now) <= self.inactivity_timeout;
            if want_on != self.backlight_on {
                display.set_backlight(want_on);
                self.backlight_on = want_on;
                debug!("Backlight {}", if want_on { "on" } else { "off" });
                event = if want_on {
                    PowerEvent::BacklightOn
                } else {
                    PowerEvent::BacklightOff
                };
            }
        }

        if now.saturating_duration_since(self.last_hibernate_check) >= HIBERNATE_CHECK {
            self.last_hibernate_check = now;
            if may_hibernate && self.idle_for(now) > self.inactivity_timeout * 2 {
                info!("Inactive for {:?}, hibernating", self.idle_for(now));
                display.power_off();
                power.hibernate();
                // Waking counts as activity
                self.last_activity = now;
                display.set_backlight(true);
                self.backlight_on = true;
                event = PowerEvent::Hibernated;
            }
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{RecordingDisplay, RecordingPower};

    #[test]
    fn test_backlight_follows_inactivity() {
        let start = Instant::now();
        let mut display = RecordingDisplay::new();
        let mut power = RecordingPower::new();
        let mut pm = PowerManager::new(Duration::from_secs(8), start);

        let t = start + Duration::from_secs(8);
        assert_eq!(pm.poll(t, true, &mut display, &mut power), PowerEvent::None);
        assert!(display.backlight());

        let t = start + Duration::from_secs(9);
        assert_eq!(
            pm.poll(t, true, &mut display, &mut power),
            PowerEvent::BacklightOff
        );
        assert!(!display.backlight());

        pm.record_activity(t, &mut display);
        assert!(display.backlight());
    }

    #[test]
    fn test_hibernates_after_twice_the_timeout() {
        let start = Instant::now();
        let mut display = RecordingDisplay::new();
        let mut power = RecordingPower::new();
        let mut pm = PowerManager::new(Duration::from_secs(8), start);

        pm.poll(start + Duration::from_secs(16), true, &mut display, &mut power);
        assert_eq!(power.hibernations(), 0);

        assert_eq!(
            pm.poll(start + Duration::from_secs(18), true, &mut display, &mut power),
            PowerEvent::Hibernated
        );
        assert_eq!(power.hibernations(), 1);
        assert!(!display.is_powered());
    }

    #[test]
    fn test_hibernation_can_be_held_off() {
        let start = Instant::now();
        let mut display = RecordingDisplay::new();
        let mut power = RecordingPower::new();
        let mut pm = PowerManager::new(Duration::from_secs(8), start);

        pm.poll(start + Duration::from_secs(60), false, &mut display, &mut power);
        assert_eq!(power.hibernations(), 0);
        assert!(!display.backlight());
    }
}
