//! Per-modality brute-force protection
//!
//! Each modality gets its own tracker. After `max_attempts` consecutive
//! failures the modality is locked for a fixed window; the window expires
//! lazily, the next time anyone asks.
//!
//! Trackers live in memory only. A reboot during a lockout forgets it.

use std::time::{Duration, Instant};

use crate::{LOCKOUT_DURATION_SECS, MAX_WRONG_ATTEMPTS};

/// Failure threshold and lockout window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lockout
    pub max_attempts: u32,
    /// How long a lockout lasts
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_WRONG_ATTEMPTS,
            duration: Duration::from_secs(LOCKOUT_DURATION_SECS),
        }
    }
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            duration,
        }
    }

    /// Get a human-readable description of the lockout length
    pub fn describe_duration(&self) -> String {
        let secs = self.duration.as_secs();
        if secs < 60 {
            format!("{} seconds", secs)
        } else if secs < 3600 {
            format!("{} minutes", secs / 60)
        } else {
            format!("{} hours", secs / 3600)
        }
    }
}

/// Failure counter and lockout window for one modality
#[derive(Clone, Debug)]
pub struct LockoutTracker {
    policy: LockoutPolicy,
    wrong_attempts: u32,
    locked_since: Option<Instant>,
}

impl LockoutTracker {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            wrong_attempts: 0,
            locked_since: None,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Consecutive failures since the last success or lockout
    pub fn wrong_attempts(&self) -> u32 {
        self.wrong_attempts
    }

    /// When the current lockout began, if any (expiry not checked)
    pub fn lockout_started_at(&self) -> Option<Instant> {
        self.locked_since
    }

    /// Count a failure and return the attempts left before lockout
    ///
    /// Reaching the threshold starts the lockout at `now` and zeroes the
    /// counter, so the return value is 0 exactly when this call locked.
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.wrong_attempts += 1;
        if self.wrong_attempts >= self.policy.max_attempts {
            self.locked_since = Some(now);
            self.wrong_attempts = 0;
            return 0;
        }
        self.policy.max_attempts - self.wrong_attempts
    }

    /// Reset the counter after a successful verification
    pub fn record_success(&mut self) {
        self.wrong_attempts = 0;
    }

    /// Whether the modality is locked at `now`
    ///
    /// This is a mutating query: an elapsed window is cleared here,
    /// together with the counter.
    pub fn is_locked_out(&mut self, now: Instant) -> bool {
        match self.locked_since {
            Some(since) if now.saturating_duration_since(since) >= self.policy.duration => {
                self.locked_since = None;
                self.wrong_attempts = 0;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Whole seconds until the lockout ends, rounded up; 0 when unlocked
    pub fn remaining_lockout_secs(&mut self, now: Instant) -> u64 {
        let remaining = self.remaining(now);
        let secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Fraction of the window still to run, in `0.0..=1.0`
    pub fn lockout_progress(&mut self, now: Instant) -> f32 {
        let total = self.policy.duration.as_secs_f32();
        if total <= 0.0 {
            return 0.0;
        }
        (self.remaining(now).as_secs_f32() / total).clamp(0.0, 1.0)
    }

    /// Get a human-readable description of the current state
    pub fn describe(&mut self, now: Instant) -> String {
        if self.is_locked_out(now) {
            format!("Locked for {} seconds", self.remaining_lockout_secs(now))
        } else {
            format!(
                "{} attempts remaining",
                self.policy.max_attempts.saturating_sub(self.wrong_attempts)
            )
        }
    }

    fn remaining(&mut self, now: Instant) -> Duration {
        if !self.is_locked_out(now) {
            return Duration::ZERO;
        }
        match self.locked_since {
            Some(since) => self
                .policy
                .duration
                .saturating_sub(now.saturating_duration_since(since)),
            None => Duration::ZERO,
        }
    }
}

impl Default for LockoutTracker {
    fn default() -> Self {
        Self::new(LockoutPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_no_lockout_below_threshold() {
        let now = Instant::now();
        let mut tracker = LockoutTracker::default();

        assert_eq!(tracker.record_failure(now), 4);
        assert_eq!(tracker.record_failure(now), 3);
        assert_eq!(tracker.record_failure(now), 2);
        assert_eq!(tracker.record_failure(now), 1);
        assert!(!tracker.is_locked_out(now));
        assert_eq!(tracker.wrong_attempts(), 4);
    }

    #[test]
    fn test_lockout_at_threshold() {
        let now = Instant::now();
        let mut tracker = LockoutTracker::default();

        for _ in 0..4 {
            tracker.record_failure(now);
        }
        assert_eq!(tracker.record_failure(now), 0);
        assert!(tracker.is_locked_out(now));
        assert_eq!(tracker.wrong_attempts(), 0);
        assert_eq!(tracker.lockout_started_at(), Some(now));
        assert_eq!(tracker.remaining_lockout_secs(now), 300);
    }

    #[test]
    fn test_lockout_clears_after_window() {
        let start = Instant::now();
        let mut tracker = LockoutTracker::new(LockoutPolicy::new(2, secs(30)));

        tracker.record_failure(start);
        tracker.record_failure(start);
        assert!(tracker.is_locked_out(start + secs(29)));
        assert_eq!(tracker.remaining_lockout_secs(start + secs(29)), 1);

        assert!(!tracker.is_locked_out(start + secs(30)));
        assert_eq!(tracker.lockout_started_at(), None);
        assert_eq!(tracker.remaining_lockout_secs(start + secs(30)), 0);
    }

    #[test]
    fn test_success_resets_counter() {
        let now = Instant::now();
        let mut tracker = LockoutTracker::default();

        tracker.record_failure(now);
        tracker.record_failure(now);
        tracker.record_success();
        assert_eq!(tracker.wrong_attempts(), 0);
        assert_eq!(tracker.record_failure(now), 4);
    }

    #[test]
    fn test_remaining_rounds_up() {
        let start = Instant::now();
        let mut tracker = LockoutTracker::new(LockoutPolicy::new(1, secs(10)));
        tracker.record_failure(start);
        assert_eq!(
            tracker.remaining_lockout_secs(start + Duration::from_millis(9_100)),
            1
        );
    }

    #[test]
    fn test_progress_and_description() {
        let start = Instant::now();
        let mut tracker = LockoutTracker::new(LockoutPolicy::new(1, secs(100)));
        assert_eq!(tracker.describe(start), "1 attempts remaining");

        tracker.record_failure(start);
        assert!((tracker.lockout_progress(start + secs(25)) - 0.75).abs() < 1e-3);
        assert_eq!(tracker.describe(start + secs(25)), "Locked for 75 seconds");
        assert_eq!(tracker.lockout_progress(start + secs(100)), 0.0);
    }

    #[test]
    fn test_policy_description() {
        assert_eq!(LockoutPolicy::default().describe_duration(), "5 minutes");
        assert_eq!(LockoutPolicy::new(3, secs(45)).describe_duration(), "45 seconds");
    }
}
