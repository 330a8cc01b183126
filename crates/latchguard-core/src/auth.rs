//! Authentication state machine
//!
//! Turns a verification attempt from either modality into a lockout-aware,
//! mode-aware [`Decision`]. All mutable state lives in [`AuthContext`],
//! which the control loop owns and passes in by reference.
//!
//! # States
//!
//! ```text
//! Idle ──success (2FA)──▶ AwaitingSecondFactor ──other success──▶ Granted ──▶ Idle
//!  │                              │
//!  └──threshold failures──▶ LockedOut[modality] ──window elapsed──▶ Idle
//! ```
//!
//! Lockout is per modality: a locked PIN channel does not stop a matching
//! fingerprint, and vice versa. Locking one modality forgets only that
//! modality's partial verification.

use std::time::Instant;

use crate::credential::Credential;
use crate::error::Error;
use crate::lockout::{LockoutPolicy, LockoutTracker};
use crate::types::{AuthMode, BiometricId, FeedbackPattern, Modality, StatusMessage};

/// A single verification attempt
#[derive(Debug, Clone, Copy)]
pub enum Attempt<'a> {
    /// Digits typed on the keypad
    Pin(&'a [u8]),
    /// Outcome of a fingerprint search: `Some(id)` on a match, `None` on no match
    Biometric(Option<BiometricId>),
}

impl Attempt<'_> {
    pub fn modality(&self) -> Modality {
        match self {
            Attempt::Pin(_) => Modality::Pin,
            Attempt::Biometric(_) => Modality::Biometric,
        }
    }
}

/// Why a verification was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Typed PIN had a different length than the stored one
    LengthMismatch { entered: usize, expected: usize },
    /// Typed PIN had the right length but wrong digits
    WrongPin,
    /// Fingerprint matched no template
    NoMatch,
}

/// Access decision for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Unlock the door
    Granted {
        modality: Modality,
        biometric_id: Option<BiometricId>,
    },
    /// First factor accepted in two-factor mode; waiting on the other
    PartialOk { modality: Modality },
    /// First factor accepted while the other modality is cooling down
    PartialOkOtherLocked {
        modality: Modality,
        other_remaining_secs: u64,
    },
    /// Wrong credential, attempts remain
    DeniedRetry {
        modality: Modality,
        attempts_remaining: u32,
        reason: DenyReason,
    },
    /// Wrong credential that exhausted the budget; modality now locked
    DeniedNowLocked {
        modality: Modality,
        lockout_secs: u64,
    },
    /// Modality is locked; the attempt was not evaluated or counted
    DeniedLockedOut {
        modality: Modality,
        remaining_secs: u64,
    },
}

impl Decision {
    /// The modality that produced this decision
    pub fn modality(&self) -> Modality {
        match *self {
            Decision::Granted { modality, .. }
            | Decision::PartialOk { modality }
            | Decision::PartialOkOtherLocked { modality, .. }
            | Decision::DeniedRetry { modality, .. }
            | Decision::DeniedNowLocked { modality, .. }
            | Decision::DeniedLockedOut { modality, .. } => modality,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted { .. })
    }

    /// Whether the attempt itself verified (granted or partial)
    pub fn is_verified(&self) -> bool {
        matches!(
            self,
            Decision::Granted { .. }
                | Decision::PartialOk { .. }
                | Decision::PartialOkOtherLocked { .. }
        )
    }

    /// The error a rejected attempt amounts to, for logging
    pub fn denial(&self) -> Option<Error> {
        match *self {
            Decision::DeniedRetry { .. } => Some(Error::VerificationFailed),
            Decision::DeniedNowLocked {
                modality,
                lockout_secs,
            } => Some(Error::LockedOut {
                modality,
                remaining_secs: lockout_secs,
            }),
            Decision::DeniedLockedOut {
                modality,
                remaining_secs,
            } => Some(Error::LockedOut {
                modality,
                remaining_secs,
            }),
            _ => None,
        }
    }

    /// Buzzer pattern for this outcome
    pub fn feedback(&self) -> FeedbackPattern {
        match self {
            Decision::Granted { .. } => FeedbackPattern::Success,
            Decision::PartialOk { .. } | Decision::PartialOkOtherLocked { .. } => {
                FeedbackPattern::Warning
            }
            Decision::DeniedRetry { .. } => FeedbackPattern::Error,
            Decision::DeniedNowLocked { .. } => FeedbackPattern::Alarm,
            Decision::DeniedLockedOut { .. } => FeedbackPattern::Warning,
        }
    }

    /// Display text for this outcome
    pub fn message(&self) -> StatusMessage {
        match *self {
            Decision::Granted {
                biometric_id: Some(id),
                modality: Modality::Biometric,
            } => StatusMessage::new(format!("ID #{} Match!", id), "Access Granted"),
            Decision::Granted { .. } => StatusMessage::new("     Access", "    Granted"),
            Decision::PartialOk {
                modality: Modality::Pin,
            } => StatusMessage::new("PIN Verified", "Place Finger"),
            Decision::PartialOk {
                modality: Modality::Biometric,
            } => StatusMessage::new("Fingerprint OK", "Enter PIN"),
            Decision::PartialOkOtherLocked {
                modality,
                other_remaining_secs,
            } => StatusMessage::new(
                format!("{} OK", modality.label()),
                format!("{} locked {}s", modality.other().label(), other_remaining_secs),
            ),
            Decision::DeniedRetry {
                reason: DenyReason::LengthMismatch { entered, expected },
                ..
            } => StatusMessage::new("Invalid Length", format!("{}!={}", entered, expected)),
            Decision::DeniedRetry {
                reason: DenyReason::WrongPin,
                attempts_remaining,
                ..
            } => StatusMessage::new("      PIN:", format!("Invalid ({} left)", attempts_remaining)),
            Decision::DeniedRetry {
                reason: DenyReason::NoMatch,
                attempts_remaining,
                ..
            } => StatusMessage::new("    No Match", format!("Denied ({} left)", attempts_remaining)),
            Decision::DeniedNowLocked {
                modality,
                lockout_secs,
            } => StatusMessage::new(
                format!("{} Locked Out", modality.label()),
                format!("Wait {}s", lockout_secs),
            ),
            Decision::DeniedLockedOut {
                modality,
                remaining_secs,
            } => StatusMessage::new(
                format!("{} Locked", modality.label()),
                format!("Wait {}s", remaining_secs),
            ),
        }
    }
}

/// Which factors have verified in the current two-factor exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialVerification {
    pub pin_verified: bool,
    pub biometric_verified: bool,
    pub verified_biometric_id: Option<BiometricId>,
}

impl PartialVerification {
    pub fn is_verified(&self, modality: Modality) -> bool {
        match modality {
            Modality::Pin => self.pin_verified,
            Modality::Biometric => self.biometric_verified,
        }
    }

    fn mark(&mut self, modality: Modality, biometric_id: Option<BiometricId>) {
        match modality {
            Modality::Pin => self.pin_verified = true,
            Modality::Biometric => {
                self.biometric_verified = true;
                self.verified_biometric_id = biometric_id;
            }
        }
    }

    /// Forget both factors
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Forget one factor, keeping the other
    pub fn forget(&mut self, modality: Modality) {
        match modality {
            Modality::Pin => self.pin_verified = false,
            Modality::Biometric => {
                self.biometric_verified = false;
                self.verified_biometric_id = None;
            }
        }
    }

    /// The single verified factor, if exactly one is set
    pub fn pending(&self) -> Option<Modality> {
        match (self.pin_verified, self.biometric_verified) {
            (true, false) => Some(Modality::Pin),
            (false, true) => Some(Modality::Biometric),
            _ => None,
        }
    }
}

/// Coarse state for rendering and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Ready screen
    Idle,
    /// One factor verified in two-factor mode
    AwaitingSecondFactor(Modality),
    /// At least one modality is locked
    LockedOut { pin: bool, biometric: bool },
}

/// All authentication state owned by the control loop
#[derive(Debug, Clone)]
pub struct AuthContext {
    mode: AuthMode,
    partial: PartialVerification,
    pin_lockout: LockoutTracker,
    biometric_lockout: LockoutTracker,
}

impl AuthContext {
    /// Create a context using the same policy for both modalities
    pub fn new(mode: AuthMode, policy: LockoutPolicy) -> Self {
        Self::with_policies(mode, policy, policy)
    }

    /// Create a context with a separate policy per modality
    pub fn with_policies(mode: AuthMode, pin: LockoutPolicy, biometric: LockoutPolicy) -> Self {
        Self {
            mode,
            partial: PartialVerification::default(),
            pin_lockout: LockoutTracker::new(pin),
            biometric_lockout: LockoutTracker::new(biometric),
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Change the mode, discarding any partial verification
    pub fn set_mode(&mut self, mode: AuthMode) {
        self.mode = mode;
        self.partial.clear();
    }

    pub fn partial(&self) -> &PartialVerification {
        &self.partial
    }

    pub fn tracker(&self, modality: Modality) -> &LockoutTracker {
        match modality {
            Modality::Pin => &self.pin_lockout,
            Modality::Biometric => &self.biometric_lockout,
        }
    }

    pub fn tracker_mut(&mut self, modality: Modality) -> &mut LockoutTracker {
        match modality {
            Modality::Pin => &mut self.pin_lockout,
            Modality::Biometric => &mut self.biometric_lockout,
        }
    }

    /// Whether `modality` is locked at `now` (clears expired windows)
    pub fn is_locked_out(&mut self, modality: Modality, now: Instant) -> bool {
        self.tracker_mut(modality).is_locked_out(now)
    }

    /// Evaluate one attempt against the stored credential
    pub fn submit(&mut self, stored: &Credential, attempt: Attempt<'_>, now: Instant) -> Decision {
        let modality = attempt.modality();
        if let Some(denied) = self.check_lockout(modality, now) {
            return denied;
        }
        self.decide(modality, verify(stored, attempt), now)
    }

    /// Evaluate a fingerprint search result
    ///
    /// Needs no stored PIN, so it keeps working when the credential record
    /// could not be read.
    pub fn submit_biometric(&mut self, result: Option<BiometricId>, now: Instant) -> Decision {
        if let Some(denied) = self.check_lockout(Modality::Biometric, now) {
            return denied;
        }
        self.decide(Modality::Biometric, verify_biometric(result), now)
    }

    /// Evaluate the attempts that arrived in one loop iteration
    ///
    /// A PIN attempt is always processed before a biometric one.
    pub fn submit_tick(
        &mut self,
        stored: &Credential,
        pin: Option<&[u8]>,
        biometric: Option<Option<BiometricId>>,
        now: Instant,
    ) -> Vec<Decision> {
        let mut decisions = Vec::with_capacity(2);
        if let Some(digits) = pin {
            decisions.push(self.submit(stored, Attempt::Pin(digits), now));
        }
        if let Some(result) = biometric {
            decisions.push(self.submit(stored, Attempt::Biometric(result), now));
        }
        decisions
    }

    /// Current coarse state
    pub fn state(&mut self, now: Instant) -> AuthState {
        let pin = self.pin_lockout.is_locked_out(now);
        let biometric = self.biometric_lockout.is_locked_out(now);
        if pin || biometric {
            return AuthState::LockedOut { pin, biometric };
        }
        match (self.mode, self.partial.pending()) {
            (AuthMode::TwoFactor, Some(modality)) => AuthState::AwaitingSecondFactor(modality),
            _ => AuthState::Idle,
        }
    }

    fn check_lockout(&mut self, modality: Modality, now: Instant) -> Option<Decision> {
        let tracker = self.tracker_mut(modality);
        if !tracker.is_locked_out(now) {
            return None;
        }
        Some(Decision::DeniedLockedOut {
            modality,
            remaining_secs: tracker.remaining_lockout_secs(now),
        })
    }

    fn decide(
        &mut self,
        modality: Modality,
        verdict: std::result::Result<Option<BiometricId>, DenyReason>,
        now: Instant,
    ) -> Decision {
        match verdict {
            Ok(biometric_id) => self.on_success(modality, biometric_id, now),
            Err(reason) => self.on_failure(modality, reason, now),
        }
    }

    fn on_success(
        &mut self,
        modality: Modality,
        biometric_id: Option<BiometricId>,
        now: Instant,
    ) -> Decision {
        self.tracker_mut(modality).record_success();

        match self.mode {
            AuthMode::SingleFactor => Decision::Granted {
                modality,
                biometric_id,
            },
            AuthMode::TwoFactor => {
                if self.partial.is_verified(modality.other()) {
                    let biometric_id = biometric_id.or(self.partial.verified_biometric_id);
                    self.partial.clear();
                    return Decision::Granted {
                        modality,
                        biometric_id,
                    };
                }

                self.partial.mark(modality, biometric_id);

                let other = self.tracker_mut(modality.other());
                if other.is_locked_out(now) {
                    Decision::PartialOkOtherLocked {
                        modality,
                        other_remaining_secs: other.remaining_lockout_secs(now),
                    }
                } else {
                    Decision::PartialOk { modality }
                }
            }
        }
    }

    fn on_failure(&mut self, modality: Modality, reason: DenyReason, now: Instant) -> Decision {
        let tracker = self.tracker_mut(modality);
        let attempts_remaining = tracker.record_failure(now);

        if attempts_remaining == 0 {
            let lockout_secs = tracker.remaining_lockout_secs(now);
            self.partial.forget(modality);
            return Decision::DeniedNowLocked {
                modality,
                lockout_secs,
            };
        }

        Decision::DeniedRetry {
            modality,
            attempts_remaining,
            reason,
        }
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new(AuthMode::default(), LockoutPolicy::default())
    }
}

fn verify(stored: &Credential, attempt: Attempt<'_>) -> Result<Option<BiometricId>, DenyReason> {
    match attempt {
        Attempt::Pin(digits) => {
            if digits.len() != stored.len() {
                return Err(DenyReason::LengthMismatch {
                    entered: digits.len(),
                    expected: stored.len(),
                });
            }
            if stored.matches(digits) {
                Ok(None)
            } else {
                Err(DenyReason::WrongPin)
            }
        }
        Attempt::Biometric(result) => verify_biometric(result),
    }
}

fn verify_biometric(result: Option<BiometricId>) -> Result<Option<BiometricId>, DenyReason> {
    match result {
        Some(id) if id.is_valid() => Ok(Some(id)),
        _ => Err(DenyReason::NoMatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pin() -> Credential {
        Credential::parse("123456").unwrap()
    }

    fn finger(id: u16) -> Attempt<'static> {
        Attempt::Biometric(Some(BiometricId::new(id)))
    }

    #[test]
    fn test_single_factor_grants_either_modality() {
        let now = Instant::now();
        let mut ctx = AuthContext::default();

        assert!(ctx.submit(&pin(), Attempt::Pin(b"123456"), now).is_granted());
        assert_eq!(
            ctx.submit(&pin(), finger(3), now),
            Decision::Granted {
                modality: Modality::Biometric,
                biometric_id: Some(BiometricId::new(3)),
            }
        );
        assert_eq!(ctx.partial(), &PartialVerification::default());
    }

    #[test]
    fn test_length_mismatch_counts_as_failure() {
        let now = Instant::now();
        let mut ctx = AuthContext::default();

        let decision = ctx.submit(&pin(), Attempt::Pin(b"12"), now);
        assert_eq!(
            decision,
            Decision::DeniedRetry {
                modality: Modality::Pin,
                attempts_remaining: 4,
                reason: DenyReason::LengthMismatch {
                    entered: 2,
                    expected: 6
                },
            }
        );
        assert_eq!(ctx.tracker(Modality::Pin).wrong_attempts(), 1);
    }

    #[test]
    fn test_zero_biometric_id_is_not_a_match() {
        let now = Instant::now();
        let mut ctx = AuthContext::default();
        let decision = ctx.submit(&pin(), finger(0), now);
        assert!(matches!(
            decision,
            Decision::DeniedRetry {
                reason: DenyReason::NoMatch,
                ..
            }
        ));
    }

    #[test]
    fn test_two_factor_same_factor_twice_does_not_grant() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(AuthMode::TwoFactor, LockoutPolicy::default());

        assert_eq!(
            ctx.submit(&pin(), Attempt::Pin(b"123456"), now),
            Decision::PartialOk {
                modality: Modality::Pin
            }
        );
        assert_eq!(
            ctx.submit(&pin(), Attempt::Pin(b"123456"), now),
            Decision::PartialOk {
                modality: Modality::Pin
            }
        );
        assert_eq!(
            ctx.state(now),
            AuthState::AwaitingSecondFactor(Modality::Pin)
        );
    }

    #[test]
    fn test_two_factor_grant_carries_earlier_fingerprint_id() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(AuthMode::TwoFactor, LockoutPolicy::default());

        ctx.submit(&pin(), finger(9), now);
        assert_eq!(
            ctx.submit(&pin(), Attempt::Pin(b"123456"), now),
            Decision::Granted {
                modality: Modality::Pin,
                biometric_id: Some(BiometricId::new(9)),
            }
        );
        assert_eq!(ctx.state(now), AuthState::Idle);
    }

    #[test]
    fn test_partial_ok_when_other_locked() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(AuthMode::TwoFactor, LockoutPolicy::default());

        for _ in 0..5 {
            ctx.submit(&pin(), Attempt::Pin(b"000000"), now);
        }
        let later = now + Duration::from_secs(100);
        assert_eq!(
            ctx.submit(&pin(), finger(2), later),
            Decision::PartialOkOtherLocked {
                modality: Modality::Biometric,
                other_remaining_secs: 200,
            }
        );
        assert!(ctx.partial().biometric_verified);
    }

    #[test]
    fn test_lockout_keeps_other_factor() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(
            AuthMode::TwoFactor,
            LockoutPolicy::new(2, Duration::from_secs(60)),
        );

        ctx.submit(&pin(), Attempt::Pin(b"123456"), now);
        ctx.submit(&pin(), Attempt::Biometric(None), now);
        assert!(ctx.partial().pin_verified);

        let decision = ctx.submit(&pin(), Attempt::Biometric(None), now);
        assert_eq!(
            decision,
            Decision::DeniedNowLocked {
                modality: Modality::Biometric,
                lockout_secs: 60
            }
        );
        assert!(ctx.partial().pin_verified);
        assert!(!ctx.partial().biometric_verified);
        assert_eq!(
            ctx.state(now),
            AuthState::LockedOut {
                pin: false,
                biometric: true
            }
        );

        let later = now + Duration::from_secs(60);
        assert_eq!(
            ctx.submit(&pin(), finger(5), later),
            Decision::Granted {
                modality: Modality::Biometric,
                biometric_id: Some(BiometricId::new(5)),
            }
        );
        assert_eq!(ctx.partial(), &PartialVerification::default());
    }

    #[test]
    fn test_lockout_forgets_failing_factor() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(
            AuthMode::TwoFactor,
            LockoutPolicy::new(1, Duration::from_secs(30)),
        );

        ctx.submit(&pin(), finger(2), now);
        ctx.submit(&pin(), Attempt::Pin(b"123456"), now);
        ctx.submit(&pin(), finger(2), now);
        assert!(ctx.partial().biometric_verified);

        ctx.submit(&pin(), Attempt::Biometric(None), now);
        assert_eq!(ctx.partial(), &PartialVerification::default());
    }

    #[test]
    fn test_submit_biometric_matches_submit() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(
            AuthMode::SingleFactor,
            LockoutPolicy::new(2, Duration::from_secs(10)),
        );

        assert!(ctx.submit_biometric(Some(BiometricId::new(3)), now).is_granted());
        assert!(matches!(
            ctx.submit_biometric(None, now),
            Decision::DeniedRetry {
                reason: DenyReason::NoMatch,
                ..
            }
        ));
        assert!(matches!(
            ctx.submit_biometric(Some(BiometricId::new(0)), now),
            Decision::DeniedNowLocked { .. }
        ));
        assert!(matches!(
            ctx.submit_biometric(Some(BiometricId::new(3)), now),
            Decision::DeniedLockedOut { .. }
        ));
    }

    #[test]
    fn test_denial_maps_to_error_kind() {
        let retry = Decision::DeniedRetry {
            modality: Modality::Pin,
            attempts_remaining: 2,
            reason: DenyReason::WrongPin,
        };
        assert!(matches!(retry.denial(), Some(Error::VerificationFailed)));

        let locked = Decision::DeniedLockedOut {
            modality: Modality::Biometric,
            remaining_secs: 42,
        };
        assert!(matches!(
            locked.denial(),
            Some(Error::LockedOut {
                modality: Modality::Biometric,
                remaining_secs: 42
            })
        ));

        let partial = Decision::PartialOk {
            modality: Modality::Pin,
        };
        assert!(partial.denial().is_none());
    }

    #[test]
    fn test_set_mode_clears_partial() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(AuthMode::TwoFactor, LockoutPolicy::default());
        ctx.submit(&pin(), Attempt::Pin(b"123456"), now);
        ctx.set_mode(AuthMode::SingleFactor);
        ctx.set_mode(AuthMode::TwoFactor);
        assert_eq!(
            ctx.submit(&pin(), finger(1), now),
            Decision::PartialOk {
                modality: Modality::Biometric
            }
        );
    }

    #[test]
    fn test_submit_tick_processes_pin_first() {
        let now = Instant::now();
        let mut ctx = AuthContext::new(AuthMode::TwoFactor, LockoutPolicy::default());

        let decisions = ctx.submit_tick(
            &pin(),
            Some(&b"123456"[..]),
            Some(Some(BiometricId::new(4))),
            now,
        );
        assert_eq!(decisions.len(), 2);
        assert_eq!(
            decisions[0],
            Decision::PartialOk {
                modality: Modality::Pin
            }
        );
        assert!(decisions[1].is_granted());
        assert_eq!(decisions[1].modality(), Modality::Biometric);
    }

    #[test]
    fn test_decision_feedback_mapping() {
        let granted = Decision::Granted {
            modality: Modality::Pin,
            biometric_id: None,
        };
        assert_eq!(granted.feedback(), FeedbackPattern::Success);
        assert_eq!(
            Decision::DeniedNowLocked {
                modality: Modality::Pin,
                lockout_secs: 300
            }
            .feedback(),
            FeedbackPattern::Alarm
        );
        assert_eq!(
            Decision::DeniedRetry {
                modality: Modality::Pin,
                attempts_remaining: 2,
                reason: DenyReason::WrongPin
            }
            .feedback(),
            FeedbackPattern::Error
        );
    }

    #[test]
    fn test_decision_messages() {
        let msg = Decision::Granted {
            modality: Modality::Biometric,
            biometric_id: Some(BiometricId::new(12)),
        }
        .message();
        assert_eq!(msg.line1, "ID #12 Match!");
        assert_eq!(msg.line2, "Access Granted");

        let msg = Decision::DeniedRetry {
            modality: Modality::Pin,
            attempts_remaining: 3,
            reason: DenyReason::LengthMismatch {
                entered: 4,
                expected: 6,
            },
        }
        .message();
        assert_eq!(msg.line1, "Invalid Length");
        assert_eq!(msg.line2, "4!=6");
    }
}
