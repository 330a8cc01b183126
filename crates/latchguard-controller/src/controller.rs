//! The lock's control loop
//!
//! [`Controller::tick`] is called continuously with the current time. Each
//! call does a bounded amount of work: relock if an unlock pulse is over,
//! wait out a held message, scan the keypad, poll the fingerprint sensor or
//! advance an enrollment, refresh the idle screen and run the power checks.
//! Nothing in here sleeps.
//!
//! Administrative flows are a small mode machine layered on top of the
//! idle PIN entry. Every one of them starts with re-entry of the current
//! PIN, and none of them touches the lockout counters.
//!
//! A credential record that cannot be read does not stop the lock. It
//! comes up with PIN entry disabled and single-factor fingerprint access,
//! the same way a missing sensor leaves it PIN-only.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use latchguard_core::{
    Actuator, AdminError, AdminFlow, Attempt, AuthContext, AuthMode, AuthState, BiometricId,
    BiometricSensor, Credential, CredentialRecord, CredentialStore, Decision, Display, EntryEvent,
    EntryField, EntryKind, Feedback, FeedbackPattern, GestureDetector, InputBuffer, Key, Keypad,
    Modality, Power, ScanResult, StatusMessage,
};

use crate::actuator::ActuatorController;
use crate::config::ControllerConfig;
use crate::enroll::{delete_template, EnrollStep, EnrollTimings, EnrollmentSession};
use crate::error::Result;
use crate::power::{PowerEvent, PowerManager};
use crate::storage::load_or_initialize;

/// Cells in the lockout countdown bar
const BAR_CELLS: usize = latchguard_core::types::DISPLAY_COLUMNS;

/// Everything the controller drives
pub struct Peripherals {
    pub keypad: Box<dyn Keypad>,
    pub sensor: Box<dyn BiometricSensor>,
    pub store: Box<dyn CredentialStore>,
    pub display: Box<dyn Display>,
    pub feedback: Box<dyn Feedback>,
    pub actuator: Box<dyn Actuator>,
    pub power: Box<dyn Power>,
}

/// What a successful PIN re-entry unlocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminPurpose {
    /// Enrollment, deletion and mode toggle
    Menu,
    /// Replacing the PIN
    ChangePin,
}

/// What a typed template slot is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPurpose {
    Enroll,
    Delete,
}

/// Observable summary of the current mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Idle,
    AdminAuth(AdminPurpose),
    AdminMenu,
    ChangeNew,
    EnterId(IdPurpose),
    Enrolling(BiometricId),
}

enum Mode {
    Idle,
    AdminAuth {
        purpose: AdminPurpose,
        field: EntryField,
    },
    AdminMenu,
    ChangeNew {
        current: Zeroizing<Vec<u8>>,
        field: EntryField,
    },
    EnterId {
        purpose: IdPurpose,
        field: EntryField,
    },
    Enrolling(EnrollmentSession),
}

impl Mode {
    fn kind(&self) -> ModeKind {
        match self {
            Mode::Idle => ModeKind::Idle,
            Mode::AdminAuth { purpose, .. } => ModeKind::AdminAuth(*purpose),
            Mode::AdminMenu => ModeKind::AdminMenu,
            Mode::ChangeNew { .. } => ModeKind::ChangeNew,
            Mode::EnterId { purpose, .. } => ModeKind::EnterId(*purpose),
            Mode::Enrolling(session) => ModeKind::Enrolling(session.id()),
        }
    }
}

/// The lock controller
pub struct Controller {
    config: ControllerConfig,
    keypad: Box<dyn Keypad>,
    sensor: Box<dyn BiometricSensor>,
    store: Box<dyn CredentialStore>,
    display: Box<dyn Display>,
    feedback: Box<dyn Feedback>,
    power: Box<dyn Power>,
    actuator: ActuatorController,
    power_manager: PowerManager,

    auth: AuthContext,
    /// `None` when the stored record could not be read
    credential: Option<Credential>,
    buffer: InputBuffer,
    clear_gesture: GestureDetector,
    confirm_gesture: GestureDetector,
    mode: Mode,
    sensor_available: bool,

    hold_until: Option<Instant>,
    last_key_scan: Option<Instant>,
    last_biometric_poll: Option<Instant>,
    shown: Option<StatusMessage>,
}

impl Controller {
    /// Bring the lock up
    ///
    /// Loads the credential record, writing the factory default on an
    /// uninitialized store, and handshakes the sensor. A sensor that does
    /// not answer leaves the lock running PIN-only; an unreadable record
    /// leaves it fingerprint-only. Only an invalid config is an error.
    pub fn boot(peripherals: Peripherals, config: ControllerConfig, now: Instant) -> Result<Self> {
        config.validate()?;

        let Peripherals {
            keypad,
            mut sensor,
            mut store,
            mut display,
            feedback,
            actuator,
            power,
        } = peripherals;

        let (credential, mode) =
            match load_or_initialize(store.as_mut(), &CredentialRecord::factory_default()) {
                Ok(record) => (Some(record.credential), record.mode),
                Err(e) => {
                    error!("Credential record unreadable: {}; PIN entry disabled", e);
                    (None, AuthMode::SingleFactor)
                }
            };
        display.set_backlight(true);

        let sensor_available = match sensor.handshake() {
            Ok(()) => {
                info!("Fingerprint sensor found");
                true
            }
            Err(e) => {
                warn!("{}; continuing PIN-only", e);
                false
            }
        };

        let threshold = config.gesture_threshold;
        let mut controller = Self {
            keypad,
            sensor,
            store,
            display,
            feedback,
            power,
            actuator: ActuatorController::new(actuator, config.unlock_duration()),
            power_manager: PowerManager::new(config.inactivity_timeout(), now),
            auth: AuthContext::new(mode, config.lockout_policy()),
            credential,
            buffer: InputBuffer::new(),
            clear_gesture: GestureDetector::new(Key::Clear, threshold),
            confirm_gesture: GestureDetector::new(Key::Confirm, threshold),
            mode: Mode::Idle,
            sensor_available,
            hold_until: None,
            last_key_scan: None,
            last_biometric_poll: None,
            shown: None,
            config,
        };

        info!(
            "Latchguard ready in {} mode, lockout after {} failures for {}",
            controller.auth.mode(),
            controller.config.max_wrong_attempts,
            controller.config.lockout_policy().describe_duration()
        );
        if !controller.storage_ok() {
            controller.hold(storage_error(), now);
        } else if !sensor_available {
            controller.hold(StatusMessage::new("Sensor Failed!", "System limited"), now);
        } else {
            controller.render(now);
        }
        Ok(controller)
    }

    /// Run one loop iteration
    pub fn tick(&mut self, now: Instant) {
        if self.actuator.is_active() {
            if !self.actuator.poll(now) {
                return;
            }
            self.render(now);
        }

        if let Some(until) = self.hold_until {
            if now < until {
                return;
            }
            self.hold_until = None;
            self.render(now);
        }

        if due(self.last_key_scan, self.config.key_scan_interval(), now) {
            self.last_key_scan = Some(now);
            if let Some(key) = self.keypad.poll() {
                self.activity(now);
                self.handle_key(key, now);
            }
        }

        if self.is_busy() {
            return;
        }

        if due(
            self.last_biometric_poll,
            self.config.biometric_poll_interval(),
            now,
        ) {
            match self.mode.kind() {
                ModeKind::Idle => {
                    self.last_biometric_poll = Some(now);
                    self.poll_sensor(now);
                }
                ModeKind::Enrolling(_) => {
                    self.last_biometric_poll = Some(now);
                    self.step_enrollment(now);
                }
                _ => {}
            }
        }

        if self.is_busy() {
            return;
        }

        if matches!(self.mode, Mode::Idle) {
            self.render(now);
        }

        let may_hibernate = self.may_hibernate(now);
        let event = self.power_manager.poll(
            now,
            may_hibernate,
            self.display.as_mut(),
            self.power.as_mut(),
        );
        if event == PowerEvent::Hibernated {
            self.clear_gesture.reset();
            self.confirm_gesture.reset();
            self.shown = None;
            self.render(now);
        }
    }

    /// Current auth mode
    pub fn auth_mode(&self) -> AuthMode {
        self.auth.mode()
    }

    /// Authentication state, for inspection
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn mode(&self) -> ModeKind {
        self.mode.kind()
    }

    /// Whether the sensor passed its handshake
    pub fn sensor_available(&self) -> bool {
        self.sensor_available
    }

    /// Whether the credential record was readable at boot
    pub fn storage_ok(&self) -> bool {
        self.credential.is_some()
    }

    /// Whether an unlock pulse is running
    pub fn is_unlocked(&self) -> bool {
        self.actuator.is_active()
    }

    /// Unlock pulses since boot
    pub fn unlock_count(&self) -> u64 {
        self.actuator.pulse_count()
    }

    /// Whether a result message is being held on screen
    pub fn is_holding(&self) -> bool {
        self.hold_until.is_some()
    }

    fn is_busy(&self) -> bool {
        self.actuator.is_active() || self.hold_until.is_some()
    }

    fn activity(&mut self, now: Instant) {
        self.power_manager
            .record_activity(now, self.display.as_mut());
    }

    fn may_hibernate(&mut self, now: Instant) -> bool {
        matches!(self.mode, Mode::Idle)
            && self.buffer.is_empty()
            && !self.is_busy()
            && self.auth.state(now) == AuthState::Idle
    }

    // ============================================
    // Display
    // ============================================

    /// Show a message unless it is already on screen
    fn show(&mut self, message: StatusMessage) {
        if self.shown.as_ref() == Some(&message) {
            return;
        }
        self.display.show(&message);
        self.shown = Some(message);
    }

    /// Show a result and stop reading input until it has been seen
    fn hold(&mut self, message: StatusMessage, now: Instant) {
        self.display.show(&message);
        self.shown = Some(message);
        self.hold_until = Some(now + self.config.message_hold());
    }

    /// Draw the screen for the current mode
    fn render(&mut self, now: Instant) {
        if matches!(self.mode, Mode::Idle) {
            let message = self.idle_screen(now);
            self.show(message);
            return;
        }

        let message = match &self.mode {
            Mode::Idle => return,
            Mode::AdminAuth { purpose, field } => {
                let title = match purpose {
                    AdminPurpose::Menu => "  PIN Required",
                    AdminPurpose::ChangePin => "  Current PIN:",
                };
                StatusMessage::new(title, field.render())
            }
            Mode::AdminMenu => StatusMessage::new("1:Enroll 2:Del", "3:Auth *:Exit"),
            Mode::ChangeNew { field, .. } => StatusMessage::new("    New PIN:", field.render()),
            Mode::EnterId { field, .. } => StatusMessage::new("Enter ID:", field.render()),
            Mode::Enrolling(session) => session.prompt(),
        };
        self.show(message);
    }

    fn idle_screen(&mut self, now: Instant) -> StatusMessage {
        if !self.buffer.is_empty() {
            return StatusMessage::new("      PIN:", format!("     {}", self.buffer.masked()));
        }
        match self.auth.state(now) {
            AuthState::LockedOut { pin, biometric } => self.lockout_screen(pin, biometric, now),
            AuthState::AwaitingSecondFactor(verified) => {
                let next = match verified.other() {
                    Modality::Pin => "Enter PIN",
                    Modality::Biometric => "Place Finger",
                };
                StatusMessage::new("    Ready", next)
            }
            AuthState::Idle if self.credential.is_none() => storage_error(),
            AuthState::Idle => StatusMessage::ready(),
        }
    }

    fn lockout_screen(&mut self, pin: bool, biometric: bool, now: Instant) -> StatusMessage {
        let which = match (pin, biometric) {
            (true, true) => "PIN+FP",
            (true, false) => "PIN",
            _ => "FP",
        };
        let remaining = [Modality::Pin, Modality::Biometric]
            .into_iter()
            .map(|m| self.auth.tracker_mut(m).lockout_progress(now))
            .fold(0.0f32, f32::max);
        let cells = ((remaining * BAR_CELLS as f32).ceil() as usize).min(BAR_CELLS);
        StatusMessage::new(format!("Lockout: {}", which), "#".repeat(cells))
    }

    // ============================================
    // Authentication
    // ============================================

    fn submit_pin(&mut self, now: Instant) {
        let digits = self.buffer.take();
        let Some(credential) = &self.credential else {
            error!("PIN rejected: no readable credential record");
            self.feedback.play(FeedbackPattern::Error);
            self.hold(storage_error(), now);
            return;
        };
        let decision = self.auth.submit(credential, Attempt::Pin(&digits), now);
        self.announce(decision, now);
    }

    fn poll_sensor(&mut self, now: Instant) {
        if !self.sensor_available {
            return;
        }
        let result = match self.sensor.poll() {
            ScanResult::NoFinger => return,
            ScanResult::ImageError => {
                self.activity(now);
                debug!("Fingerprint image error");
                self.feedback.play(FeedbackPattern::Error);
                self.hold(StatusMessage::new("Image Error", "Try Again"), now);
                return;
            }
            ScanResult::NoMatch => None,
            ScanResult::Matched(id) => Some(id),
        };
        self.activity(now);
        let decision = self.auth.submit_biometric(result, now);
        self.announce(decision, now);
    }

    /// Display, sound and act on a decision
    fn announce(&mut self, decision: Decision, now: Instant) {
        match &decision {
            Decision::Granted {
                modality,
                biometric_id,
            } => info!(%modality, ?biometric_id, "Access granted"),
            Decision::PartialOk { modality } | Decision::PartialOkOtherLocked { modality, .. } => {
                info!(%modality, "Factor verified, waiting for the other")
            }
            Decision::DeniedRetry {
                modality,
                attempts_remaining,
                reason,
            } => warn!(%modality, attempts_remaining, ?reason, "Access denied"),
            Decision::DeniedNowLocked { modality, .. } => {
                let state = self.auth.tracker_mut(*modality).describe(now);
                warn!(%modality, "Too many failures: {}", state)
            }
            Decision::DeniedLockedOut { modality, .. } => {
                debug!(%modality, "Attempt during lockout")
            }
        }
        if let Some(e) = decision.denial() {
            debug!("{}", e);
        }

        let message = decision.message();
        if decision.is_granted() {
            self.display.show(&message);
            self.shown = Some(message);
            self.actuator.unlock(now, self.feedback.as_mut());
        } else {
            self.feedback.play(decision.feedback());
            self.hold(message, now);
        }
    }

    // ============================================
    // Keypad
    // ============================================

    fn handle_key(&mut self, key: Key, now: Instant) {
        let mode = std::mem::replace(&mut self.mode, Mode::Idle);
        self.mode = match mode {
            Mode::Idle => self.idle_key(key, now),
            Mode::AdminAuth { purpose, mut field } => match field.feed(key) {
                EntryEvent::Submitted(input) => self.finish_admin_auth(purpose, input, now),
                _ => Mode::AdminAuth { purpose, field },
            },
            Mode::AdminMenu => self.menu_key(key, now),
            Mode::ChangeNew { current, mut field } => match field.feed(key) {
                EntryEvent::Submitted(new) => {
                    self.finish_change(&current, &new, now);
                    Mode::Idle
                }
                _ => Mode::ChangeNew { current, field },
            },
            Mode::EnterId { purpose, mut field } => match field.feed(key) {
                EntryEvent::Submitted(input) => self.finish_enter_id(purpose, &input, now),
                _ => Mode::EnterId { purpose, field },
            },
            Mode::Enrolling(session) => {
                if key == Key::Clear {
                    info!("Enrollment of ID #{} aborted", session.id());
                    self.hold(StatusMessage::new("Enroll Aborted", ""), now);
                    Mode::Idle
                } else {
                    Mode::Enrolling(session)
                }
            }
        };

        if !self.is_busy() {
            self.render(now);
        }
    }

    fn idle_key(&mut self, key: Key, now: Instant) -> Mode {
        let clear_done = self.clear_gesture.press(key);
        let confirm_done = self.confirm_gesture.press(key);

        match key {
            Key::Clear if clear_done => {
                self.buffer.clear();
                info!("PIN change requested");
                Mode::AdminAuth {
                    purpose: AdminPurpose::ChangePin,
                    field: EntryField::new(EntryKind::Secret),
                }
            }
            Key::Clear => {
                self.buffer.clear();
                Mode::Idle
            }
            Key::Confirm if confirm_done => {
                self.buffer.clear();
                info!("Admin menu requested");
                Mode::AdminAuth {
                    purpose: AdminPurpose::Menu,
                    field: EntryField::new(EntryKind::Secret),
                }
            }
            Key::Confirm => {
                if !self.buffer.is_empty() {
                    self.submit_pin(now);
                }
                Mode::Idle
            }
            Key::Digit(_) => {
                if let Some(ascii) = key.ascii() {
                    self.buffer.push(ascii);
                }
                if self.buffer.is_full() {
                    self.submit_pin(now);
                }
                Mode::Idle
            }
        }
    }

    fn finish_admin_auth(
        &mut self,
        purpose: AdminPurpose,
        input: Zeroizing<Vec<u8>>,
        now: Instant,
    ) -> Mode {
        let verified = match &self.credential {
            Some(credential) => AdminFlow::verify_admin(credential, &input),
            None => {
                error!(?purpose, "Admin flow refused: no readable credential record");
                Err(AdminError::WrongCurrentCredential)
            }
        };
        if let Err(e) = verified {
            warn!(?purpose, "Admin re-authentication failed: {}", e);
            self.feedback.play(FeedbackPattern::Error);
            let message = match purpose {
                AdminPurpose::Menu => StatusMessage::new("Access Denied", ""),
                AdminPurpose::ChangePin => StatusMessage::new("   PIN Error", ""),
            };
            self.hold(message, now);
            return Mode::Idle;
        }

        match purpose {
            AdminPurpose::Menu => {
                info!("Admin menu opened");
                Mode::AdminMenu
            }
            AdminPurpose::ChangePin => Mode::ChangeNew {
                current: input,
                field: EntryField::new(EntryKind::Secret),
            },
        }
    }

    fn menu_key(&mut self, key: Key, now: Instant) -> Mode {
        let purpose = match key {
            Key::Digit(1) => IdPurpose::Enroll,
            Key::Digit(2) => IdPurpose::Delete,
            Key::Digit(3) => {
                self.toggle_mode(now);
                return Mode::Idle;
            }
            Key::Clear => return Mode::Idle,
            _ => return Mode::AdminMenu,
        };

        if !self.sensor_available {
            self.feedback.play(FeedbackPattern::Error);
            self.hold(StatusMessage::new("Sensor Failed!", "System limited"), now);
            return Mode::Idle;
        }
        Mode::EnterId {
            purpose,
            field: EntryField::new(EntryKind::Numeric),
        }
    }

    fn toggle_mode(&mut self, now: Instant) {
        match AdminFlow::toggle_auth_mode(&mut self.auth, self.store.as_mut()) {
            Ok(mode) => {
                info!("Auth mode set to {}", mode);
                self.feedback.play(FeedbackPattern::Success);
                let line = match mode {
                    AuthMode::TwoFactor => "2FA Enabled",
                    AuthMode::SingleFactor => "2FA Disabled",
                };
                self.hold(StatusMessage::new(line, ""), now);
            }
            Err(e) => {
                error!("Failed to persist auth mode: {}", e);
                self.feedback.play(FeedbackPattern::Error);
                self.hold(StatusMessage::new("Storage Error", "Try Again"), now);
            }
        }
    }

    fn finish_change(&mut self, current: &[u8], new: &[u8], now: Instant) {
        match AdminFlow::change_credential(self.store.as_mut(), current, new) {
            Ok(credential) => {
                info!("PIN changed");
                self.credential = Some(credential);
                self.feedback.play(FeedbackPattern::Success);
                self.hold(StatusMessage::new("  PIN Updated", ""), now);
            }
            Err(AdminError::Core(e)) => {
                error!("Failed to store new PIN: {}", e);
                self.feedback.play(FeedbackPattern::Error);
                self.hold(StatusMessage::new("Storage Error", "Try Again"), now);
            }
            Err(e) => {
                warn!("PIN change rejected: {}", e);
                self.feedback.play(FeedbackPattern::Error);
                self.hold(StatusMessage::new("   PIN Error", "   No Change"), now);
            }
        }
    }

    fn finish_enter_id(&mut self, purpose: IdPurpose, input: &[u8], now: Instant) -> Mode {
        let id = match AdminFlow::parse_biometric_id(input) {
            Ok(id) => id,
            Err(e) => {
                warn!(?purpose, "Rejected template ID: {}", e);
                self.feedback.play(FeedbackPattern::Error);
                let message = match e {
                    AdminError::ReservedIdentity => StatusMessage::new("ID #0 Invalid!", "Try Again"),
                    _ => StatusMessage::new("Invalid ID", "Try Again"),
                };
                self.hold(message, now);
                return Mode::Idle;
            }
        };

        match purpose {
            IdPurpose::Enroll => {
                Mode::Enrolling(EnrollmentSession::new(id, self.enroll_timings(), now))
            }
            IdPurpose::Delete => {
                let (deleted, message) = delete_template(self.sensor.as_mut(), id);
                self.feedback.play(if deleted {
                    FeedbackPattern::Success
                } else {
                    FeedbackPattern::Error
                });
                self.hold(message, now);
                Mode::Idle
            }
        }
    }

    // ============================================
    // Enrollment
    // ============================================

    fn enroll_timings(&self) -> EnrollTimings {
        EnrollTimings {
            capture_timeout: self.config.capture_timeout(),
            removal_timeout: self.config.removal_timeout(),
            removal_settle: self.config.removal_settle(),
        }
    }

    fn step_enrollment(&mut self, now: Instant) {
        let Mode::Enrolling(session) = &mut self.mode else {
            return;
        };

        match session.step(self.sensor.as_mut(), now) {
            EnrollStep::Pending(Some(message)) => {
                self.activity(now);
                self.show(message);
            }
            EnrollStep::Pending(None) => {}
            EnrollStep::Enrolled(id) => {
                self.activity(now);
                self.mode = Mode::Idle;
                self.feedback.play(FeedbackPattern::Success);
                self.hold(StatusMessage::new("Success!", format!("ID #{}", id)), now);
            }
            EnrollStep::Failed(e) => {
                self.activity(now);
                self.feedback.play(FeedbackPattern::Error);
                self.hold(e.message(), now);
            }
        }
    }
}

fn storage_error() -> StatusMessage {
    StatusMessage::new("Storage Error", "PIN Disabled")
}

fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.map_or(true, |at| now.saturating_duration_since(at) >= interval)
}
