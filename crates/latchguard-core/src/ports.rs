//! Interfaces to the hardware around the state machine
//!
//! The core never talks to devices directly. The control loop is handed
//! implementations of these traits: real drivers on the lock, or the
//! simulated adapters used by the CLI and the tests.

use crate::credential::Credential;
use crate::error::Result;
use crate::record::CredentialRecord;
use crate::types::{AuthMode, BiometricId, FeedbackPattern, Key, ScanResult, StatusMessage};

/// Matrix keypad, already debounced
pub trait Keypad: Send {
    /// Next pressed key, if any
    fn poll(&mut self) -> Option<Key>;
}

/// Which template buffer an enrollment capture fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSlot {
    First,
    Second,
}

/// Result of one enrollment capture attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    NoFinger,
    Captured,
    ImageError,
}

/// Fingerprint sensor with on-device template storage
pub trait BiometricSensor: Send {
    /// Verify the sensor answers; failure leaves the lock PIN-only
    fn handshake(&mut self) -> Result<()>;

    /// Look for a finger and search the template database
    fn poll(&mut self) -> ScanResult;

    /// Capture an image into a template buffer for enrollment
    fn capture(&mut self, slot: CaptureSlot) -> CaptureOutcome;

    /// Whether a finger is currently on the sensor
    fn is_finger_present(&mut self) -> bool;

    /// Combine both captured buffers into a model
    fn create_model(&mut self) -> Result<()>;

    /// Store the combined model under `id`
    fn store_model(&mut self, id: BiometricId) -> Result<()>;

    /// Remove the template stored under `id`
    fn delete_model(&mut self, id: BiometricId) -> Result<()>;
}

/// Non-volatile storage for the PIN and auth mode
pub trait CredentialStore: Send {
    /// Read the full record
    fn load_record(&self) -> Result<CredentialRecord>;

    /// Replace the full record
    fn save_record(&mut self, record: &CredentialRecord) -> Result<()>;

    fn load(&self) -> Result<Credential> {
        Ok(self.load_record()?.credential)
    }

    fn save(&mut self, credential: &Credential) -> Result<()> {
        let mut record = self.load_record()?;
        record.credential = credential.clone();
        self.save_record(&record)
    }

    fn load_mode(&self) -> Result<AuthMode> {
        Ok(self.load_record()?.mode)
    }

    fn save_mode(&mut self, mode: AuthMode) -> Result<()> {
        let mut record = self.load_record()?;
        record.mode = mode;
        self.save_record(&record)
    }
}

/// 16x2 character display
pub trait Display: Send {
    fn show(&mut self, message: &StatusMessage);
    fn set_backlight(&mut self, on: bool);
    /// Blank the panel before hibernation
    fn power_off(&mut self);
}

/// Buzzer
pub trait Feedback: Send {
    fn play(&mut self, pattern: FeedbackPattern);
}

/// Lock relay
pub trait Actuator: Send {
    fn set_locked(&mut self, locked: bool);
}

/// Sleep control
pub trait Power: Send {
    /// Enter deep sleep; wake-up restarts the controller
    fn hibernate(&mut self);
}
