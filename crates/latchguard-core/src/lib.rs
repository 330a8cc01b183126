//! Latchguard Core - Authentication and lockout state machine
//!
//! This crate holds everything that decides whether the door opens:
//! the PIN credential and its persisted record, per-modality lockout
//! tracking, the single/two-factor authentication state machine and the
//! administrative flows. It performs no I/O; hardware is reached through
//! the traits in [`ports`].

pub mod admin;
pub mod auth;
pub mod credential;
pub mod error;
pub mod lockout;
pub mod ports;
pub mod record;
pub mod types;

pub use admin::{AdminError, AdminFlow, EntryEvent, EntryField, EntryKind, GestureDetector};
pub use auth::{Attempt, AuthContext, AuthState, Decision, DenyReason, PartialVerification};
pub use credential::{Credential, InputBuffer};
pub use error::{Error, Result};
pub use lockout::{LockoutPolicy, LockoutTracker};
pub use ports::{
    Actuator, BiometricSensor, CaptureOutcome, CaptureSlot, CredentialStore, Display, Feedback, Keypad,
    Power,
};
pub use record::{CredentialRecord, RECORD_MAGIC};
pub use types::{
    AuthMode, BiometricId, FeedbackPattern, Key, Modality, ScanResult, StatusMessage, ToneStep,
};

/// Persisted record format version
pub const VERSION: u8 = 1;

/// Failed attempts per modality before that modality locks out
pub const MAX_WRONG_ATTEMPTS: u32 = 5;

/// Length of the lockout window in seconds
pub const LOCKOUT_DURATION_SECS: u64 = 300;

/// Digits accepted into the input buffer; a full buffer submits itself
pub const PIN_LENGTH: usize = 6;

/// Longest credential that can be stored
pub const PIN_MAX_LENGTH: usize = 6;

/// Credential written on first boot
pub const DEFAULT_PIN: &str = "123456";

/// Consecutive presses of a control key that open an admin flow
pub const GESTURE_THRESHOLD: u8 = 12;

/// Size of the persisted credential record in bytes
pub const RECORD_SIZE: usize = 32;

/// Highest template slot that can be enrolled
pub const MAX_BIOMETRIC_ID: u16 = 127;
