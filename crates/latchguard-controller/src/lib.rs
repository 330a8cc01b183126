//! Latchguard Controller - Runs the door lock
//!
//! Owns the peripherals and drives the authentication state machine from
//! `latchguard-core` in a non-blocking loop:
//! - Keypad PIN entry with masked echo and auto-submit
//! - Fingerprint polling, enrollment and deletion
//! - Timed unlock pulses
//! - Lockout countdown, backlight and hibernation
//! - Credential persistence and simulated peripherals for running off-device

pub mod actuator;
pub mod config;
pub mod controller;
pub mod enroll;
pub mod error;
pub mod power;
pub mod sim;
pub mod storage;

pub use actuator::ActuatorController;
pub use config::ControllerConfig;
pub use controller::{AdminPurpose, Controller, IdPurpose, ModeKind, Peripherals};
pub use enroll::{delete_template, EnrollError, EnrollStage, EnrollStep, EnrollTimings, EnrollmentSession};
pub use error::{ControllerError, Result};
pub use power::{PowerEvent, PowerManager};
pub use storage::{load_or_initialize, FileCredentialStore, MemoryCredentialStore};
