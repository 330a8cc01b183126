//! Error types for the Latchguard core

use thiserror::Error;

use crate::types::Modality;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Fingerprint hardware failed its initial handshake
    #[error("Fingerprint sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// A sensor operation failed after the handshake succeeded
    #[error("Sensor error: {0}")]
    Sensor(String),

    #[error("Verification failed")]
    VerificationFailed,

    #[error("{modality} locked out for {remaining_secs} seconds")]
    LockedOut {
        modality: Modality,
        remaining_secs: u64,
    },

    /// Wrong current PIN during a privileged operation
    #[error("Admin authentication failed")]
    AdminAuthFailed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No credential has been written yet
    #[error("Storage uninitialized")]
    StorageUninitialized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unsupported record version: {0}")]
    UnsupportedVersion(u8),

    #[error("Record checksum mismatch")]
    ChecksumMismatch,

    #[error("Invalid auth mode byte: {0:#04x}")]
    InvalidAuthMode(u8),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
