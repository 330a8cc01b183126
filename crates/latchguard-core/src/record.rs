//! Persisted credential record
//!
//! Record layout (32 bytes):
//! ```text
//! OFFSET      SIZE        FIELD
//! ──────────────────────────────────────────────────────
//! 0x00        4           magic: "LTCH"
//! 0x04        1           version: 1
//! 0x05        1           auth_mode (1 = two-factor, anything else single)
//! 0x06        1           credential_len (1..=6)
//! 0x07        6           credential digits, zero-filled
//! 0x0D        3           reserved
//! 0x10        16          checksum: SHA-256(0x00..0x10)[..16]
//! ```
//!
//! Storage that was never written (erased flash reads as all `0xFF`,
//! a fresh file as all zero) fails the magic check and decodes as
//! [`Error::StorageUninitialized`].

use sha2::{Digest, Sha256};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::types::AuthMode;
use crate::{PIN_MAX_LENGTH, RECORD_SIZE, VERSION};

/// Magic bytes identifying a credential record
pub const RECORD_MAGIC: &[u8; 4] = b"LTCH";

const VERSION_OFFSET: usize = 0x04;
const MODE_OFFSET: usize = 0x05;
const LEN_OFFSET: usize = 0x06;
const DIGITS_OFFSET: usize = 0x07;
const BODY_SIZE: usize = 0x10;

/// Everything that survives a power cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub credential: Credential,
    pub mode: AuthMode,
}

impl CredentialRecord {
    pub fn new(credential: Credential, mode: AuthMode) -> Self {
        Self { credential, mode }
    }

    /// First-boot contents
    pub fn factory_default() -> Self {
        Self::new(Credential::factory_default(), AuthMode::SingleFactor)
    }

    /// Serialize to the fixed layout
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];

        bytes[0x00..VERSION_OFFSET].copy_from_slice(RECORD_MAGIC);
        bytes[VERSION_OFFSET] = VERSION;
        bytes[MODE_OFFSET] = self.mode.as_byte();

        let digits = self.credential.as_bytes();
        bytes[LEN_OFFSET] = digits.len() as u8;
        bytes[DIGITS_OFFSET..DIGITS_OFFSET + digits.len()].copy_from_slice(digits);

        // Reserved (0x0D, 3 bytes) - already zeroed

        let checksum = checksum(&bytes[..BODY_SIZE]);
        bytes[BODY_SIZE..].copy_from_slice(&checksum);

        bytes
    }

    /// Deserialize and validate
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(Error::CorruptRecord(format!(
                "expected {} bytes, got {}",
                RECORD_SIZE,
                bytes.len()
            )));
        }

        if &bytes[0x00..VERSION_OFFSET] != RECORD_MAGIC {
            return Err(Error::StorageUninitialized);
        }

        let version = bytes[VERSION_OFFSET];
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        if checksum(&bytes[..BODY_SIZE]) != bytes[BODY_SIZE..] {
            return Err(Error::ChecksumMismatch);
        }

        // An unknown mode byte falls back to the weaker-but-usable mode
        let mode = AuthMode::from_byte(bytes[MODE_OFFSET]).unwrap_or(AuthMode::SingleFactor);

        let len = bytes[LEN_OFFSET] as usize;
        if len == 0 || len > PIN_MAX_LENGTH {
            return Err(Error::CorruptRecord(format!("credential length {}", len)));
        }
        let digits = &bytes[DIGITS_OFFSET..DIGITS_OFFSET + len];
        let credential = Credential::new(digits)
            .map_err(|_| Error::CorruptRecord("credential is not all digits".into()))?;

        if bytes[DIGITS_OFFSET + len..BODY_SIZE].iter().any(|&b| b != 0) {
            return Err(Error::CorruptRecord("non-zero padding".into()));
        }

        Ok(Self { credential, mode })
    }
}

fn checksum(body: &[u8]) -> [u8; RECORD_SIZE - BODY_SIZE] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; RECORD_SIZE - BODY_SIZE];
    out.copy_from_slice(&digest[..RECORD_SIZE - BODY_SIZE]);
    out
}
