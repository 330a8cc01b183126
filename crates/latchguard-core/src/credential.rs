//! The stored PIN and the digits typed toward it

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::{DEFAULT_PIN, PIN_LENGTH, PIN_MAX_LENGTH};

/// The persisted secret PIN
///
/// Always 1..=[`PIN_MAX_LENGTH`] ASCII digits, so it never contains the
/// zero byte used as a terminator in storage.
#[derive(Clone)]
pub struct Credential(Zeroizing<Vec<u8>>);

impl Credential {
    /// Validate and wrap a digit sequence
    pub fn new(digits: &[u8]) -> Result<Self> {
        Self::validate(digits)?;
        Ok(Self(Zeroizing::new(digits.to_vec())))
    }

    /// Parse from a string of digits
    pub fn parse(pin: &str) -> Result<Self> {
        Self::new(pin.as_bytes())
    }

    /// The factory credential
    pub fn factory_default() -> Self {
        Self(Zeroizing::new(DEFAULT_PIN.as_bytes().to_vec()))
    }

    /// Check length and content without constructing
    pub fn validate(digits: &[u8]) -> Result<()> {
        if digits.is_empty() || digits.len() > PIN_MAX_LENGTH {
            return Err(Error::InvalidInput(format!(
                "PIN must be 1-{} digits, got {}",
                PIN_MAX_LENGTH,
                digits.len()
            )));
        }
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(Error::InvalidInput("PIN must contain only digits".into()));
        }
        Ok(())
    }

    /// Number of digits
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw digits
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Exact comparison: lengths first, then bytes in constant time
    pub fn matches(&self, input: &[u8]) -> bool {
        if input.len() != self.0.len() {
            return false;
        }
        bool::from(self.0.as_slice().ct_eq(input))
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.as_bytes())
    }
}

impl Eq for Credential {}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} digits>)", self.0.len())
    }
}

/// Digits typed so far for the active PIN entry
#[derive(Default)]
pub struct InputBuffer {
    digits: Zeroizing<Vec<u8>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a digit; returns false if the buffer is already full
    pub fn push(&mut self, digit: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.digits.push(digit);
        true
    }

    /// Whether the buffer holds [`PIN_LENGTH`] digits
    pub fn is_full(&self) -> bool {
        self.digits.len() >= PIN_LENGTH
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn clear(&mut self) {
        self.digits.clear();
    }

    /// Hand the typed digits over and leave the buffer empty
    pub fn take(&mut self) -> Zeroizing<Vec<u8>> {
        std::mem::take(&mut self.digits)
    }

    /// One `*` per typed digit
    pub fn masked(&self) -> String {
        "*".repeat(self.digits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_validation() {
        assert!(Credential::parse("").is_err());
        assert!(Credential::parse("1234567").is_err());
        assert!(Credential::parse("12a4").is_err());
        assert!(Credential::new(&[b'1', 0, b'2']).is_err());
        assert!(Credential::parse("7").is_ok());
        assert!(Credential::parse("123456").is_ok());
    }

    #[test]
    fn test_credential_matches_exactly() {
        let cred = Credential::parse("1234").unwrap();
        assert!(cred.matches(b"1234"));
        assert!(!cred.matches(b"123"));
        assert!(!cred.matches(b"12345"));
        assert!(!cred.matches(b"1235"));
        assert!(!cred.matches(b""));
    }

    #[test]
    fn test_credential_equality() {
        let a = Credential::parse("1234").unwrap();
        assert_eq!(a, Credential::parse("1234").unwrap());
        assert_ne!(a, Credential::parse("1235").unwrap());
        assert_ne!(a, Credential::parse("12345").unwrap());
    }

    #[test]
    fn test_debug_hides_digits() {
        let cred = Credential::parse("987654").unwrap();
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("987654"));
    }

    #[test]
    fn test_input_buffer_bounded() {
        let mut buffer = InputBuffer::new();
        for d in b"123456" {
            assert!(buffer.push(*d));
        }
        assert!(buffer.is_full());
        assert!(!buffer.push(b'7'));
        assert_eq!(buffer.masked(), "******");

        let taken = buffer.take();
        assert_eq!(taken.as_slice(), b"123456");
        assert!(buffer.is_empty());
    }
}
