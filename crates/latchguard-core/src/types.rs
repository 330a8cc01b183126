//! Core types shared by the state machine and its collaborators

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the two independent authentication channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Numeric PIN typed on the keypad
    Pin,
    /// Fingerprint matched by the sensor
    Biometric,
}

impl Modality {
    /// The other channel
    pub fn other(self) -> Self {
        match self {
            Modality::Pin => Modality::Biometric,
            Modality::Biometric => Modality::Pin,
        }
    }

    /// Short label that fits on the display
    pub fn label(self) -> &'static str {
        match self {
            Modality::Pin => "PIN",
            Modality::Biometric => "FP",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Pin => write!(f, "pin"),
            Modality::Biometric => write!(f, "biometric"),
        }
    }
}

/// How verifications combine into an access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Either modality alone opens the lock
    #[default]
    SingleFactor,
    /// Both modalities must succeed, in any order
    TwoFactor,
}

impl AuthMode {
    /// Persisted byte value
    pub fn as_byte(self) -> u8 {
        match self {
            AuthMode::SingleFactor => 0,
            AuthMode::TwoFactor => 1,
        }
    }

    /// Decode a persisted byte, rejecting anything out of range
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(AuthMode::SingleFactor),
            1 => Ok(AuthMode::TwoFactor),
            other => Err(Error::InvalidAuthMode(other)),
        }
    }

    /// The opposite mode
    pub fn toggled(self) -> Self {
        match self {
            AuthMode::SingleFactor => AuthMode::TwoFactor,
            AuthMode::TwoFactor => AuthMode::SingleFactor,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::SingleFactor => write!(f, "single-factor"),
            AuthMode::TwoFactor => write!(f, "two-factor"),
        }
    }
}

/// Enrolled fingerprint template slot
///
/// Slot 0 is reserved by the sensor and never identifies a finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BiometricId(u16);

impl BiometricId {
    /// Wrap a raw slot number
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    /// Raw slot number
    pub fn get(self) -> u16 {
        self.0
    }

    /// Whether this identifies an enrolled finger
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for BiometricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of polling the fingerprint sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResult {
    /// Nothing on the sensor
    NoFinger,
    /// A finger was read but matched no template
    NoMatch,
    /// A finger matched an enrolled template
    Matched(BiometricId),
    /// A finger was present but the image could not be processed
    ImageError,
}

/// A key from the 4x3 matrix keypad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// `0`-`9`
    Digit(u8),
    /// `*`
    Clear,
    /// `#`
    Confirm,
}

impl Key {
    /// Map a keypad legend to a key
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0'..='9' => Some(Key::Digit(c as u8 - b'0')),
            '*' => Some(Key::Clear),
            '#' => Some(Key::Confirm),
            _ => None,
        }
    }

    /// ASCII byte for a digit key; `None` for control keys and digits above 9
    pub fn ascii(self) -> Option<u8> {
        match self {
            Key::Digit(d) if d <= 9 => Some(b'0' + d),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Digit(d) => write!(f, "{}", d),
            Key::Clear => write!(f, "*"),
            Key::Confirm => write!(f, "#"),
        }
    }
}

/// One buzzer tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneStep {
    /// Frequency in Hz
    pub frequency_hz: u16,
    /// How long the tone sounds
    pub duration_ms: u16,
}

const fn tone(frequency_hz: u16) -> ToneStep {
    ToneStep {
        frequency_hz,
        duration_ms: 100,
    }
}

const SUCCESS_TONES: [ToneStep; 2] = [tone(1000), tone(2000)];
const ERROR_TONES: [ToneStep; 1] = [tone(300)];
const WARNING_TONES: [ToneStep; 4] = [tone(500), tone(500), tone(500), tone(500)];
const ALARM_TONES: [ToneStep; 10] = [
    tone(800),
    tone(600),
    tone(800),
    tone(600),
    tone(800),
    tone(600),
    tone(800),
    tone(600),
    tone(800),
    tone(600),
];

/// Audible feedback accompanying every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackPattern {
    Success,
    Error,
    Warning,
    Alarm,
}

impl FeedbackPattern {
    /// Full tone sequence for this pattern, repeats already expanded
    pub fn tones(self) -> &'static [ToneStep] {
        match self {
            FeedbackPattern::Success => &SUCCESS_TONES,
            FeedbackPattern::Error => &ERROR_TONES,
            FeedbackPattern::Warning => &WARNING_TONES,
            FeedbackPattern::Alarm => &ALARM_TONES,
        }
    }

    /// Total playing time
    pub fn duration_ms(self) -> u32 {
        self.tones().iter().map(|t| t.duration_ms as u32).sum()
    }
}

/// Width of one display line
pub const DISPLAY_COLUMNS: usize = 16;

/// Two-line status text for the 16x2 display
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusMessage {
    pub line1: String,
    pub line2: String,
}

impl StatusMessage {
    /// Build a message, truncating each line to the display width
    pub fn new(line1: impl Into<String>, line2: impl Into<String>) -> Self {
        Self {
            line1: truncate(line1.into()),
            line2: truncate(line2.into()),
        }
    }

    /// The idle screen
    pub fn ready() -> Self {
        Self::new("    Ready", "")
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}|{}]", self.line1, self.line2)
    }
}

fn truncate(mut line: String) -> String {
    if line.chars().count() > DISPLAY_COLUMNS {
        line = line.chars().take(DISPLAY_COLUMNS).collect();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_other() {
        assert_eq!(Modality::Pin.other(), Modality::Biometric);
        assert_eq!(Modality::Biometric.other(), Modality::Pin);
    }

    #[test]
    fn test_auth_mode_byte_range() {
        assert_eq!(AuthMode::from_byte(0).unwrap(), AuthMode::SingleFactor);
        assert_eq!(AuthMode::from_byte(1).unwrap(), AuthMode::TwoFactor);
        assert!(matches!(
            AuthMode::from_byte(0xFF),
            Err(Error::InvalidAuthMode(0xFF))
        ));
        assert_eq!(AuthMode::TwoFactor.toggled(), AuthMode::SingleFactor);
    }

    #[test]
    fn test_key_from_char() {
        assert_eq!(Key::from_char('7'), Some(Key::Digit(7)));
        assert_eq!(Key::from_char('*'), Some(Key::Clear));
        assert_eq!(Key::from_char('#'), Some(Key::Confirm));
        assert_eq!(Key::from_char('a'), None);
        assert_eq!(Key::Digit(4).ascii(), Some(b'4'));
        assert_eq!(Key::Clear.ascii(), None);
    }

    #[test]
    fn test_out_of_range_digit_has_no_ascii() {
        assert_eq!(Key::Digit(9).ascii(), Some(b'9'));
        assert_eq!(Key::Digit(10).ascii(), None);
        assert_eq!(Key::Digit(250).ascii(), None);
    }

    #[test]
    fn test_tone_table_repeats() {
        assert_eq!(FeedbackPattern::Success.tones().len(), 2);
        assert_eq!(FeedbackPattern::Error.tones().len(), 1);
        assert_eq!(FeedbackPattern::Warning.tones().len(), 4);
        assert_eq!(FeedbackPattern::Alarm.tones().len(), 10);
        assert_eq!(FeedbackPattern::Alarm.duration_ms(), 1000);
    }

    #[test]
    fn test_status_message_truncates() {
        let msg = StatusMessage::new("0123456789abcdefXYZ", "ok");
        assert_eq!(msg.line1, "0123456789abcdef");
        assert_eq!(msg.line2, "ok");
    }

    #[test]
    fn test_biometric_id_zero_reserved() {
        assert!(!BiometricId::new(0).is_valid());
        assert!(BiometricId::new(1).is_valid());
    }
}
