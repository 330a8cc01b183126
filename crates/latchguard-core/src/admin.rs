//! Administrative flows: PIN change, auth-mode toggle, enrollment input
//!
//! Every privileged operation is gated twice: an entry gesture (a run of
//! presses on one control key, so that normal PIN typing never triggers it)
//! and re-entry of the current PIN. Failures here are kept apart from the
//! regular lockout budget; a wrong PIN during a change attempt does not
//! count toward locking the keypad.

use thiserror::Error;
use zeroize::Zeroizing;

use crate::auth::AuthContext;
use crate::credential::Credential;
use crate::error::Error;
use crate::ports::CredentialStore;
use crate::types::{AuthMode, BiometricId, Key, DISPLAY_COLUMNS};
use crate::{GESTURE_THRESHOLD, MAX_BIOMETRIC_ID, PIN_MAX_LENGTH};

/// Errors from administrative operations
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Current PIN is incorrect")]
    WrongCurrentCredential,

    #[error("PIN must be 1-{} digits, got {len}", PIN_MAX_LENGTH)]
    InvalidLength { len: usize },

    #[error("PIN must contain only digits")]
    InvalidFormat,

    #[error("ID #0 is reserved")]
    ReservedIdentity,

    #[error("Invalid ID: {0}")]
    InvalidIdentity(String),

    #[error(transparent)]
    Core(#[from] Error),
}

impl From<AdminError> for Error {
    fn from(e: AdminError) -> Self {
        match e {
            AdminError::WrongCurrentCredential => Error::AdminAuthFailed,
            AdminError::Core(inner) => inner,
            other => Error::InvalidInput(other.to_string()),
        }
    }
}

/// Counts consecutive presses of one designated key
#[derive(Debug, Clone)]
pub struct GestureDetector {
    key: Key,
    threshold: u8,
    count: u8,
}

impl GestureDetector {
    pub fn new(key: Key, threshold: u8) -> Self {
        Self {
            key,
            threshold: threshold.max(1),
            count: 0,
        }
    }

    /// Feed a key press; true when the gesture completes
    ///
    /// Any other key resets the run. Completing the gesture also resets it.
    pub fn press(&mut self, key: Key) -> bool {
        if key != self.key {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    /// Presses counted so far
    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Default for GestureDetector {
    fn default() -> Self {
        Self::new(Key::Confirm, GESTURE_THRESHOLD)
    }
}

/// Privileged operations, all gated by the current PIN
pub struct AdminFlow;

impl AdminFlow {
    /// Check a re-entered PIN before a privileged operation
    pub fn verify_admin(stored: &Credential, input: &[u8]) -> Result<(), AdminError> {
        if stored.matches(input) {
            Ok(())
        } else {
            Err(AdminError::WrongCurrentCredential)
        }
    }

    /// Replace the stored PIN
    ///
    /// Does not consult or update any lockout tracker.
    pub fn change_credential<S: CredentialStore + ?Sized>(
        store: &mut S,
        current: &[u8],
        new: &[u8],
    ) -> Result<Credential, AdminError> {
        let stored = store.load()?;
        Self::verify_admin(&stored, current)?;

        let credential = Self::validate_new(new)?;
        store.save(&credential)?;
        Ok(credential)
    }

    /// Flip between single- and two-factor mode and persist the result
    ///
    /// Any partial verification is dropped so a factor accepted under the
    /// old mode cannot complete a grant under the new one.
    pub fn toggle_auth_mode<S: CredentialStore + ?Sized>(
        ctx: &mut AuthContext,
        store: &mut S,
    ) -> Result<AuthMode, AdminError> {
        let mode = ctx.mode().toggled();
        store.save_mode(mode)?;
        ctx.set_mode(mode);
        Ok(mode)
    }

    /// Parse a template slot typed for enrollment or deletion
    ///
    /// Rejects slot 0 before any sensor interaction.
    pub fn parse_biometric_id(input: &[u8]) -> Result<BiometricId, AdminError> {
        let text = std::str::from_utf8(input)
            .map_err(|_| AdminError::InvalidIdentity("not numeric".into()))?;
        if text.is_empty() {
            return Err(AdminError::InvalidIdentity("empty".into()));
        }
        let id: u16 = text
            .parse()
            .map_err(|_| AdminError::InvalidIdentity(text.to_string()))?;
        if id == 0 {
            return Err(AdminError::ReservedIdentity);
        }
        if id > MAX_BIOMETRIC_ID {
            return Err(AdminError::InvalidIdentity(format!(
                "{} exceeds {}",
                id, MAX_BIOMETRIC_ID
            )));
        }
        Ok(BiometricId::new(id))
    }

    fn validate_new(new: &[u8]) -> Result<Credential, AdminError> {
        if new.is_empty() || new.len() > PIN_MAX_LENGTH {
            return Err(AdminError::InvalidLength { len: new.len() });
        }
        Credential::new(new).map_err(|_| AdminError::InvalidFormat)
    }
}

/// How an entry field echoes what is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Echo `*` per digit
    Secret,
    /// Echo digits as typed
    Numeric,
}

/// What a key press did to an entry field
#[derive(Debug, PartialEq, Eq)]
pub enum EntryEvent {
    /// A digit was appended
    Updated,
    /// The field was emptied with the clear key
    Cleared,
    /// The confirm key completed the entry
    Submitted(Zeroizing<Vec<u8>>),
    /// The field is full; the digit was dropped
    Ignored,
}

/// Keypad-driven text entry, fed one key per loop iteration
///
/// Replaces a blocking "read until `#`" helper: the control loop keeps
/// polling and forwards each key here.
pub struct EntryField {
    kind: EntryKind,
    value: Zeroizing<Vec<u8>>,
}

impl EntryField {
    pub fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            value: Zeroizing::new(Vec::new()),
        }
    }

    /// Apply one key press
    pub fn feed(&mut self, key: Key) -> EntryEvent {
        match key {
            Key::Confirm => EntryEvent::Submitted(std::mem::take(&mut self.value)),
            Key::Clear => {
                self.value.clear();
                EntryEvent::Cleared
            }
            Key::Digit(_) => {
                if self.value.len() >= DISPLAY_COLUMNS {
                    return EntryEvent::Ignored;
                }
                if let Some(ascii) = key.ascii() {
                    self.value.push(ascii);
                }
                EntryEvent::Updated
            }
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Second display line for this field
    pub fn render(&self) -> String {
        match self.kind {
            EntryKind::Secret => "*".repeat(self.value.len()),
            EntryKind::Numeric => String::from_utf8_lossy(&self.value).into_owned(),
        }
    }
}

impl std::fmt::Debug for EntryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryField")
            .field("kind", &self.kind)
            .field("len", &self.value.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CredentialRecord;

    #[derive(Default)]
    struct MemStore {
        record: Option<CredentialRecord>,
        writes: usize,
    }

    impl CredentialStore for MemStore {
        fn load_record(&self) -> crate::Result<CredentialRecord> {
            self.record.clone().ok_or(Error::StorageUninitialized)
        }

        fn save_record(&mut self, record: &CredentialRecord) -> crate::Result<()> {
            self.record = Some(record.clone());
            self.writes += 1;
            Ok(())
        }
    }

    fn store() -> MemStore {
        MemStore {
            record: Some(CredentialRecord::factory_default()),
            writes: 0,
        }
    }

    #[test]
    fn test_gesture_needs_consecutive_presses() {
        let mut gesture = GestureDetector::new(Key::Clear, 3);
        assert!(!gesture.press(Key::Clear));
        assert!(!gesture.press(Key::Clear));
        assert!(!gesture.press(Key::Digit(1)));
        assert_eq!(gesture.count(), 0);

        assert!(!gesture.press(Key::Clear));
        assert!(!gesture.press(Key::Clear));
        assert!(gesture.press(Key::Clear));
        assert_eq!(gesture.count(), 0);
    }

    #[test]
    fn test_change_credential() {
        let mut store = store();
        let new = AdminFlow::change_credential(&mut store, b"123456", b"2468").unwrap();
        assert!(new.matches(b"2468"));
        assert!(store.load().unwrap().matches(b"2468"));
    }

    #[test]
    fn test_change_credential_wrong_current() {
        let mut store = store();
        let err = AdminFlow::change_credential(&mut store, b"999999", b"2468").unwrap_err();
        assert!(matches!(err, AdminError::WrongCurrentCredential));
        assert_eq!(store.writes, 0);
        assert!(matches!(Error::from(err), Error::AdminAuthFailed));
    }

    #[test]
    fn test_change_credential_invalid_length() {
        let mut store = store();
        assert!(matches!(
            AdminFlow::change_credential(&mut store, b"123456", b""),
            Err(AdminError::InvalidLength { len: 0 })
        ));
        assert!(matches!(
            AdminFlow::change_credential(&mut store, b"123456", b"1234567"),
            Err(AdminError::InvalidLength { len: 7 })
        ));
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn test_toggle_auth_mode_persists_and_clears_partial() {
        let mut store = store();
        let mut ctx = AuthContext::default();
        let now = std::time::Instant::now();
        let stored = store.load().unwrap();

        assert_eq!(
            AdminFlow::toggle_auth_mode(&mut ctx, &mut store).unwrap(),
            AuthMode::TwoFactor
        );
        assert_eq!(store.load_mode().unwrap(), AuthMode::TwoFactor);

        ctx.submit(&stored, crate::auth::Attempt::Pin(b"123456"), now);
        assert!(ctx.partial().pin_verified);

        AdminFlow::toggle_auth_mode(&mut ctx, &mut store).unwrap();
        assert!(!ctx.partial().pin_verified);
        assert_eq!(store.load_mode().unwrap(), AuthMode::SingleFactor);
    }

    #[test]
    fn test_parse_biometric_id() {
        assert_eq!(
            AdminFlow::parse_biometric_id(b"42").unwrap(),
            BiometricId::new(42)
        );
        assert!(matches!(
            AdminFlow::parse_biometric_id(b"0"),
            Err(AdminError::ReservedIdentity)
        ));
        assert!(matches!(
            AdminFlow::parse_biometric_id(b"000"),
            Err(AdminError::ReservedIdentity)
        ));
        assert!(matches!(
            AdminFlow::parse_biometric_id(b""),
            Err(AdminError::InvalidIdentity(_))
        ));
        assert!(matches!(
            AdminFlow::parse_biometric_id(b"128"),
            Err(AdminError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_entry_field_masks_secret() {
        let mut field = EntryField::new(EntryKind::Secret);
        assert_eq!(field.feed(Key::Digit(4)), EntryEvent::Updated);
        assert_eq!(field.feed(Key::Digit(2)), EntryEvent::Updated);
        assert_eq!(field.render(), "**");

        assert_eq!(field.feed(Key::Clear), EntryEvent::Cleared);
        assert!(field.is_empty());

        field.feed(Key::Digit(7));
        match field.feed(Key::Confirm) {
            EntryEvent::Submitted(value) => assert_eq!(value.as_slice(), b"7"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(field.is_empty());
    }

    #[test]
    fn test_entry_field_numeric_echo() {
        let mut field = EntryField::new(EntryKind::Numeric);
        field.feed(Key::Digit(1));
        field.feed(Key::Digit(5));
        assert_eq!(field.render(), "15");
    }
}
