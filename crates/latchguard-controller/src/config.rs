//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use latchguard_core::{LockoutPolicy, GESTURE_THRESHOLD, LOCKOUT_DURATION_SECS, MAX_WRONG_ATTEMPTS};

use crate::error::{ControllerError, Result};

/// Longest accepted timing, in milliseconds (one day)
pub const MAX_TIMING_MS: u64 = 24 * 60 * 60 * 1000;

/// Controller configuration
///
/// All timings are in milliseconds unless the field name says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Failed attempts per modality before lockout
    pub max_wrong_attempts: u32,

    /// Lockout window (seconds)
    pub lockout_duration_secs: u64,

    /// How long the lock stays open after a grant
    pub unlock_duration_ms: u64,

    /// How long a result message stays on screen
    pub message_hold_ms: u64,

    /// Idle time before the backlight goes off; hibernation follows at twice this
    pub inactivity_timeout_ms: u64,

    /// Keypad scan interval
    pub key_scan_interval_ms: u64,

    /// Fingerprint sensor poll interval
    pub biometric_poll_interval_ms: u64,

    /// Time allowed for each enrollment capture
    pub capture_timeout_ms: u64,

    /// Time allowed for lifting the finger between captures
    pub removal_timeout_ms: u64,

    /// Pause after the finger is lifted before the second capture
    pub removal_settle_ms: u64,

    /// Consecutive `*` or `#` presses that open an admin flow
    pub gesture_threshold: u8,

    /// Simulator loop period
    pub loop_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_wrong_attempts: MAX_WRONG_ATTEMPTS,
            lockout_duration_secs: LOCKOUT_DURATION_SECS,
            unlock_duration_ms: 3_000,
            message_hold_ms: 2_000,
            inactivity_timeout_ms: 8_000,
            key_scan_interval_ms: 20,
            biometric_poll_interval_ms: 100,
            capture_timeout_ms: 10_000,
            removal_timeout_ms: 5_000,
            removal_settle_ms: 1_000,
            gesture_threshold: GESTURE_THRESHOLD,
            loop_interval_ms: 5,
        }
    }
}

impl ControllerConfig {
    /// Default data directory (`<data_dir>/latchguard`)
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latchguard")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Reject values that would stall or spin the loop
    pub fn validate(&self) -> Result<()> {
        if self.max_wrong_attempts == 0 {
            return Err(ControllerError::Config(
                "max_wrong_attempts must be at least 1".into(),
            ));
        }
        if self.gesture_threshold == 0 {
            return Err(ControllerError::Config(
                "gesture_threshold must be at least 1".into(),
            ));
        }
        if self.loop_interval_ms == 0 {
            return Err(ControllerError::Config(
                "loop_interval_ms must be non-zero".into(),
            ));
        }

        let timings = [
            ("lockout_duration_secs", self.lockout_duration_secs.saturating_mul(1000)),
            ("unlock_duration_ms", self.unlock_duration_ms),
            ("message_hold_ms", self.message_hold_ms),
            ("inactivity_timeout_ms", self.inactivity_timeout_ms),
            ("key_scan_interval_ms", self.key_scan_interval_ms),
            ("biometric_poll_interval_ms", self.biometric_poll_interval_ms),
            ("capture_timeout_ms", self.capture_timeout_ms),
            ("removal_timeout_ms", self.removal_timeout_ms),
            ("removal_settle_ms", self.removal_settle_ms),
            ("loop_interval_ms", self.loop_interval_ms),
        ];
        for (name, ms) in timings {
            if ms > MAX_TIMING_MS {
                return Err(ControllerError::Config(format!(
                    "{} must not exceed one day",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::new(
            self.max_wrong_attempts,
            Duration::from_secs(self.lockout_duration_secs),
        )
    }

    pub fn unlock_duration(&self) -> Duration {
        Duration::from_millis(self.unlock_duration_ms)
    }

    pub fn message_hold(&self) -> Duration {
        Duration::from_millis(self.message_hold_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn key_scan_interval(&self) -> Duration {
        Duration::from_millis(self.key_scan_interval_ms)
    }

    pub fn biometric_poll_interval(&self) -> Duration {
        Duration::from_millis(self.biometric_poll_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn removal_timeout(&self) -> Duration {
        Duration::from_millis(self.removal_timeout_ms)
    }

    pub fn removal_settle(&self) -> Duration {
        Duration::from_millis(self.removal_settle_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_timings() {
        let config = ControllerConfig::default();
        assert_eq!(config.lockout_policy(), LockoutPolicy::default());
        assert_eq!(config.unlock_duration(), Duration::from_secs(3));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(8));
        assert_eq!(config.capture_timeout(), Duration::from_secs(10));
        assert_eq!(config.gesture_threshold, 12);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let created = ControllerConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ControllerConfig::load(&path).unwrap(), created);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "unlock_duration_ms": 500 }"#).unwrap();

        let config = ControllerConfig::load(&path).unwrap();
        assert_eq!(config.unlock_duration_ms, 500);
        assert_eq!(config.message_hold_ms, 2_000);
    }

    #[test]
    fn test_rejects_unbounded_timings() {
        let config = ControllerConfig {
            unlock_duration_ms: u64::MAX,
            ..ControllerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));

        let config = ControllerConfig {
            lockout_duration_secs: u64::MAX / 10,
            ..ControllerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));

        let config = ControllerConfig {
            message_hold_ms: MAX_TIMING_MS,
            ..ControllerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_wrong_attempts": 0 }"#).unwrap();

        assert!(matches!(
            ControllerConfig::load(&path),
            Err(ControllerError::Config(_))
        ));
    }
}
