//! Credential record persistence
//!
//! The lock keeps one fixed-size record: the PIN and the auth mode. On the
//! device it lives in EEPROM; here it is a file under the data directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use latchguard_core::{CredentialRecord, CredentialStore, Error, Result};

/// File name of the record inside the data directory
pub const RECORD_FILE: &str = "credential.bin";

/// Record stored in a single file, replaced atomically on every write
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store at `<data_dir>/credential.bin`
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(RECORD_FILE),
        })
    }

    /// Store at an explicit file path
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load_record(&self) -> Result<CredentialRecord> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::StorageUninitialized)
            }
            Err(e) => return Err(e.into()),
        };
        CredentialRecord::from_bytes(&bytes)
    }

    fn save_record(&mut self, record: &CredentialRecord) -> Result<()> {
        let bytes = record.to_bytes();

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("bin.tmp");
        std::fs::write(&temp_path, bytes)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&temp_path, &self.path)?;
        debug!("Credential record written to {:?}", self.path);
        Ok(())
    }
}

/// In-memory store; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<Mutex<MemoryRecord>>,
}

#[derive(Debug, Default)]
struct MemoryRecord {
    record: Option<CredentialRecord>,
    writes: usize,
}

impl MemoryCredentialStore {
    /// Empty store, as on a factory-fresh device
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding `record`
    pub fn with_record(record: CredentialRecord) -> Self {
        let store = Self::default();
        store.lock().record = Some(record);
        store
    }

    /// Number of completed writes
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryRecord> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load_record(&self) -> Result<CredentialRecord> {
        self.lock().record.clone().ok_or(Error::StorageUninitialized)
    }

    fn save_record(&mut self, record: &CredentialRecord) -> Result<()> {
        let mut inner = self.lock();
        inner.record = Some(record.clone());
        inner.writes += 1;
        Ok(())
    }
}

/// Read the record, writing `default` first if storage was never initialized
///
/// A corrupt or tampered record is an error, never silently reset.
pub fn load_or_initialize<S: CredentialStore + ?Sized>(
    store: &mut S,
    default: &CredentialRecord,
) -> Result<CredentialRecord> {
    match store.load_record() {
        Ok(record) => Ok(record),
        Err(Error::StorageUninitialized) => {
            info!("Storage uninitialized, writing factory default credential");
            store.save_record(default)?;
            Ok(default.clone())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchguard_core::{AuthMode, Credential};
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_uninitialized() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load_record(),
            Err(Error::StorageUninitialized)
        ));
    }

    #[test]
    fn test_load_or_initialize_writes_default_once() {
        let dir = tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path()).unwrap();

        let record = load_or_initialize(&mut store, &CredentialRecord::factory_default()).unwrap();
        assert!(record.credential.matches(b"123456"));
        assert_eq!(record.mode, AuthMode::SingleFactor);

        store.save(&Credential::parse("4321").unwrap()).unwrap();
        let again = load_or_initialize(&mut store, &CredentialRecord::factory_default()).unwrap();
        assert!(again.credential.matches(b"4321"));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path()).unwrap();
        store
            .save_record(&CredentialRecord::factory_default())
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(RECORD_FILE)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_record_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path()).unwrap();
        store
            .save_record(&CredentialRecord::factory_default())
            .unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_tampered_record_is_not_reset() {
        let dir = tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path()).unwrap();
        store
            .save_record(&CredentialRecord::new(
                Credential::parse("9876").unwrap(),
                AuthMode::TwoFactor,
            ))
            .unwrap();

        let mut bytes = std::fs::read(store.path()).unwrap();
        bytes[8] ^= 0x01;
        std::fs::write(store.path(), &bytes).unwrap();

        let err = load_or_initialize(&mut store, &CredentialRecord::factory_default()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch));
    }

    #[test]
    fn test_erased_eeprom_is_uninitialized() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        std::fs::write(store.path(), [0xFFu8; latchguard_core::RECORD_SIZE]).unwrap();

        assert!(matches!(
            store.load_record(),
            Err(Error::StorageUninitialized)
        ));
    }

    #[test]
    fn test_memory_store_clones_share_record() {
        let store = MemoryCredentialStore::new();
        let mut writer = store.clone();
        writer
            .save_record(&CredentialRecord::factory_default())
            .unwrap();

        assert!(store.load().unwrap().matches(b"123456"));
        assert_eq!(store.writes(), 1);
    }
}
