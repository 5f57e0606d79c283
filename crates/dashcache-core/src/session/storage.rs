//! Durable backends for the session table.
//!
//! Every backend holds exactly one serialized record under a well-known
//! name. Serialization and validation live in `persisted`; backends only
//! move strings.

use std::path::{Path, PathBuf};

use keyring::Entry;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::APP_NAME;
use crate::error::StorageError;

/// Session table file name in the data directory
pub const SESSION_FILE: &str = "sessions.json";

/// Keychain account name holding the session table
const KEYRING_USER: &str = "sessions";

pub trait SessionStorage: Send + Sync {
    /// The stored record, or `None` if nothing has been written yet.
    fn load(&self) -> Result<Option<String>, StorageError>;

    fn save(&self, record: &str) -> Result<(), StorageError>;

    /// Remove the record entirely.
    fn clear(&self) -> Result<(), StorageError>;

    /// Human-readable location, for logs and the CLI.
    fn describe(&self) -> String;
}

/// Session table as a JSON file, replaced atomically on every save.
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&self.path)?))
    }

    fn save(&self, record: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a half-written table
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, record)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Session table written");
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Session table as a single OS keychain entry.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(APP_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, KEYRING_USER)?)
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for KeyringStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match self.entry()?.get_password() {
            Ok(record) => Ok(Some(record)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &str) -> Result<(), StorageError> {
        self.entry()?.set_password(record)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        format!("keychain {}/{}", self.service, KEYRING_USER)
    }
}

/// In-process storage for tests and ephemeral clients.
#[derive(Default)]
pub struct MemoryStorage {
    record: Mutex<Option<String>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: impl Into<String>) -> Self {
        Self {
            record: Mutex::new(Some(record.into())),
            fail_writes: Mutex::new(false),
        }
    }

    pub fn record(&self) -> Option<String> {
        self.record.lock().clone()
    }

    /// Make subsequent saves fail, as an unavailable disk would.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if *self.fail_writes.lock() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "storage is read-only",
            )));
        }
        Ok(())
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.record.lock().clone())
    }

    fn save(&self, record: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        *self.record.lock() = Some(record.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.check_writable()?;
        *self.record.lock() = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::in_dir(&dir.path().join("nested"));

        assert_eq!(storage.load().unwrap(), None);
        storage.save("{\"version\":1}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("{\"version\":1}"));
        assert!(!storage.path().with_extension("json.tmp").exists());

        storage.clear().unwrap();
        assert_eq!(storage.load().unwrap(), None);
        // Clearing twice is fine
        storage.clear().unwrap();
    }

    #[test]
    fn test_memory_storage_write_failure() {
        let storage = MemoryStorage::with_record("old");
        storage.set_fail_writes(true);

        assert!(storage.save("new").is_err());
        assert!(storage.clear().is_err());
        assert_eq!(storage.record().as_deref(), Some("old"));
    }
}
