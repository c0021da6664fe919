//! Browser-style key/value storage backed by Sled.
//!
//! Mirrors the two stores a page script sees:
//! - `local`: durable values that survive restarts (localStorage)
//! - `session`: values scoped to one process lifetime (sessionStorage), wiped on open
//!
//! Every value is stored as JSON text, the same way the page scripts serialize
//! arrays and objects before writing them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the storage substrate itself.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("value under '{key}' is not valid JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value under '{0}' is not valid UTF-8")]
    Utf8(String),
}

#[derive(Clone)] // Sled handles are cheap to clone and shared across REST handlers
pub struct Storage {
    db: Db,
    local_tree: sled::Tree,
    session_tree: sled::Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path.
    /// The session tree is cleared so each process starts a fresh session.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database that disappears on drop. Used by tests and dry runs.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let local_tree = db.open_tree("local")?;
        let session_tree = db.open_tree("session")?;
        session_tree.clear()?;
        Ok(Self {
            db,
            local_tree,
            session_tree,
        })
    }

    // --- localStorage ---

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        read(&self.local_tree, key)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        debug!(key, bytes = value.len(), "local set_item");
        self.local_tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.local_tree.remove(key.as_bytes())?;
        Ok(())
    }

    /// All keys currently present in local storage.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = vec![];
        for item in self.local_tree.iter() {
            let (k, _) = item?;
            keys.push(String::from_utf8_lossy(&k).into_owned());
        }
        Ok(keys)
    }

    // --- sessionStorage ---

    pub fn get_session_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        read(&self.session_tree, key)
    }

    pub fn set_session_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.session_tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    pub fn remove_session_item(&self, key: &str) -> Result<(), StorageError> {
        self.session_tree.remove(key.as_bytes())?;
        Ok(())
    }

    // --- JSON helpers ---

    /// Read and deserialize a JSON value from local storage.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get_item(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serialize a value to JSON and write it to local storage.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Json {
            key: key.to_string(),
            source,
        })?;
        self.set_item(key, &raw)
    }

    pub fn get_session_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.get_session_item(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StorageError::Json {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub fn set_session_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Json {
            key: key.to_string(),
            source,
        })?;
        self.set_session_item(key, &raw)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn read(tree: &sled::Tree, key: &str) -> Result<Option<String>, StorageError> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| StorageError::Utf8(key.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_local_and_session_items() {
        let storage = Storage::temporary().expect("Failed to open storage");

        storage.set_item("systemConfig", "{\"siteName\":\"x\"}").unwrap();
        storage.set_session_item("csrfToken", "\"abc\"").unwrap();

        assert_eq!(
            storage.get_item("systemConfig").unwrap().as_deref(),
            Some("{\"siteName\":\"x\"}")
        );
        assert_eq!(storage.get_session_item("csrfToken").unwrap().as_deref(), Some("\"abc\""));
        // The two namespaces do not bleed into each other
        assert!(storage.get_item("csrfToken").unwrap().is_none());

        storage.set_item("adminUsers", "[]").unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["adminUsers", "systemConfig"]);

        storage.remove_item("systemConfig").unwrap();
        assert!(storage.get_item("systemConfig").unwrap().is_none());
        assert_eq!(storage.keys().unwrap(), vec!["adminUsers"]);

        storage.remove_session_item("csrfToken").unwrap();
        assert!(storage.get_session_item("csrfToken").unwrap().is_none());
    }

    #[test]
    fn test_session_tree_cleared_on_reopen() {
        let temp_dir = std::env::temp_dir().join("infetech_test_storage_session");
        let _ = fs::remove_dir_all(&temp_dir);

        {
            let storage = Storage::open(temp_dir.to_str().unwrap()).expect("open");
            storage.set_item("loginTime", "1").unwrap();
            storage.set_session_item("csrfToken", "\"t\"").unwrap();
            storage.flush().unwrap();
        }

        let storage = Storage::open(temp_dir.to_str().unwrap()).expect("reopen");
        assert_eq!(storage.get_item("loginTime").unwrap().as_deref(), Some("1"));
        assert!(storage.get_session_item("csrfToken").unwrap().is_none());

        drop(storage);
        let _ = fs::remove_dir_all(temp_dir);
    }

    #[test]
    fn test_get_json_reports_corrupt_value() {
        let storage = Storage::temporary().unwrap();
        storage.set_item("leadManagementData", "[{not json").unwrap();

        let result: Result<Option<Vec<serde_json::Value>>, _> =
            storage.get_json("leadManagementData");
        assert!(matches!(result, Err(StorageError::Json { .. })));
    }
}
