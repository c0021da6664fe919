//! Keyed record store: one JSON array per entity kind under one storage key.
//!
//! Every mutation rewrites the whole array (read, mutate, write). Two writers
//! holding their own `RecordStore` on the same key race last-write-wins.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::{Storage, StorageError};

/// An entity persisted in a keyed JSON array.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage key holding the array.
    const STORAGE_KEY: &'static str;
    /// Prefix of generated ids (`prefix_<millis>_<random>`).
    const ID_PREFIX: &'static str;
    /// Human name used in messages.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn set_created_at(&mut self, at: DateTime<Utc>);
    /// Fields matched by `search`.
    fn search_fields(&self) -> Vec<&str>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("stored data under '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

/// Generate an id of the form `prefix_<unix millis>_<9 random chars>`.
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now.timestamp_millis(), &random[..9])
}

pub struct RecordStore<T: Record> {
    storage: Storage,
    records: Vec<T>,
}

impl<T: Record> RecordStore<T> {
    /// Open the store and load its current contents.
    pub fn open(storage: Storage) -> Result<Self, StoreError> {
        let records = read_all::<T>(&storage)?;
        Ok(Self { storage, records })
    }

    /// Re-read the array from storage. Missing key yields an empty list.
    pub fn load(&mut self) -> Result<&[T], StoreError> {
        self.records = read_all::<T>(&self.storage)?;
        Ok(&self.records)
    }

    /// Like `load`, but corrupt or unreadable data degrades to an empty list.
    pub fn load_or_default(&mut self) -> &[T] {
        if let Err(e) = self.load() {
            warn!(key = T::STORAGE_KEY, error = %e, "failed to load records");
            self.records.clear();
        }
        &self.records
    }

    pub fn all(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Assign id/createdAt when absent, prepend, persist.
    pub fn add(&mut self, record: T) -> Result<T, StoreError> {
        self.add_at(record, Utc::now())
    }

    pub fn add_at(&mut self, mut record: T, now: DateTime<Utc>) -> Result<T, StoreError> {
        if record.id().is_empty() {
            let mut id = generate_id(T::ID_PREFIX, now);
            while self.records.iter().any(|r| r.id() == id) {
                id = generate_id(T::ID_PREFIX, now);
            }
            record.set_id(id);
        }
        if record.created_at().is_none() {
            record.set_created_at(now);
        }
        self.records.insert(0, record.clone());
        self.persist()?;
        debug!(kind = T::KIND, id = record.id(), "record added");
        Ok(record)
    }

    /// Shallow-merge `patch` over the record with `id`, validating the result
    /// against the record schema. `id` and `createdAt` in the patch are ignored.
    pub fn update(&mut self, id: &str, patch: &Value) -> Result<T, StoreError> {
        let patch = patch.as_object().ok_or_else(|| StoreError::Invalid {
            kind: T::KIND,
            reason: "patch must be a JSON object".to_string(),
        })?;
        let index = self.position(id)?;

        let current = &self.records[index];
        let mut merged = serde_json::to_value(current).map_err(|e| StoreError::Invalid {
            kind: T::KIND,
            reason: e.to_string(),
        })?;
        if let Value::Object(fields) = &mut merged {
            for (field, value) in patch {
                if field == "id" || field == "createdAt" {
                    continue;
                }
                fields.insert(field.clone(), value.clone());
            }
        }
        let updated: T = serde_json::from_value(merged).map_err(|e| StoreError::Invalid {
            kind: T::KIND,
            reason: e.to_string(),
        })?;

        self.records[index] = updated.clone();
        self.persist()?;
        debug!(kind = T::KIND, id, "record updated");
        Ok(updated)
    }

    /// Filter out the record with `id`. Returns whether anything was removed.
    pub fn remove(&mut self, id: &str) -> Result<bool, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.id() != id);
        let removed = self.records.len() != before;
        if removed {
            self.persist()?;
            debug!(kind = T::KIND, id, "record removed");
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn find<P>(&self, predicate: P) -> Vec<&T>
    where
        P: Fn(&T) -> bool,
    {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    /// Case-insensitive substring match over the entity's search fields.
    /// An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<&T> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.records.iter().collect();
        }
        self.find(|r| matches_query(r, &needle))
    }

    /// Overwrite the whole array with one write.
    pub fn replace_all(&mut self, records: Vec<T>) -> Result<(), StoreError> {
        self.records = records;
        self.persist()
    }

    fn position(&self, id: &str) -> Result<usize, StoreError> {
        self.records
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.storage.set_json(T::STORAGE_KEY, &self.records)?;
        Ok(())
    }
}

/// `needle` must already be lowercased.
pub fn matches_query<T: Record>(record: &T, needle: &str) -> bool {
    record
        .search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

fn read_all<T: Record>(storage: &Storage) -> Result<Vec<T>, StoreError> {
    match storage.get_json::<Vec<T>>(T::STORAGE_KEY) {
        Ok(Some(records)) => Ok(records),
        Ok(None) => Ok(vec![]),
        Err(StorageError::Json { key, source }) => Err(StoreError::Corrupt {
            key,
            reason: source.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Lead, LeadStatus, LEADS_KEY};
    use serde_json::json;
    use std::collections::HashSet;

    fn lead(name: &str, email: &str) -> Lead {
        Lead {
            name: name.to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_assigns_unique_ids_and_prepends() {
        let storage = Storage::temporary().unwrap();
        let mut store = RecordStore::<Lead>::open(storage.clone()).unwrap();

        for i in 0..20 {
            store.add(lead(&format!("Lead {}", i), "x@example.com")).unwrap();
        }

        let ids: HashSet<_> = store.all().iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids.len(), 20);
        assert!(store.all().iter().all(|l| l.id.starts_with("lead_") && l.created_at.is_some()));
        assert_eq!(store.all()[0].name, "Lead 19");

        // Another handle on the same key sees the persisted array
        let reread = RecordStore::<Lead>::open(storage).unwrap();
        assert_eq!(reread.len(), 20);
    }

    #[test]
    fn test_add_keeps_existing_id() {
        let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
        let mut record = lead("Imported", "i@example.com");
        record.id = "lead_legacy_1".to_string();
        let stored = store.add(record).unwrap();
        assert_eq!(stored.id, "lead_legacy_1");
    }

    #[test]
    fn test_generated_id_shape() {
        let now = Utc::now();
        let id = generate_id("campaign", now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "campaign");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn test_update_merges_and_is_idempotent() {
        let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
        let added = store.add(lead("Ravi", "ravi@example.com")).unwrap();

        let patch = json!({"status": "qualified", "company": "Acme", "id": "hijack"});
        let once = store.update(&added.id, &patch).unwrap();
        let twice = store.update(&added.id, &patch).unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.id, added.id);
        assert_eq!(twice.status, LeadStatus::Qualified);
        assert_eq!(twice.company, "Acme");
        assert_eq!(twice.email, "ravi@example.com");
    }

    #[test]
    fn test_update_rejects_schema_violations() {
        let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
        let added = store.add(lead("Ravi", "ravi@example.com")).unwrap();

        let result = store.update(&added.id, &json!({"status": "archived"}));
        assert!(matches!(result, Err(StoreError::Invalid { .. })));
        assert_eq!(store.get(&added.id).unwrap().status, LeadStatus::New);
    }

    #[test]
    fn test_update_missing_id_is_not_found() {
        let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
        let result = store.update("lead_nope", &json!({"status": "won"}));
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_remove_and_remove_missing() {
        let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
        let a = store.add(lead("A", "a@example.com")).unwrap();
        store.add(lead("B", "b@example.com")).unwrap();

        assert!(store.remove(&a.id).unwrap());
        assert!(store.get(&a.id).is_none());
        assert_eq!(store.len(), 1);

        assert!(!store.remove("lead_missing").unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_search_is_case_insensitive_over_fields() {
        let mut store = RecordStore::<Lead>::open(Storage::temporary().unwrap()).unwrap();
        let mut l = lead("Meera", "meera@example.com");
        l.company = "Sunrise Textiles".to_string();
        store.add(l).unwrap();
        store.add(lead("Karan", "karan@example.com")).unwrap();

        assert_eq!(store.search("TEXTILES").len(), 1);
        assert_eq!(store.search("example.com").len(), 2);
        assert_eq!(store.search("").len(), 2);
        assert!(store.search("nobody").is_empty());
    }

    #[test]
    fn test_corrupt_data_is_an_error_or_empty() {
        let storage = Storage::temporary().unwrap();
        let mut store = RecordStore::<Lead>::open(storage.clone()).unwrap();
        storage.set_item(LEADS_KEY, "{oops").unwrap();

        assert!(matches!(
            RecordStore::<Lead>::open(storage.clone()),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
        assert!(store.load_or_default().is_empty());
        // Reading never rewrites the stored value
        assert_eq!(storage.get_item(LEADS_KEY).unwrap().as_deref(), Some("{oops"));
    }
}
