use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Structured storage key, rendered as `<namespace>_<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub namespace: String,
    pub id: String,
}

impl StorageKey {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.namespace, self.id)
    }
}

/// Durable record storage. Each record is one JSON document.
pub trait RecordStore: Send + Sync {
    fn read(&self, key: &StorageKey) -> Result<Option<String>>;
    fn write(&self, key: &StorageKey, payload: &str) -> Result<()>;
    fn remove(&self, key: &StorageKey) -> Result<()>;
    fn list_ids(&self, namespace: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<StorageKey, String>>,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unavailable backend (quota exceeded, disk gone).
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl RecordStore for MemoryRecordStore {
    fn read(&self, key: &StorageKey) -> Result<Option<String>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))?;

        Ok(records.get(key).cloned())
    }

    fn write(&self, key: &StorageKey, payload: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("record store is not writable: {key}");
        }

        self.records
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))?
            .insert(key.clone(), payload.to_string());

        Ok(())
    }

    fn remove(&self, key: &StorageKey) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))?
            .remove(key);

        Ok(())
    }

    fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("record store lock poisoned"))?;

        let mut ids = records
            .keys()
            .filter(|key| key.namespace == namespace)
            .map(|key| key.id.clone())
            .collect::<Vec<_>>();
        ids.sort();

        Ok(ids)
    }
}
