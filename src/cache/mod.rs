use crate::catalog::CategoryKey;
use crate::catalog::content::ChallengeContent;
use crate::ledger::store::{RecordStore, StorageKey};
use anyhow::{Result, bail};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_CACHE_PREFIX: &str = "challengeCache";
const NO_BIRTH_DATE: &str = "no_birthdate";

/// Non-durable key/value storage that lives as long as the session.
pub trait SessionStorage: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> bool;
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    entries: HashMap<String, String>,
    max_entries: Option<usize>,
}

impl MemorySessionStorage {
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: Some(max_entries),
        }
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        let is_new = !self.entries.contains_key(key);
        if let Some(limit) = self.max_entries {
            if is_new && self.entries.len() >= limit {
                bail!("session storage quota exceeded ({limit} entries)");
            }
        }

        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Session storage backed by the record store, so cached content outlives a
/// single CLI invocation. Every cache key is one record in `namespace`.
pub struct RecordSessionStorage {
    store: Arc<dyn RecordStore>,
    namespace: String,
}

impl RecordSessionStorage {
    pub fn new(store: Arc<dyn RecordStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn record_key(&self, key: &str) -> StorageKey {
        StorageKey::new(self.namespace.as_str(), key)
    }
}

impl SessionStorage for RecordSessionStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.store
            .read(&self.record_key(key))
            .unwrap_or_else(|error| {
                warn!(key = %key, error = %error, "failed to read cached content");
                None
            })
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.store.write(&self.record_key(key), &value)
    }

    fn remove(&mut self, key: &str) -> bool {
        let record = self.record_key(key);
        if self.get(key).is_none() {
            return false;
        }

        match self.store.remove(&record) {
            Ok(()) => true,
            Err(error) => {
                warn!(key = %key, error = %error, "failed to remove cached content");
                false
            }
        }
    }

    fn clear(&mut self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn keys(&self) -> Vec<String> {
        self.store
            .list_ids(&self.namespace)
            .unwrap_or_else(|error| {
                warn!(namespace = %self.namespace, error = %error, "failed to list cached content");
                Vec::new()
            })
    }
}

/// Memoizes generated challenge content per (date, category, fingerprint).
/// Only fortune content carries a fingerprint: the user's birth date.
pub struct ContentCache {
    prefix: String,
    storage: Box<dyn SessionStorage>,
}

impl ContentCache {
    pub fn new(prefix: impl Into<String>, storage: Box<dyn SessionStorage>) -> Self {
        Self {
            prefix: prefix.into(),
            storage,
        }
    }

    pub fn in_memory(prefix: impl Into<String>, max_entries: usize) -> Self {
        Self::new(
            prefix,
            Box::new(MemorySessionStorage::with_capacity_limit(max_entries)),
        )
    }

    /// Cache persisted in `store` under the prefix namespace.
    pub fn durable(prefix: impl Into<String>, store: Arc<dyn RecordStore>) -> Self {
        let prefix = prefix.into();
        let storage = RecordSessionStorage::new(store, prefix.as_str());
        Self::new(prefix, Box::new(storage))
    }

    /// `<prefix>_<date>_<category>[_<fingerprint>]`
    pub fn cache_key(
        &self,
        category: CategoryKey,
        date: NaiveDate,
        birth_date: Option<&str>,
    ) -> String {
        let base = self.base_key(category, date);

        match fingerprint(category, birth_date) {
            Some(fingerprint) => format!("{base}_{fingerprint}"),
            None => base,
        }
    }

    pub fn get(
        &mut self,
        category: CategoryKey,
        date: NaiveDate,
        birth_date: Option<&str>,
    ) -> Option<ChallengeContent> {
        let key = self.cache_key(category, date, birth_date);
        let raw = self.storage.get(&key)?;

        match ChallengeContent::decode_str(category, &raw) {
            Ok(content) => {
                debug!(key = %key, "content cache hit");
                Some(content)
            }
            Err(error) => {
                warn!(key = %key, error = %error, "discarding unreadable cached content");
                self.storage.remove(&key);
                None
            }
        }
    }

    pub fn put(
        &mut self,
        category: CategoryKey,
        date: NaiveDate,
        birth_date: Option<&str>,
        content: &ChallengeContent,
    ) {
        self.prune_before(date);
        let key = self.cache_key(category, date, birth_date);

        let stored = serde_json::to_string(content)
            .map_err(anyhow::Error::from)
            .and_then(|payload| self.storage.set(&key, payload));

        if let Err(error) = stored {
            warn!(key = %key, error = %error, "failed to cache content");
        }
    }

    /// Drops the fortune cached for `date` under the previous birth date,
    /// including the legacy key without a fingerprint.
    pub fn invalidate_fortune(&mut self, date: NaiveDate, previous_birth_date: Option<&str>) {
        let fingerprinted = self.cache_key(CategoryKey::Fortune, date, previous_birth_date);
        let legacy = self.base_key(CategoryKey::Fortune, date);

        let mut removed = 0;
        for key in [fingerprinted, legacy] {
            if self.storage.remove(&key) {
                removed += 1;
            }
        }

        debug!(date = %date, removed, "fortune cache invalidated");
    }

    pub fn clear(&mut self) {
        self.storage.clear();
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Entries from earlier days can never be hit again.
    fn prune_before(&mut self, date: NaiveDate) {
        let stale = self
            .storage
            .keys()
            .into_iter()
            .filter(|key| self.key_date(key).is_some_and(|day| day < date))
            .collect::<Vec<_>>();

        if stale.is_empty() {
            return;
        }

        for key in &stale {
            self.storage.remove(key);
        }
        debug!(before = %date, removed = stale.len(), "pruned stale cached content");
    }

    fn key_date(&self, key: &str) -> Option<NaiveDate> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix('_')?;
        NaiveDate::parse_from_str(rest.get(..10)?, "%Y-%m-%d").ok()
    }

    fn base_key(&self, category: CategoryKey, date: NaiveDate) -> String {
        format!("{}_{}_{}", self.prefix, date.format("%Y-%m-%d"), category)
    }
}

fn fingerprint(category: CategoryKey, birth_date: Option<&str>) -> Option<String> {
    (category == CategoryKey::Fortune).then(|| {
        birth_date
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(NO_BIRTH_DATE)
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::{ContentCache, DEFAULT_CACHE_PREFIX, MemorySessionStorage, SessionStorage};
    use crate::catalog::CategoryKey;
    use crate::catalog::content::{ChallengeContent, EconomicsContent, FortuneContent};
    use crate::ledger::store::{MemoryRecordStore, RecordStore};
    use chrono::{Duration, NaiveDate};
    use std::sync::Arc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn fortune(text: &str) -> ChallengeContent {
        ChallengeContent::Fortune(FortuneContent {
            text: text.to_string(),
        })
    }

    #[test]
    fn keys_follow_session_storage_format() {
        let cache = ContentCache::in_memory(DEFAULT_CACHE_PREFIX, 8);

        assert_eq!(
            cache.cache_key(CategoryKey::Quiz, date(), Some("19900101")),
            "challengeCache_2024-06-01_quiz"
        );
        assert_eq!(
            cache.cache_key(CategoryKey::Fortune, date(), Some("19900101")),
            "challengeCache_2024-06-01_fortune_19900101"
        );
        assert_eq!(
            cache.cache_key(CategoryKey::Fortune, date(), None),
            "challengeCache_2024-06-01_fortune_no_birthdate"
        );
    }

    #[test]
    fn fortune_is_scoped_by_birth_date() {
        let mut cache = ContentCache::in_memory(DEFAULT_CACHE_PREFIX, 8);
        cache.put(CategoryKey::Fortune, date(), Some("19900101"), &fortune("a"));

        assert_eq!(
            cache.get(CategoryKey::Fortune, date(), Some("19900101")),
            Some(fortune("a"))
        );
        assert_eq!(cache.get(CategoryKey::Fortune, date(), Some("19851231")), None);
        assert_eq!(cache.get(CategoryKey::Fortune, date(), None), None);
    }

    #[test]
    fn invalidation_removes_previous_fingerprint_only() {
        let mut cache = ContentCache::in_memory(DEFAULT_CACHE_PREFIX, 8);
        cache.put(CategoryKey::Fortune, date(), None, &fortune("anonymous"));
        cache.put(CategoryKey::Fortune, date(), Some("19900101"), &fortune("mine"));

        cache.invalidate_fortune(date(), None);

        assert_eq!(cache.get(CategoryKey::Fortune, date(), None), None);
        assert_eq!(
            cache.get(CategoryKey::Fortune, date(), Some("19900101")),
            Some(fortune("mine"))
        );
    }

    #[test]
    fn unreadable_entries_are_misses() {
        let mut storage = MemorySessionStorage::default();
        storage
            .set("challengeCache_2024-06-01_economics", "{\"text\":1}".to_string())
            .unwrap();
        let mut cache = ContentCache::new(DEFAULT_CACHE_PREFIX, Box::new(storage));

        assert_eq!(cache.get(CategoryKey::Economics, date(), None), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn quota_errors_are_not_fatal() {
        let mut cache = ContentCache::in_memory(DEFAULT_CACHE_PREFIX, 1);
        let economics = ChallengeContent::Economics(EconomicsContent {
            term: "채권".to_string(),
            description: "빌려준 돈의 증서".to_string(),
        });

        cache.put(CategoryKey::Economics, date(), None, &economics);
        cache.put(CategoryKey::Fortune, date(), Some("19900101"), &fortune("x"));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(CategoryKey::Economics, date(), None),
            Some(economics)
        );
    }

    #[test]
    fn earlier_days_do_not_hold_quota() {
        let mut cache = ContentCache::in_memory(DEFAULT_CACHE_PREFIX, 4);
        for offset in 0..4 {
            let day = date() + Duration::days(offset);
            cache.put(CategoryKey::Fortune, day, Some("19900101"), &fortune("old"));
        }
        assert_eq!(cache.len(), 4);

        let today = date() + Duration::days(10);
        cache.put(CategoryKey::Fortune, today, Some("19900101"), &fortune("today"));

        assert_eq!(
            cache.get(CategoryKey::Fortune, today, Some("19900101")),
            Some(fortune("today"))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn durable_cache_is_shared_through_the_store() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut first = ContentCache::durable(DEFAULT_CACHE_PREFIX, store.clone());
        first.put(CategoryKey::Fortune, date(), Some("19900101"), &fortune("shown"));

        let mut second = ContentCache::durable(DEFAULT_CACHE_PREFIX, store.clone());
        assert_eq!(
            second.get(CategoryKey::Fortune, date(), Some("19900101")),
            Some(fortune("shown"))
        );

        let tomorrow = date() + Duration::days(1);
        second.put(CategoryKey::Fortune, tomorrow, None, &fortune("next"));
        assert_eq!(
            store.list_ids(DEFAULT_CACHE_PREFIX).unwrap(),
            vec!["challengeCache_2024-06-02_fortune_no_birthdate".to_string()]
        );

        second.clear();
        assert_eq!(first.len(), 0);
    }
}
