pub mod clock;
pub mod model;
pub mod recovery;
pub mod store;

use crate::catalog::{CategoryKey, CategoryRegistry};
use crate::catalog::content::ChallengeContent;
use crate::ledger::clock::Clock;
use crate::ledger::model::{ActivityLogEntry, AppData, AuthUser};
use crate::ledger::store::{RecordStore, StorageKey};
use anyhow::Context;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_NAMESPACE: &str = "todayChallengeApp";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("the activity ledger has not been loaded for a user")]
    NotLoaded,
    #[error("{actual} content cannot be recorded as a {expected} completion")]
    ContentMismatch {
        expected: CategoryKey,
        actual: CategoryKey,
    },
}

struct LoadedLedger {
    user_id: String,
    data: AppData,
}

/// Per-user completion history and category statistics.
///
/// At most one log entry exists per calendar day, the log stays sorted
/// newest-first, and `category_stats` always equals the per-category count of
/// log entries. Every mutation re-persists the whole record; a failed write is
/// logged and the in-memory state stays authoritative.
pub struct ActivityLedger {
    store: Arc<dyn RecordStore>,
    registry: Arc<CategoryRegistry>,
    clock: Arc<dyn Clock>,
    namespace: String,
    active: Option<LoadedLedger>,
}

impl ActivityLedger {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<CategoryRegistry>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            namespace: namespace.into(),
            active: None,
        }
    }

    /// Loads the record of `user`, replacing whatever was active. Missing
    /// records start empty; corrupt fields are repaired, never fatal.
    pub fn load(&mut self, user: &AuthUser) -> &AppData {
        let key = self.storage_key(&user.id);

        let mut data = match self.store.read(&key) {
            Ok(Some(raw)) => {
                let recovered = recovery::decode_app_data(&raw, &self.registry);
                for repair in &recovered.repairs {
                    warn!(user_id = %user.id, repair = %repair, "recovered corrupt ledger record");
                }
                recovered.data
            }
            Ok(None) => {
                info!(user_id = %user.id, "no ledger record yet, starting fresh");
                AppData::empty_for(user)
            }
            Err(error) => {
                error!(user_id = %user.id, error = %error, "failed to read ledger record, starting fresh");
                AppData::empty_for(user)
            }
        };

        data.version = model::APP_DATA_VERSION;
        data.user_info.apply_profile(user);

        info!(
            user_id = %user.id,
            entries = data.activity_log.len(),
            "activity ledger loaded"
        );

        &self
            .active
            .insert(LoadedLedger {
                user_id: user.id.clone(),
                data,
            })
            .data
    }

    /// Drops the in-memory record. The persisted record is kept.
    pub fn unload(&mut self) -> Option<String> {
        self.active.take().map(|active| active.user_id)
    }

    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    pub fn current_user_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.user_id.as_str())
    }

    pub fn data(&self) -> Result<&AppData, LedgerError> {
        self.active
            .as_ref()
            .map(|active| &active.data)
            .ok_or(LedgerError::NotLoaded)
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Re-applies login-time profile fields for the already loaded user.
    pub fn refresh_profile(&mut self, user: &AuthUser) -> Result<(), LedgerError> {
        let active = self.active.as_mut().ok_or(LedgerError::NotLoaded)?;
        active.data.user_info.apply_profile(user);
        self.persist();
        Ok(())
    }

    /// Stores an already validated `YYYYMMDD` birth date. Returns whether the
    /// value changed.
    pub fn set_birth_date(&mut self, birth_date: &str) -> Result<bool, LedgerError> {
        let active = self.active.as_mut().ok_or(LedgerError::NotLoaded)?;
        let user_info = &mut active.data.user_info;

        if user_info.birth_date.as_deref() == Some(birth_date) {
            return Ok(false);
        }

        user_info.birth_date = Some(birth_date.to_string());
        self.persist();
        Ok(true)
    }

    pub fn clear_birth_date(&mut self) -> Result<bool, LedgerError> {
        let active = self.active.as_mut().ok_or(LedgerError::NotLoaded)?;
        let changed = active.data.user_info.birth_date.take().is_some();

        if changed {
            self.persist();
        }
        Ok(changed)
    }

    /// Records today's completion. A second completion on the same day
    /// replaces the first and moves its count to the new category.
    pub fn record_completion(
        &mut self,
        category_key: CategoryKey,
        content: ChallengeContent,
    ) -> Result<ActivityLogEntry, LedgerError> {
        if content.category() != category_key {
            return Err(LedgerError::ContentMismatch {
                expected: category_key,
                actual: content.category(),
            });
        }

        let today = self.clock.today();
        let category_name = self.registry.display_name(category_key).to_string();
        let active = self.active.as_mut().ok_or(LedgerError::NotLoaded)?;
        let data = &mut active.data;

        let existing = data
            .activity_log
            .iter()
            .position(|entry| entry.date == today);

        if let Some(index) = existing {
            let previous = data.activity_log[index].category_key;
            data.category_stats.decrement(previous);
        }
        data.category_stats.increment(category_key);

        let entry = ActivityLogEntry {
            date: today,
            category_key,
            category_name,
            content,
        };

        match existing {
            Some(index) => data.activity_log[index] = entry.clone(),
            None => data.activity_log.push(entry.clone()),
        }
        data.activity_log
            .sort_by(|left, right| right.date.cmp(&left.date));

        info!(
            user_id = %active.user_id,
            date = %today,
            category = %category_key,
            replaced = existing.is_some(),
            "challenge completed"
        );

        self.persist();
        Ok(entry)
    }

    pub fn todays_completion(&self) -> Result<Option<&ActivityLogEntry>, LedgerError> {
        self.completion_on(self.clock.today())
    }

    pub fn completion_on(&self, date: NaiveDate) -> Result<Option<&ActivityLogEntry>, LedgerError> {
        Ok(self
            .data()?
            .activity_log
            .iter()
            .find(|entry| entry.date == date))
    }

    fn storage_key(&self, user_id: &str) -> StorageKey {
        StorageKey::new(self.namespace.as_str(), user_id)
    }

    fn persist(&self) {
        let Some(active) = &self.active else {
            return;
        };

        let key = self.storage_key(&active.user_id);
        let written = serde_json::to_string(&active.data)
            .context("Failed to serialize ledger record")
            .and_then(|payload| self.store.write(&key, &payload));

        if let Err(error) = written {
            error!(
                user_id = %active.user_id,
                key = %key,
                error = %error,
                "failed to persist ledger record, keeping in-memory state"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityLedger, DEFAULT_NAMESPACE, LedgerError};
    use crate::catalog::content::{
        ChallengeContent, EconomicsContent, FortuneContent, QuizContent, QuizKind,
    };
    use crate::catalog::{CategoryKey, CategoryRegistry};
    use crate::ledger::clock::FixedClock;
    use crate::ledger::model::{AuthProvider, AuthUser, CategoryStats};
    use crate::ledger::store::{MemoryRecordStore, RecordStore, StorageKey};
    use std::collections::HashSet;
    use std::sync::Arc;

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        clock: Arc<FixedClock>,
        ledger: ActivityLedger,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let clock = Arc::new(FixedClock::on(2024, 6, 1));
        let ledger = ActivityLedger::new(
            store.clone(),
            Arc::new(CategoryRegistry::builtin()),
            clock.clone(),
            DEFAULT_NAMESPACE,
        );

        Fixture {
            store,
            clock,
            ledger,
        }
    }

    fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            name: format!("user-{id}"),
            email: format!("{id}@example.com"),
            provider: AuthProvider::Kakao,
            profile_image: None,
        }
    }

    fn fortune(text: &str) -> ChallengeContent {
        ChallengeContent::Fortune(FortuneContent {
            text: text.to_string(),
        })
    }

    fn quiz(question: &str) -> ChallengeContent {
        ChallengeContent::Quiz(QuizContent {
            question: question.to_string(),
            options: vec!["a".to_string(), "b".to_string()],
            answer: "a".to_string(),
            explanation: String::new(),
            kind: QuizKind::MultipleChoice,
        })
    }

    fn economics(term: &str) -> ChallengeContent {
        ChallengeContent::Economics(EconomicsContent {
            term: term.to_string(),
            description: "설명".to_string(),
        })
    }

    fn assert_invariants(ledger: &ActivityLedger) {
        let data = ledger.data().unwrap();

        let mut seen = HashSet::new();
        assert!(data.activity_log.iter().all(|entry| seen.insert(entry.date)));
        assert!(
            data.activity_log
                .windows(2)
                .all(|pair| pair[0].date > pair[1].date)
        );
        assert!(
            data.category_stats
                .matches(&CategoryStats::from_log(&data.activity_log))
        );
    }

    #[test]
    fn fresh_user_first_completion() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        let entry = fx
            .ledger
            .record_completion(CategoryKey::Fortune, fortune("좋은 하루"))
            .unwrap();

        let data = fx.ledger.data().unwrap();
        assert_eq!(entry.date.to_string(), "2024-06-01");
        assert_eq!(entry.category_name, "오늘의 운세");
        assert_eq!(data.activity_log, vec![entry]);
        assert_eq!(data.category_stats.get(CategoryKey::Fortune), 1);
        assert_eq!(data.category_stats.total(), 1);
    }

    #[test]
    fn same_category_recompletion_replaces_content() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        fx.ledger
            .record_completion(CategoryKey::Quiz, quiz("first"))
            .unwrap();
        fx.ledger
            .record_completion(CategoryKey::Quiz, quiz("second"))
            .unwrap();

        let data = fx.ledger.data().unwrap();
        assert_eq!(data.activity_log.len(), 1);
        assert_eq!(data.activity_log[0].content, quiz("second"));
        assert_eq!(data.category_stats.get(CategoryKey::Quiz), 1);
    }

    #[test]
    fn same_day_switch_migrates_the_count() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        fx.ledger
            .record_completion(CategoryKey::Quiz, quiz("q"))
            .unwrap();
        fx.ledger
            .record_completion(CategoryKey::Economics, economics("ETF"))
            .unwrap();

        let data = fx.ledger.data().unwrap();
        assert_eq!(data.category_stats.get(CategoryKey::Quiz), 0);
        assert_eq!(data.category_stats.get(CategoryKey::Economics), 1);
        assert_eq!(
            fx.ledger.todays_completion().unwrap().map(|entry| entry.category_key),
            Some(CategoryKey::Economics)
        );
    }

    #[test]
    fn invariants_hold_across_days_and_switches() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        let plan = [
            (0, CategoryKey::Quiz),
            (0, CategoryKey::Economics),
            (0, CategoryKey::Quiz),
            (1, CategoryKey::Fortune),
            (0, CategoryKey::Fortune),
            (2, CategoryKey::Economics),
            (0, CategoryKey::Quiz),
            (0, CategoryKey::Quiz),
        ];

        for (advance, key) in plan {
            fx.clock.advance_days(advance);
            let content = match key {
                CategoryKey::Quiz => quiz("q"),
                CategoryKey::Economics => economics("e"),
                _ => fortune("f"),
            };
            fx.ledger.record_completion(key, content).unwrap();
            assert_invariants(&fx.ledger);
        }

        let data = fx.ledger.data().unwrap();
        assert_eq!(data.activity_log.len(), 3);
        assert_eq!(data.category_stats.get(CategoryKey::Quiz), 2);
        assert_eq!(data.category_stats.get(CategoryKey::Fortune), 1);
        assert_eq!(data.category_stats.get(CategoryKey::Economics), 0);
    }

    #[test]
    fn switching_repeatedly_never_underflows() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        for _ in 0..5 {
            fx.ledger
                .record_completion(CategoryKey::Quiz, quiz("q"))
                .unwrap();
            fx.ledger
                .record_completion(CategoryKey::Fortune, fortune("f"))
                .unwrap();
        }

        let data = fx.ledger.data().unwrap();
        assert_eq!(data.category_stats.get(CategoryKey::Quiz), 0);
        assert_eq!(data.category_stats.get(CategoryKey::Fortune), 1);
    }

    #[test]
    fn history_is_restored_on_next_load() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));
        fx.ledger
            .record_completion(CategoryKey::Fortune, fortune("f"))
            .unwrap();
        fx.ledger.set_birth_date("19900101").unwrap();
        fx.ledger.unload();

        let data = fx.ledger.load(&user("1"));
        assert_eq!(data.activity_log.len(), 1);
        assert_eq!(data.user_info.birth_date.as_deref(), Some("19900101"));
        assert_eq!(data.category_stats.get(CategoryKey::Fortune), 1);
    }

    #[test]
    fn a_different_user_starts_empty() {
        let mut fx = fixture();
        fx.ledger.load(&user("alice"));
        fx.ledger
            .record_completion(CategoryKey::Fortune, fortune("f"))
            .unwrap();
        fx.ledger.unload();

        let data = fx.ledger.load(&user("bob"));
        assert!(data.activity_log.is_empty());
        assert_eq!(data.user_info.id.as_deref(), Some("bob"));
        assert_eq!(
            fx.store.list_ids(DEFAULT_NAMESPACE).unwrap(),
            vec!["alice".to_string()]
        );
    }

    #[test]
    fn corrupt_activity_log_loads_as_empty() {
        let fx = fixture();
        let mut ledger = fx.ledger;
        fx.store
            .write(
                &StorageKey::new(DEFAULT_NAMESPACE, "1"),
                r#"{"userInfo":{},"activityLog":{"date":"2024-06-01"},"categoryStats":{}}"#,
            )
            .unwrap();

        let data = ledger.load(&user("1"));
        assert!(data.activity_log.is_empty());
    }

    #[test]
    fn persistence_failure_keeps_memory_state() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));
        fx.store.set_fail_writes(true);

        fx.ledger
            .record_completion(CategoryKey::Quiz, quiz("q"))
            .unwrap();
        assert_eq!(fx.ledger.data().unwrap().activity_log.len(), 1);
        assert!(
            fx.store
                .read(&StorageKey::new(DEFAULT_NAMESPACE, "1"))
                .unwrap()
                .is_none()
        );

        fx.store.set_fail_writes(false);
        fx.ledger.set_birth_date("20000101").unwrap();
        let stored = fx
            .store
            .read(&StorageKey::new(DEFAULT_NAMESPACE, "1"))
            .unwrap()
            .unwrap();
        assert!(stored.contains("\"quiz\""));
    }

    #[test]
    fn operations_before_load_are_rejected() {
        let mut fx = fixture();

        assert!(matches!(
            fx.ledger.record_completion(CategoryKey::Quiz, quiz("q")),
            Err(LedgerError::NotLoaded)
        ));
        assert!(matches!(
            fx.ledger.todays_completion(),
            Err(LedgerError::NotLoaded)
        ));
    }

    #[test]
    fn mismatched_content_is_rejected_without_mutation() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        let result = fx
            .ledger
            .record_completion(CategoryKey::Economics, fortune("f"));

        assert!(matches!(
            result,
            Err(LedgerError::ContentMismatch {
                expected: CategoryKey::Economics,
                actual: CategoryKey::Fortune
            })
        ));
        assert!(fx.ledger.data().unwrap().activity_log.is_empty());
    }

    #[test]
    fn birth_date_updates_report_changes() {
        let mut fx = fixture();
        fx.ledger.load(&user("1"));

        assert!(fx.ledger.set_birth_date("19900101").unwrap());
        assert!(!fx.ledger.set_birth_date("19900101").unwrap());
        assert!(fx.ledger.clear_birth_date().unwrap());
        assert!(!fx.ledger.clear_birth_date().unwrap());
        assert!(fx.ledger.data().unwrap().activity_log.is_empty());
    }
}
