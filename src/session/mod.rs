use crate::cache::ContentCache;
use crate::catalog::content::ChallengeContent;
use crate::catalog::{CategoryKey, CategoryRegistry};
use crate::config::Config;
use crate::ledger::clock::KoreaStandardClock;
use crate::ledger::model::{ActivityLogEntry, AppData, AuthUser};
use crate::ledger::store::{RecordStore, StorageKey};
use crate::ledger::{ActivityLedger, LedgerError};
use crate::provider::{ContentParams, ContentProvider};
use anyhow::Result;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};

pub const AUTH_NAMESPACE: &str = "auth_user";
const AUTH_RECORD_ID: &str = "current";

static BIRTH_DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{8}$").unwrap_or_else(|error| panic!("invalid birth date pattern: {error}"))
});

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("birth date must be 8 digits (YYYYMMDD), got {0:?}")]
    InvalidBirthDate(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub fn is_valid_birth_date(raw: &str) -> bool {
    BIRTH_DATE_PATTERN.is_match(raw)
}

/// A content fetch that was started under a particular identity. Its result
/// is only accepted while that identity is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    epoch: u64,
    pub category: CategoryKey,
    pub date: NaiveDate,
    pub birth_date: Option<String>,
}

impl FetchTicket {
    pub fn params(&self) -> ContentParams {
        ContentParams {
            birth_date: self.birth_date.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRequest {
    Ready(ChallengeContent),
    NeedsBirthDate,
    Fetch(FetchTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentOutcome {
    Ready(ChallengeContent),
    NeedsBirthDate,
}

/// Binds the ledger and the content cache to whoever is signed in.
pub struct Session {
    ledger: ActivityLedger,
    cache: ContentCache,
    store: Arc<dyn RecordStore>,
    user: Option<AuthUser>,
    epoch: u64,
}

impl Session {
    pub fn new(ledger: ActivityLedger, cache: ContentCache, store: Arc<dyn RecordStore>) -> Self {
        Self {
            ledger,
            cache,
            store,
            user: None,
            epoch: 0,
        }
    }

    /// Session for a long-running process; cached content lives in memory.
    pub fn open(
        config: &Config,
        store: Arc<dyn RecordStore>,
        registry: Arc<CategoryRegistry>,
    ) -> Self {
        let cache = ContentCache::in_memory(config.cache_prefix.as_str(), config.cache_max_entries);
        Self::with_cache(config, store, registry, cache)
    }

    /// Session whose cached content is kept in the record store, so content
    /// shown by one CLI run is what a later run records.
    pub fn open_durable(
        config: &Config,
        store: Arc<dyn RecordStore>,
        registry: Arc<CategoryRegistry>,
    ) -> Self {
        let cache = ContentCache::durable(config.cache_prefix.as_str(), store.clone());
        Self::with_cache(config, store, registry, cache)
    }

    fn with_cache(
        config: &Config,
        store: Arc<dyn RecordStore>,
        registry: Arc<CategoryRegistry>,
        cache: ContentCache,
    ) -> Self {
        let ledger = ActivityLedger::new(
            store.clone(),
            registry,
            Arc::new(KoreaStandardClock),
            config.storage_namespace.as_str(),
        );

        Self::new(ledger, cache, store)
    }

    /// Signs the persisted user back in, if any.
    pub fn restore(&mut self) -> Option<AuthUser> {
        let raw = match self.store.read(&auth_key()) {
            Ok(raw) => raw?,
            Err(error) => {
                error!(error = %error, "failed to read persisted sign-in");
                return None;
            }
        };

        match serde_json::from_str::<AuthUser>(&raw) {
            Ok(user) => {
                info!(user_id = %user.id, "restoring previous sign-in");
                match self.login(user.clone()) {
                    Ok(_) => Some(user),
                    Err(error) => {
                        error!(error = %error, "failed to restore sign-in");
                        None
                    }
                }
            }
            Err(error) => {
                warn!(error = %error, "discarding unreadable persisted sign-in");
                self.remove_auth_record();
                None
            }
        }
    }

    /// Activates `user`. Re-login of the active user only refreshes profile
    /// fields; any other user gets their own record loaded in full.
    pub fn login(&mut self, user: AuthUser) -> Result<&AppData, SessionError> {
        let same_user = self.ledger.current_user_id() == Some(user.id.as_str());

        if same_user {
            self.ledger.refresh_profile(&user)?;
        } else {
            if let Some(previous) = self.ledger.unload() {
                info!(previous_user_id = %previous, user_id = %user.id, "switching user");
            }
            self.ledger.load(&user);
            self.epoch += 1;
        }

        self.persist_auth(&user);
        self.user = Some(user);

        Ok(self.ledger.data()?)
    }

    pub fn logout(&mut self) -> Option<AuthUser> {
        let user = self.user.take();
        self.ledger.unload();
        self.cache.clear();
        self.remove_auth_record();
        self.epoch += 1;

        if let Some(user) = &user {
            info!(user_id = %user.id, "signed out");
        }
        user
    }

    pub fn current_user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    #[cfg(test)]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn today(&self) -> NaiveDate {
        self.ledger.today()
    }

    pub fn app_data(&self) -> Result<&AppData, SessionError> {
        self.require_user()?;
        Ok(self.ledger.data()?)
    }

    pub fn birth_date(&self) -> Option<&str> {
        self.ledger
            .data()
            .ok()
            .and_then(|data| data.user_info.birth_date.as_deref())
    }

    /// Validates and stores a `YYYYMMDD` birth date. Today's fortune cached
    /// under the previous value is dropped when the value changes.
    pub fn set_birth_date(&mut self, raw: &str) -> Result<bool, SessionError> {
        self.require_user()?;
        if !is_valid_birth_date(raw) {
            return Err(SessionError::InvalidBirthDate(raw.to_string()));
        }

        let previous = self.birth_date().map(str::to_string);
        let changed = self.ledger.set_birth_date(raw)?;
        if changed {
            self.cache
                .invalidate_fortune(self.ledger.today(), previous.as_deref());
        }

        Ok(changed)
    }

    pub fn clear_birth_date(&mut self) -> Result<bool, SessionError> {
        self.require_user()?;

        let previous = self.birth_date().map(str::to_string);
        let changed = self.ledger.clear_birth_date()?;
        if changed {
            self.cache
                .invalidate_fortune(self.ledger.today(), previous.as_deref());
        }

        Ok(changed)
    }

    pub fn complete_challenge(
        &mut self,
        category: CategoryKey,
        content: ChallengeContent,
    ) -> Result<ActivityLogEntry, SessionError> {
        self.require_user()?;
        Ok(self.ledger.record_completion(category, content)?)
    }

    pub fn todays_completion(&self) -> Result<Option<&ActivityLogEntry>, SessionError> {
        self.require_user()?;
        Ok(self.ledger.todays_completion()?)
    }

    pub fn request_content(&mut self, category: CategoryKey) -> Result<ContentRequest, SessionError> {
        self.require_user()?;

        let date = self.ledger.today();
        let birth_date = self.birth_date().map(str::to_string);

        if category == CategoryKey::Fortune && birth_date.is_none() {
            return Ok(ContentRequest::NeedsBirthDate);
        }

        if let Some(content) = self.cache.get(category, date, birth_date.as_deref()) {
            return Ok(ContentRequest::Ready(content));
        }

        Ok(ContentRequest::Fetch(FetchTicket {
            epoch: self.epoch,
            category,
            date,
            birth_date,
        }))
    }

    /// Caches a fetched result. Returns `false` and drops the content when
    /// the identity changed since the ticket was issued.
    pub fn finish_fetch(&mut self, ticket: &FetchTicket, content: &ChallengeContent) -> bool {
        if ticket.epoch != self.epoch || !self.ledger.is_loaded() {
            debug!(
                category = %ticket.category,
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                "discarding stale content fetch"
            );
            return false;
        }

        self.cache.put(
            ticket.category,
            ticket.date,
            ticket.birth_date.as_deref(),
            content,
        );
        true
    }

    pub fn load_content(
        &mut self,
        provider: &dyn ContentProvider,
        category: CategoryKey,
    ) -> Result<ContentOutcome> {
        match self.request_content(category)? {
            ContentRequest::Ready(content) => Ok(ContentOutcome::Ready(content)),
            ContentRequest::NeedsBirthDate => Ok(ContentOutcome::NeedsBirthDate),
            ContentRequest::Fetch(ticket) => {
                let content = provider.generate(ticket.category, ticket.date, &ticket.params())?;
                self.finish_fetch(&ticket, &content);
                Ok(ContentOutcome::Ready(content))
            }
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn require_user(&self) -> Result<&AuthUser, SessionError> {
        self.user.as_ref().ok_or(SessionError::NotAuthenticated)
    }

    fn persist_auth(&self, user: &AuthUser) {
        let written = serde_json::to_string(user)
            .map_err(anyhow::Error::from)
            .and_then(|payload| self.store.write(&auth_key(), &payload));

        if let Err(error) = written {
            error!(user_id = %user.id, error = %error, "failed to persist sign-in");
        }
    }

    fn remove_auth_record(&self) {
        if let Err(error) = self.store.remove(&auth_key()) {
            error!(error = %error, "failed to clear persisted sign-in");
        }
    }
}

fn auth_key() -> StorageKey {
    StorageKey::new(AUTH_NAMESPACE, AUTH_RECORD_ID)
}
