use crate::catalog::CategoryKey;
use crate::catalog::content::{ChallengeContent, ContentDecodeError};
use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const APP_DATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Kakao,
    Google,
}

impl AuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthProvider::Kakao => "kakao",
            AuthProvider::Google => "google",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "kakao" => Ok(AuthProvider::Kakao),
            "google" => Ok(AuthProvider::Google),
            _ => bail!("Unsupported provider: {raw}. Use kakao or google"),
        }
    }
}

/// The signed-in identity as handed over by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub provider: AuthProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<AuthProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl UserInfo {
    pub fn from_auth_user(user: &AuthUser) -> Self {
        let mut info = Self::default();
        info.apply_profile(user);
        info
    }

    /// Replaces every identity field with the login-time profile. The birth
    /// date is user-entered and survives.
    pub fn apply_profile(&mut self, user: &AuthUser) {
        self.id = Some(user.id.clone());
        self.name = Some(user.name.clone());
        self.email = (!user.email.is_empty()).then(|| user.email.clone());
        self.provider = Some(user.provider);
        self.profile_image = user.profile_image.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StoredEntry")]
pub struct ActivityLogEntry {
    pub date: NaiveDate,
    pub category_key: CategoryKey,
    pub category_name: String,
    pub content: ChallengeContent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    date: NaiveDate,
    category_key: CategoryKey,
    #[serde(default)]
    category_name: String,
    content: Value,
}

impl TryFrom<StoredEntry> for ActivityLogEntry {
    type Error = ContentDecodeError;

    fn try_from(stored: StoredEntry) -> std::result::Result<Self, Self::Error> {
        let content = ChallengeContent::decode(stored.category_key, stored.content)?;

        Ok(Self {
            date: stored.date,
            category_key: stored.category_key,
            category_name: stored.category_name,
            content,
        })
    }
}

/// Completion counts per category. Absent keys count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryStats(BTreeMap<CategoryKey, u32>);

impl CategoryStats {
    pub fn from_log(entries: &[ActivityLogEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut stats, entry| {
            stats.increment(entry.category_key);
            stats
        })
    }

    pub fn get(&self, key: CategoryKey) -> u32 {
        self.0.get(&key).copied().unwrap_or_default()
    }

    pub fn increment(&mut self, key: CategoryKey) {
        *self.0.entry(key).or_insert(0) += 1;
    }

    pub fn decrement(&mut self, key: CategoryKey) {
        if let Some(count) = self.0.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn set(&mut self, key: CategoryKey, count: u32) {
        self.0.insert(key, count);
    }

    pub fn matches(&self, other: &Self) -> bool {
        CategoryKey::ALL
            .into_iter()
            .all(|key| self.get(key) == other.get(key))
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CategoryKey, u32)> + '_ {
        self.0.iter().map(|(key, count)| (*key, *count))
    }
}

/// Durable per-user aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    pub version: u32,
    pub user_info: UserInfo,
    pub activity_log: Vec<ActivityLogEntry>,
    pub category_stats: CategoryStats,
}

impl Default for AppData {
    fn default() -> Self {
        Self {
            version: APP_DATA_VERSION,
            user_info: UserInfo::default(),
            activity_log: Vec::new(),
            category_stats: CategoryStats::default(),
        }
    }
}

impl AppData {
    pub fn empty_for(user: &AuthUser) -> Self {
        Self {
            user_info: UserInfo::from_auth_user(user),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityLogEntry, AuthProvider, AuthUser, CategoryStats, UserInfo};
    use crate::catalog::CategoryKey;
    use serde_json::json;

    #[test]
    fn stats_decrement_never_goes_negative() {
        let mut stats = CategoryStats::default();
        stats.decrement(CategoryKey::Quiz);
        stats.set(CategoryKey::Health, 0);
        stats.decrement(CategoryKey::Health);

        assert_eq!(stats.get(CategoryKey::Quiz), 0);
        assert_eq!(stats.get(CategoryKey::Health), 0);
    }

    #[test]
    fn stats_match_ignores_zero_entries() {
        let mut left = CategoryStats::default();
        left.set(CategoryKey::Quiz, 0);
        left.increment(CategoryKey::Fortune);

        let mut right = CategoryStats::default();
        right.increment(CategoryKey::Fortune);

        assert!(left.matches(&right));
        assert_eq!(serde_json::to_value(&right).unwrap(), json!({"fortune": 1}));
    }

    #[test]
    fn entry_round_trips_in_storage_shape() {
        let raw = json!({
            "date": "2024-06-01",
            "categoryKey": "fortune",
            "categoryName": "오늘의 운세",
            "content": {"text": "좋은 하루"}
        });

        let entry: ActivityLogEntry = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entry.category_key, CategoryKey::Fortune);
        assert_eq!(serde_json::to_value(&entry).unwrap(), raw);
    }

    #[test]
    fn entry_with_foreign_content_is_rejected() {
        let raw = json!({
            "date": "2024-06-01",
            "categoryKey": "economics",
            "categoryName": "경제 상식",
            "content": {"text": "좋은 하루"}
        });

        assert!(serde_json::from_value::<ActivityLogEntry>(raw).is_err());
    }

    #[test]
    fn apply_profile_keeps_birth_date() {
        let mut info = UserInfo {
            birth_date: Some("19900101".to_string()),
            name: Some("old".to_string()),
            ..UserInfo::default()
        };
        let user = AuthUser {
            id: "42".to_string(),
            name: "new".to_string(),
            email: String::new(),
            provider: AuthProvider::Google,
            profile_image: None,
        };

        info.apply_profile(&user);

        assert_eq!(info.birth_date.as_deref(), Some("19900101"));
        assert_eq!(info.name.as_deref(), Some("new"));
        assert_eq!(info.email, None);
        assert_eq!(info.provider, Some(AuthProvider::Google));
    }
}
