use crate::cache::DEFAULT_CACHE_PREFIX;
use crate::catalog::DEFAULT_CATEGORIES_JSON;
use crate::ledger::DEFAULT_NAMESPACE;
use anyhow::{Context, Result, anyhow, bail};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = ".TodaysChallenge";
const CONFIG_FILE: &str = "config.json";
const CATEGORIES_FILE: &str = "categories.json";
pub const KAKAO_CLIENT_ID_ENV: &str = "TODAYS_CHALLENGE_KAKAO_CLIENT_ID";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub categories_path: PathBuf,
    pub export_dir: PathBuf,
    pub storage_namespace: String,
    pub cache_prefix: String,
    pub cache_max_entries: usize,
    pub api_port: u16,
    pub gemini_api_key: Option<String>,
    pub gemini_api_base_url: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_images_enabled: bool,
    pub gemini_timeout_seconds: u64,
    pub kakao_client_id: Option<String>,
    pub kakao_client_secret: Option<String>,
    pub kakao_redirect_uri: String,
}

impl Default for Config {
    fn default() -> Self {
        let root = default_root_dir();

        Self {
            db_path: root.join("db").join("challenge.db"),
            categories_path: root.join(CATEGORIES_FILE),
            export_dir: default_export_dir(),
            storage_namespace: DEFAULT_NAMESPACE.to_string(),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_max_entries: 256,
            api_port: 7891,
            gemini_api_key: None,
            gemini_api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_image_model: "imagen-3.0-generate-002".to_string(),
            gemini_images_enabled: true,
            gemini_timeout_seconds: 30,
            kakao_client_id: None,
            kakao_client_secret: None,
            kakao_redirect_uri: "http://localhost:5173/#/auth/kakao/callback".to_string(),
        }
    }
}

impl Config {
    pub fn root_dir() -> Result<PathBuf> {
        Ok(default_root_dir())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(default_root_dir().join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    /// Falls back to defaults when no config file has been written yet.
    pub fn load_or_default() -> Result<Self> {
        if Self::config_path()?.exists() {
            Self::load()
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
        set_mode_600(&config_path)?;

        Ok(())
    }

    pub fn ensure_bootstrap_files(&self) -> Result<()> {
        let root = Self::root_dir()?;
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create root directory: {}", root.display()))?;

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        if !self.categories_path.exists() {
            if let Some(parent) = self.categories_path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create categories directory: {}", parent.display())
                })?;
            }

            fs::write(&self.categories_path, DEFAULT_CATEGORIES_JSON).with_context(|| {
                format!(
                    "Failed to create default categories file: {}",
                    self.categories_path.display()
                )
            })?;
            set_mode_600(&self.categories_path)?;
        }

        Ok(())
    }

    /// Kakao client id from the environment first, then the config file.
    pub fn resolved_kakao_client_id(&self) -> Option<String> {
        std::env::var(KAKAO_CLIENT_ID_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.kakao_client_id.clone())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_config_key(key) {
            "db_path" => self.db_path = expand_home(value),
            "categories_path" => self.categories_path = expand_home(value),
            "export_dir" => {
                self.export_dir = expand_home(value);
                fs::create_dir_all(&self.export_dir).with_context(|| {
                    format!(
                        "Failed to create export directory: {}",
                        self.export_dir.display()
                    )
                })?;
            }
            "storage_namespace" => {
                self.storage_namespace = non_empty(value, "storage_namespace")?;
            }
            "cache_prefix" => self.cache_prefix = non_empty(value, "cache_prefix")?,
            "cache_max_entries" => {
                self.cache_max_entries = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("cache_max_entries must be a number"))?
                    .max(1);
            }
            "api_port" => {
                self.api_port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("api_port must be a number"))?;
            }
            "gemini_api_key" => self.gemini_api_key = optional(value),
            "gemini_api_base_url" => {
                self.gemini_api_base_url = value.trim().trim_end_matches('/').to_string();
            }
            "gemini_model" => self.gemini_model = non_empty(value, "gemini_model")?,
            "gemini_image_model" => {
                self.gemini_image_model = non_empty(value, "gemini_image_model")?;
            }
            "gemini_images_enabled" => {
                self.gemini_images_enabled = value
                    .parse::<bool>()
                    .map_err(|_| anyhow!("gemini_images_enabled must be true/false"))?;
            }
            "gemini_timeout_seconds" => {
                self.gemini_timeout_seconds = value
                    .parse::<u64>()
                    .map_err(|_| anyhow!("gemini_timeout_seconds must be a number"))?
                    .max(5);
            }
            "kakao_client_id" => self.kakao_client_id = optional(value),
            "kakao_client_secret" => self.kakao_client_secret = optional(value),
            "kakao_redirect_uri" => {
                url::Url::parse(value.trim())
                    .with_context(|| format!("kakao_redirect_uri must be an absolute URL: {value}"))?;
                self.kakao_redirect_uri = value.trim().to_string();
            }
            _ => {
                bail!(
                    "Unsupported config key: {key}. Supported keys: db_path|db.path, categories_path|categories.path, export_dir|export.dir, storage_namespace|storage.namespace, cache_prefix|cache.prefix, cache_max_entries|cache.max_entries, api_port|api.port, gemini_api_key|gemini.api_key, gemini_api_base_url|gemini.base_url, gemini_model|gemini.model, gemini_image_model|gemini.image_model, gemini_images_enabled|gemini.images, gemini_timeout_seconds|gemini.timeout_seconds, kakao_client_id|kakao.client_id, kakao_client_secret|kakao.client_secret, kakao_redirect_uri|kakao.redirect_uri"
                );
            }
        }

        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        match normalize_config_key(key) {
            "db_path" => Some(self.db_path.display().to_string()),
            "categories_path" => Some(self.categories_path.display().to_string()),
            "export_dir" => Some(self.export_dir.display().to_string()),
            "storage_namespace" => Some(self.storage_namespace.clone()),
            "cache_prefix" => Some(self.cache_prefix.clone()),
            "cache_max_entries" => Some(self.cache_max_entries.to_string()),
            "api_port" => Some(self.api_port.to_string()),
            "gemini_api_key" => Some(mask(&self.gemini_api_key)),
            "gemini_api_base_url" => Some(self.gemini_api_base_url.clone()),
            "gemini_model" => Some(self.gemini_model.clone()),
            "gemini_image_model" => Some(self.gemini_image_model.clone()),
            "gemini_images_enabled" => Some(self.gemini_images_enabled.to_string()),
            "gemini_timeout_seconds" => Some(self.gemini_timeout_seconds.to_string()),
            "kakao_client_id" => Some(
                self.kakao_client_id
                    .clone()
                    .unwrap_or_else(|| "not_set".to_string()),
            ),
            "kakao_client_secret" => Some(mask(&self.kakao_client_secret)),
            "kakao_redirect_uri" => Some(self.kakao_redirect_uri.clone()),
            _ => None,
        }
    }
}

fn normalize_config_key(key: &str) -> &str {
    match key {
        "db_path" | "db.path" => "db_path",
        "categories_path" | "categories.path" => "categories_path",
        "export_dir" | "export.dir" => "export_dir",
        "storage_namespace" | "storage.namespace" => "storage_namespace",
        "cache_prefix" | "cache.prefix" => "cache_prefix",
        "cache_max_entries" | "cache.max_entries" => "cache_max_entries",
        "api_port" | "api.port" => "api_port",
        "gemini_api_key" | "gemini.api_key" => "gemini_api_key",
        "gemini_api_base_url" | "gemini.base_url" => "gemini_api_base_url",
        "gemini_model" | "gemini.model" => "gemini_model",
        "gemini_image_model" | "gemini.image_model" => "gemini_image_model",
        "gemini_images_enabled" | "gemini.images" => "gemini_images_enabled",
        "gemini_timeout_seconds" | "gemini.timeout_seconds" => "gemini_timeout_seconds",
        "kakao_client_id" | "kakao.client_id" => "kakao_client_id",
        "kakao_client_secret" | "kakao.client_secret" => "kakao_client_secret",
        "kakao_redirect_uri" | "kakao.redirect_uri" => "kakao_redirect_uri",
        _ => key,
    }
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn non_empty(value: &str, name: &str) -> Result<String> {
    optional(value).with_context(|| format!("{name} must not be empty"))
}

fn mask(secret: &Option<String>) -> String {
    secret
        .as_ref()
        .map(|_| "***set***".to_string())
        .unwrap_or_else(|| "not_set".to_string())
}

pub fn expand_home(raw: &str) -> PathBuf {
    raw.strip_prefix("~/")
        .and_then(|stripped| home_dir().map(|home| home.join(stripped)))
        .unwrap_or_else(|| PathBuf::from(raw))
}

pub fn default_export_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("TodaysChallenge")
        .join("exports")
}

fn default_root_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn set_mode_600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set file permissions: {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn dotted_aliases_resolve_to_fields() {
        let mut config = Config::default();
        config.set_value("api.port", "8088").unwrap();
        config.set_value("gemini.timeout_seconds", "1").unwrap();
        config.set_value("gemini.base_url", "https://example.test/v1/").unwrap();

        assert_eq!(config.get_value("api_port").as_deref(), Some("8088"));
        assert_eq!(config.gemini_timeout_seconds, 5);
        assert_eq!(config.gemini_api_base_url, "https://example.test/v1");
    }

    #[test]
    fn secrets_are_masked() {
        let mut config = Config::default();
        assert_eq!(config.get_value("gemini.api_key").as_deref(), Some("not_set"));

        config.set_value("gemini.api_key", "  secret  ").unwrap();
        assert_eq!(config.gemini_api_key.as_deref(), Some("secret"));
        assert_eq!(config.get_value("gemini.api_key").as_deref(), Some("***set***"));

        config.set_value("gemini.api_key", "").unwrap();
        assert_eq!(config.gemini_api_key, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();

        assert!(config.set_value("api.port", "http").is_err());
        assert!(config.set_value("gemini.images", "maybe").is_err());
        assert!(config.set_value("kakao.redirect_uri", "not a url").is_err());
        assert!(config.set_value("storage.namespace", " ").is_err());
        assert!(config.set_value("unknown.key", "1").is_err());
        assert_eq!(config.get_value("unknown.key"), None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_port": 9000}"#).unwrap();

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.cache_prefix, "challengeCache");
        assert_eq!(config.storage_namespace, "todayChallengeApp");
    }
}
