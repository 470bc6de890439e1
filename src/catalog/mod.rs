pub mod content;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_CATEGORIES_JSON: &str = include_str!("../../assets/categories.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKey {
    Fortune,
    Economics,
    Health,
    Quiz,
    Conversation,
}

impl CategoryKey {
    pub const ALL: [CategoryKey; 5] = [
        CategoryKey::Fortune,
        CategoryKey::Economics,
        CategoryKey::Health,
        CategoryKey::Quiz,
        CategoryKey::Conversation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryKey::Fortune => "fortune",
            CategoryKey::Economics => "economics",
            CategoryKey::Health => "health",
            CategoryKey::Quiz => "quiz",
            CategoryKey::Conversation => "conversation",
        }
    }

    /// Accepts the canonical keys plus the Korean labels and the legacy
    /// `language` key older clients used for the conversation category.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "fortune" | "운세" => Some(CategoryKey::Fortune),
            "economics" | "economy" | "경제" => Some(CategoryKey::Economics),
            "health" | "stretching" | "건강" => Some(CategoryKey::Health),
            "quiz" | "퀴즈" => Some(CategoryKey::Quiz),
            "conversation" | "language" | "회화" => Some(CategoryKey::Conversation),
            _ => None,
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryKey {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match Self::parse(raw) {
            Some(key) => Ok(key),
            None => bail!(
                "Unknown category: {raw}. Supported categories: fortune, economics, health, quiz, conversation"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub key: CategoryKey,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CategoryFile {
    categories: Vec<Category>,
}

/// Display metadata for every category, always holding exactly one entry per
/// [`CategoryKey`] in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryRegistry {
    categories: Vec<Category>,
}

impl CategoryRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read categories file: {}", path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse categories file: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let parsed: CategoryFile =
            serde_json::from_str(content).context("Invalid categories JSON")?;

        Ok(Self::normalized(parsed.categories))
    }

    pub fn builtin() -> Self {
        Self::from_json(DEFAULT_CATEGORIES_JSON).unwrap_or_else(|_| Self::normalized(Vec::new()))
    }

    pub fn get(&self, key: CategoryKey) -> Option<&Category> {
        self.categories.iter().find(|category| category.key == key)
    }

    pub fn display_name(&self, key: CategoryKey) -> &str {
        self.get(key)
            .map(|category| category.name.as_str())
            .unwrap_or_else(|| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    fn normalized(categories: Vec<Category>) -> Self {
        let mut by_key = categories
            .into_iter()
            .rev()
            .map(|category| (category.key, category))
            .collect::<HashMap<_, _>>();

        let categories = CategoryKey::ALL
            .into_iter()
            .map(|key| {
                by_key
                    .remove(&key)
                    .map(|category| Category {
                        key,
                        name: match category.name.trim() {
                            "" => key.as_str().to_string(),
                            name => name.to_string(),
                        },
                        description: category.description.trim().to_string(),
                    })
                    .unwrap_or_else(|| Category {
                        key,
                        name: key.as_str().to_string(),
                        description: String::new(),
                    })
            })
            .collect::<Vec<_>>();

        Self { categories }
    }
}
