use crate::catalog::CategoryKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FortuneContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomicsContent {
    pub term: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStep {
    pub description: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthContent {
    pub title: String,
    pub steps: Vec<HealthStep>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuizKind {
    #[default]
    MultipleChoice,
    ShortAnswer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizContent {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(rename = "type", default)]
    pub kind: QuizKind,
}

impl QuizContent {
    pub fn is_correct(&self, choice: &str) -> bool {
        choice.trim() == self.answer.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub phrase: String,
    pub translation: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronunciation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContent {
    pub english: Phrase,
    pub japanese: Phrase,
}

/// Challenge payload. Serialized as the bare inner object; the category is
/// stored next to it, so decoding always goes through [`ChallengeContent::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChallengeContent {
    Fortune(FortuneContent),
    Economics(EconomicsContent),
    Health(HealthContent),
    Quiz(QuizContent),
    Conversation(ConversationContent),
}

#[derive(Debug, thiserror::Error)]
#[error("content does not match the {category} shape: {source}")]
pub struct ContentDecodeError {
    pub category: CategoryKey,
    #[source]
    pub source: serde_json::Error,
}

impl ChallengeContent {
    pub fn category(&self) -> CategoryKey {
        match self {
            ChallengeContent::Fortune(_) => CategoryKey::Fortune,
            ChallengeContent::Economics(_) => CategoryKey::Economics,
            ChallengeContent::Health(_) => CategoryKey::Health,
            ChallengeContent::Quiz(_) => CategoryKey::Quiz,
            ChallengeContent::Conversation(_) => CategoryKey::Conversation,
        }
    }

    pub fn decode(category: CategoryKey, value: Value) -> Result<Self, ContentDecodeError> {
        let decoded = match category {
            CategoryKey::Fortune => serde_json::from_value(value).map(ChallengeContent::Fortune),
            CategoryKey::Economics => {
                serde_json::from_value(value).map(ChallengeContent::Economics)
            }
            CategoryKey::Health => serde_json::from_value(value).map(ChallengeContent::Health),
            CategoryKey::Quiz => serde_json::from_value(value).map(ChallengeContent::Quiz),
            CategoryKey::Conversation => {
                serde_json::from_value(value).map(ChallengeContent::Conversation)
            }
        };

        decoded.map_err(|source| ContentDecodeError { category, source })
    }

    pub fn decode_str(category: CategoryKey, raw: &str) -> Result<Self, ContentDecodeError> {
        serde_json::from_str::<Value>(raw)
            .map_err(|source| ContentDecodeError { category, source })
            .and_then(|value| Self::decode(category, value))
    }

    /// One-line headline used in history listings.
    pub fn headline(&self) -> String {
        match self {
            ChallengeContent::Fortune(fortune) => truncate(&fortune.text, 40),
            ChallengeContent::Economics(economics) => economics.term.clone(),
            ChallengeContent::Health(health) => health.title.clone(),
            ChallengeContent::Quiz(quiz) => truncate(&quiz.question, 40),
            ChallengeContent::Conversation(conversation) => {
                format!(
                    "{} / {}",
                    conversation.english.phrase, conversation.japanese.phrase
                )
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }

    let head = trimmed.chars().take(max_chars).collect::<String>();
    format!("{head}…")
}
