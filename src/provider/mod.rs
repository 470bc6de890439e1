pub mod gemini;

use crate::catalog::CategoryKey;
use crate::catalog::content::ChallengeContent;
use anyhow::Result;
use chrono::NaiveDate;

/// Per-user inputs some categories need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentParams {
    pub birth_date: Option<String>,
}

/// Generates the challenge content of a category for a given day.
pub trait ContentProvider: Send + Sync {
    fn generate(
        &self,
        category: CategoryKey,
        date: NaiveDate,
        params: &ContentParams,
    ) -> Result<ChallengeContent>;
}
