pub mod display;
pub mod onboard;

use crate::ledger::model::AuthProvider;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "TodaysChallenge",
    about = "One small challenge a day: fortune, economics, stretching, quiz and travel phrases"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Onboard,
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Status,
    Doctor,
    /// Run the HTTP API on 127.0.0.1.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        /// Keep every record in memory; nothing is written to disk.
        #[arg(long, default_value_t = false)]
        ephemeral: bool,
    },
    Login {
        #[arg(long, default_value = "kakao")]
        provider: AuthProvider,
        /// Kakao authorization code, or the whole redirect URL.
        #[arg(long)]
        code: Option<String>,
        /// Google subject id (profile resolved by the client).
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    Logout,
    Whoami,
    BirthDate {
        #[command(subcommand)]
        command: BirthDateCommands,
    },
    /// Show today's content for a category.
    Challenge {
        category: String,
        /// Check a quiz answer (option number or text).
        #[arg(long)]
        answer: Option<String>,
    },
    /// Record today's completion.
    Complete {
        category: String,
        /// JSON file with the content to record.
        #[arg(long)]
        content_file: Option<PathBuf>,
    },
    Today,
    History {
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    Calendar {
        /// YYYY-MM, defaults to the current month.
        #[arg(long)]
        month: Option<String>,
    },
    Stats,
    Export {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Provider {
        #[command(subcommand)]
        command: ProviderCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}

#[derive(Debug, Subcommand)]
pub enum BirthDateCommands {
    /// YYYYMMDD
    Set { value: String },
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum ProviderCommands {
    Test {
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

/// Accepts a bare authorization code or a redirect URL carrying `code=`,
/// including hash-routed URLs where the query sits after `#`.
pub fn extract_authorization_code(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.contains("code=") {
        return Some(trimmed.to_string());
    }

    trimmed
        .split(['?', '&', '#'])
        .find_map(|pair| pair.strip_prefix("code="))
        .filter(|code| !code.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, extract_authorization_code};
    use crate::ledger::model::AuthProvider;
    use clap::Parser;

    #[test]
    fn code_is_extracted_from_hash_routed_redirect() {
        assert_eq!(
            extract_authorization_code(
                "http://localhost:5173/#/auth/kakao/callback?code=abc123&state=x"
            )
            .as_deref(),
            Some("abc123")
        );
        assert_eq!(extract_authorization_code(" raw-code ").as_deref(), Some("raw-code"));
        assert_eq!(extract_authorization_code("https://x.test/?code="), None);
        assert_eq!(extract_authorization_code("  "), None);
    }

    #[test]
    fn login_defaults_to_kakao() {
        let cli = Cli::parse_from(["TodaysChallenge", "login"]);
        assert!(matches!(
            cli.command,
            Commands::Login {
                provider: AuthProvider::Kakao,
                ..
            }
        ));

        let cli = Cli::parse_from(["TodaysChallenge", "birth-date", "set", "19900101"]);
        assert!(matches!(cli.command, Commands::BirthDate { .. }));
    }
}
