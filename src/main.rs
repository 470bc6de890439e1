mod api;
mod cache;
mod catalog;
mod cli;
mod config;
mod db;
mod identity;
mod ledger;
mod net;
mod provider;
mod report;
mod session;

use crate::api::ApiState;
use crate::catalog::content::ChallengeContent;
use crate::catalog::{CategoryKey, CategoryRegistry};
use crate::cli::display::{render_content, render_entry, resolve_quiz_answer};
use crate::cli::onboard::run_onboarding;
use crate::cli::{
    BirthDateCommands, Cli, Commands, ConfigCommands, ProviderCommands,
    extract_authorization_code,
};
use crate::config::Config;
use crate::db::{Database, SqliteRecordStore};
use crate::identity::kakao::KakaoIdentity;
use crate::identity::{IdentityProvider, sign_in};
use crate::ledger::model::{AuthProvider, AuthUser};
use crate::ledger::store::{MemoryRecordStore, RecordStore};
use crate::provider::gemini::{self, GeminiProvider};
use crate::session::{ContentOutcome, ContentRequest, Session};
use anyhow::{Context, Result, bail};
use chrono::Datelike;
use clap::Parser;
use dialoguer::Input;
use dialoguer::theme::ColorfulTheme;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            let _ = run_onboarding()?;
            Ok(())
        }
        Commands::Config { command } => handle_config_command(command),
        Commands::Status => handle_status(),
        Commands::Doctor => handle_doctor(),
        Commands::Serve { port, ephemeral } => handle_serve(port, ephemeral).await,
        Commands::Login {
            provider,
            code,
            id,
            name,
            email,
        } => handle_login(provider, code, id, name, email),
        Commands::Logout => handle_logout(),
        Commands::Whoami => handle_whoami(),
        Commands::BirthDate { command } => handle_birth_date(command),
        Commands::Challenge { category, answer } => handle_challenge(&category, answer),
        Commands::Complete {
            category,
            content_file,
        } => handle_complete(&category, content_file),
        Commands::Today => handle_today(),
        Commands::History { page } => handle_history(page),
        Commands::Calendar { month } => handle_calendar(month),
        Commands::Stats => handle_stats(),
        Commands::Export { dir } => handle_export(dir),
        Commands::Provider { command } => handle_provider_command(command),
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            let masked = if key.contains("api_key") || key.contains("secret") {
                "***hidden***".to_string()
            } else {
                value
            };
            println!("Config saved: {key} = {masked}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_or_default_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn handle_status() -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;

    println!("Today's Challenge status");
    println!("- today (KST): {}", session.today().format("%Y-%m-%d"));
    println!("- db_path: {}", config.db_path.display());
    println!(
        "- signed_in: {}",
        session
            .current_user()
            .map(|user| format!("{} ({}, {})", user.name, user.provider, user.id))
            .unwrap_or_else(|| "no".to_string())
    );

    if let Ok(data) = session.app_data() {
        println!(
            "- today_completed: {}",
            session
                .todays_completion()?
                .map(|entry| entry.category_name.clone())
                .unwrap_or_else(|| "not yet".to_string())
        );
        println!("- total_completions: {}", data.category_stats.total());
        println!(
            "- birth_date: {}",
            data.user_info.birth_date.as_deref().unwrap_or("not_set")
        );
    }

    Ok(())
}

fn handle_doctor() -> Result<()> {
    let config_path = Config::config_path()?;
    let mut issues = Vec::new();

    if config_path.exists() {
        println!("[OK] config.json found: {}", config_path.display());
    } else {
        println!("[WARN] config.json not found: {}", config_path.display());
        issues.push("config missing".to_string());
    }

    let config = load_or_default_config()?;

    match Database::open(&config.db_path) {
        Ok(_) => println!("[OK] SQLite reachable: {}", config.db_path.display()),
        Err(error) => {
            println!("[WARN] SQLite check failed: {error}");
            issues.push("db unreachable".to_string());
        }
    }

    match CategoryRegistry::load(&config.categories_path) {
        Ok(_) => println!(
            "[OK] categories file valid: {}",
            config.categories_path.display()
        ),
        Err(error) => {
            println!("[WARN] categories file invalid, built-in names will be used: {error:#}");
            issues.push("categories invalid".to_string());
        }
    }

    if config.export_dir.exists() {
        println!("[OK] export dir exists: {}", config.export_dir.display());
    } else {
        println!("[WARN] export dir missing: {}", config.export_dir.display());
        issues.push("export dir missing".to_string());
    }

    if gemini::has_api_key(&config) {
        println!("[OK] Gemini API key is configured");
    } else {
        println!("[WARN] Gemini API key is missing; challenges cannot be generated");
        issues.push("gemini api key missing".to_string());
    }

    if config.resolved_kakao_client_id().is_some() {
        println!("[OK] Kakao client id is configured");
    } else {
        println!("[WARN] Kakao client id is missing; only Google profiles can sign in");
        issues.push("kakao client id missing".to_string());
    }

    if issues.is_empty() {
        println!("doctor result: no issues");
    } else {
        println!("doctor result: {} warning(s)", issues.len());
    }

    Ok(())
}

async fn handle_serve(port: Option<u16>, ephemeral: bool) -> Result<()> {
    let mut config = load_or_default_config()?;
    if let Some(port) = port {
        config.api_port = port;
    }

    let store: Arc<dyn RecordStore> = if ephemeral {
        info!("ephemeral mode: records are kept in memory only");
        Arc::new(MemoryRecordStore::new())
    } else {
        Database::open(&config.db_path)?;
        Arc::new(SqliteRecordStore::new(&config.db_path))
    };

    let registry = Arc::new(load_registry(&config));
    let state = ApiState::from_config(Arc::new(config), store, registry);

    tokio::select! {
        api_result = api::run_server(state) => {
            api_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

fn handle_login(
    provider: AuthProvider,
    code: Option<String>,
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let config = load_or_default_config()?;

    let user = match provider {
        AuthProvider::Kakao => {
            let identity = KakaoIdentity::from_config(&config)?;
            let input = match code {
                Some(code) => code,
                None => {
                    println!("Open this URL and sign in with Kakao:");
                    println!("{}", identity.authorize_url()?);
                    Input::<String>::with_theme(&ColorfulTheme::default())
                        .with_prompt("Paste the redirect URL or the code")
                        .interact_text()
                        .context("Failed to read authorization code")?
                }
            };
            let code = extract_authorization_code(&input)
                .context("No authorization code found in the input")?;

            let (user, _token) = sign_in(&identity, &code)?;
            user
        }
        AuthProvider::Google => {
            let id = id
                .filter(|id| !id.trim().is_empty())
                .context("Google sign-in needs --id (the account subject id)")?;

            AuthUser {
                id,
                name: name.unwrap_or_else(|| "구글 사용자".to_string()),
                email: email.unwrap_or_default(),
                provider: AuthProvider::Google,
                profile_image: None,
            }
        }
    };

    let mut session = open_session(&config)?;
    let data = session.login(user)?;

    println!(
        "Signed in as {} ({} completions so far)",
        data.user_info.name.as_deref().unwrap_or("-"),
        data.category_stats.total()
    );
    Ok(())
}

fn handle_logout() -> Result<()> {
    let config = load_or_default_config()?;
    let mut session = open_session(&config)?;

    match session.logout() {
        Some(user) => println!("Signed out: {}", user.name),
        None => println!("Not signed in"),
    }
    Ok(())
}

fn handle_whoami() -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;
    let data = session.app_data()?;
    let info = &data.user_info;

    println!("- id: {}", info.id.as_deref().unwrap_or("-"));
    println!("- name: {}", info.name.as_deref().unwrap_or("-"));
    println!("- email: {}", info.email.as_deref().unwrap_or("-"));
    println!(
        "- provider: {}",
        info.provider
            .map(|provider| provider.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "- birth_date: {}",
        info.birth_date.as_deref().unwrap_or("not_set")
    );
    Ok(())
}

fn handle_birth_date(command: BirthDateCommands) -> Result<()> {
    let config = load_or_default_config()?;
    let mut session = open_session(&config)?;

    match command {
        BirthDateCommands::Set { value } => {
            if session.set_birth_date(&value)? {
                println!("Birth date saved: {value}");
            } else {
                println!("Birth date unchanged");
            }
        }
        BirthDateCommands::Clear => {
            if session.clear_birth_date()? {
                println!("Birth date cleared");
            } else {
                println!("No birth date was set");
            }
        }
    }
    Ok(())
}

fn handle_challenge(category: &str, answer: Option<String>) -> Result<()> {
    let config = load_or_default_config()?;
    let category = category.parse::<CategoryKey>()?;
    let mut session = open_session(&config)?;
    let provider = GeminiProvider::from_config(&config)?;

    let registry = load_registry(&config);
    println!(
        "{} · {}",
        registry.display_name(category),
        session.today().format("%Y-%m-%d")
    );

    let content = match session.load_content(&provider, category)? {
        ContentOutcome::Ready(content) => content,
        ContentOutcome::NeedsBirthDate => {
            println!("Fortune needs your birth date: TodaysChallenge birth-date set YYYYMMDD");
            return Ok(());
        }
    };

    println!("{}", render_content(&content));

    if let (ChallengeContent::Quiz(quiz), Some(answer)) = (&content, answer.as_deref()) {
        let choice = resolve_quiz_answer(quiz, answer);
        if quiz.is_correct(choice) {
            println!("\n정답입니다! {}", quiz.explanation);
        } else {
            println!("\n아쉽네요. 정답은 {} 입니다. {}", quiz.answer, quiz.explanation);
        }
    }

    Ok(())
}

fn handle_complete(category: &str, content_file: Option<PathBuf>) -> Result<()> {
    let config = load_or_default_config()?;
    let category = category.parse::<CategoryKey>()?;
    let mut session = open_session(&config)?;

    let content = match content_file {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read content file: {}", path.display()))?;
            ChallengeContent::decode_str(category, &raw)?
        }
        None => match session.request_content(category)? {
            ContentRequest::Ready(content) => content,
            ContentRequest::NeedsBirthDate => {
                bail!("Fortune needs a birth date: TodaysChallenge birth-date set YYYYMMDD")
            }
            ContentRequest::Fetch(_) => bail!(
                "No {category} content shown yet today: run `TodaysChallenge challenge {category}` first or pass --content-file"
            ),
        },
    };

    let replaced = session.todays_completion()?.map(|entry| entry.category_key);
    let entry = session.complete_challenge(category, content)?;

    match replaced {
        Some(previous) if previous != category => println!(
            "Today's challenge changed from {} to {}",
            previous, entry.category_name
        ),
        Some(_) => println!("Today's {} challenge updated", entry.category_name),
        None => println!("Challenge completed: {}", render_entry(&entry)),
    }
    Ok(())
}

fn handle_today() -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;

    match session.todays_completion()? {
        Some(entry) => {
            println!("Completed today: {}", entry.category_name);
            println!("{}", render_content(&entry.content));
        }
        None => println!(
            "No challenge completed yet today ({})",
            session.today().format("%Y-%m-%d")
        ),
    }
    Ok(())
}

fn handle_history(page: usize) -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;
    let data = session.app_data()?;

    let history = report::history_page(&data.activity_log, page);
    println!(
        "History page {}/{} ({} entries)",
        history.page, history.total_pages, history.total_entries
    );
    history
        .entries
        .iter()
        .for_each(|entry| println!("- {}", render_entry(entry)));

    Ok(())
}

fn handle_calendar(month: Option<String>) -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;
    let data = session.app_data()?;

    let (year, month) = match month {
        Some(raw) => report::parse_month(&raw)?,
        None => {
            let today = session.today();
            (today.year(), today.month())
        }
    };

    let calendar = report::month_calendar(&data.activity_log, year, month)?;
    println!("{}", report::render_calendar(&calendar));
    Ok(())
}

fn handle_stats() -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;
    let data = session.app_data()?;
    let registry = load_registry(&config);

    println!("Total completions: {}", data.category_stats.total());
    let ranking = report::ranked_stats(&data.category_stats, &registry);
    if ranking.is_empty() {
        println!("No completed challenges yet");
    }
    ranking.iter().for_each(|ranked| {
        println!("{}. {} - {}", ranked.rank, ranked.name, ranked.count);
    });

    Ok(())
}

fn handle_export(dir: Option<PathBuf>) -> Result<()> {
    let config = load_or_default_config()?;
    let session = open_session(&config)?;
    let data = session.app_data()?;
    let registry = load_registry(&config);

    let export_dir = dir.unwrap_or_else(|| config.export_dir.clone());
    let summary = report::build_summary(data, &registry, session.today());
    let saved = report::save_export_files(&summary, data, &export_dir)?;

    println!("MyPage exported: {}", summary.date);
    println!("- Markdown: {}", saved.markdown_path.display());
    println!("- JSON: {}", saved.json_path.display());
    Ok(())
}

fn handle_provider_command(command: ProviderCommands) -> Result<()> {
    match command {
        ProviderCommands::Test { key, model } => {
            let mut config = load_or_default_config()?;

            if let Some(value) = key {
                config.gemini_api_key = Some(value);
            }
            if let Some(value) = model {
                config.gemini_model = value;
            }

            let response = GeminiProvider::from_config(&config)?.test_connection()?;
            println!("Gemini API connection successful");
            println!("{response}");

            Ok(())
        }
    }
}

fn open_session(config: &Config) -> Result<Session> {
    Database::open(&config.db_path)?;

    let store = Arc::new(SqliteRecordStore::new(&config.db_path));
    let mut session = Session::open_durable(config, store, Arc::new(load_registry(config)));
    session.restore();

    Ok(session)
}

fn load_registry(config: &Config) -> CategoryRegistry {
    CategoryRegistry::load(&config.categories_path).unwrap_or_else(|error| {
        warn!(error = %error, "using built-in category names");
        CategoryRegistry::builtin()
    })
}

/// First run writes the default config; an unreadable config is an error.
fn load_or_default_config() -> Result<Config> {
    if Config::config_path()?.exists() {
        return Config::load();
    }

    let config = Config::default();
    config.ensure_bootstrap_files()?;
    config.save()?;
    Ok(config)
}
