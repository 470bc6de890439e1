use crate::config::{Config, default_export_dir, expand_home};
use crate::db::Database;
use anyhow::{Context, Result};
use dialoguer::{Confirm, Input, Password, theme::ColorfulTheme};

pub fn run_onboarding() -> Result<Config> {
    println!("──────────────────────────────────────────");
    println!("  Welcome to Today's Challenge onboarding.");
    println!("──────────────────────────────────────────");

    let theme = ColorfulTheme::default();
    let existing = Config::load_or_default()?;

    println!("\n[1/4] Gemini API key");
    println!("  Used to generate the daily fortune, economics, stretching, quiz and phrase content.");
    let gemini_api_key: String = Password::with_theme(&theme)
        .with_prompt("  Gemini API key (leave empty to skip)")
        .allow_empty_password(true)
        .interact()
        .context("Failed to read Gemini API key")?;

    let generate_images = Confirm::with_theme(&theme)
        .with_prompt("  Generate stretching step images?")
        .default(existing.gemini_images_enabled)
        .interact()
        .context("Failed to read image generation input")?;

    println!("\n[2/4] Kakao login");
    let kakao_client_id: String = Input::with_theme(&theme)
        .with_prompt("  Kakao REST API key (leave empty to skip)")
        .default(existing.kakao_client_id.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()
        .context("Failed to read Kakao client id")?;

    println!("\n[3/4] API port");
    let api_port: u16 = Input::with_theme(&theme)
        .with_prompt("  Local API port")
        .default(existing.api_port)
        .interact_text()
        .context("Failed to read API port")?;

    println!("\n[4/4] Export directory");
    let export_dir_input: String = Input::with_theme(&theme)
        .with_prompt("  Folder where MyPage exports will be saved")
        .default(default_export_dir().display().to_string())
        .interact_text()
        .context("Failed to read export directory")?;
    let export_dir = expand_home(&export_dir_input);
    println!("  ✓ {}", export_dir.display());

    let gemini_api_key = if gemini_api_key.trim().is_empty() {
        existing.gemini_api_key.clone()
    } else {
        Some(gemini_api_key.trim().to_string())
    };

    let config = Config {
        gemini_api_key,
        gemini_images_enabled: generate_images,
        kakao_client_id: (!kakao_client_id.trim().is_empty())
            .then(|| kakao_client_id.trim().to_string()),
        api_port,
        export_dir,
        ..existing
    };

    config.ensure_bootstrap_files()?;
    config.save()?;
    Database::open(&config.db_path)?;

    println!("\n──────────────────────────────────────────");
    println!("  Onboarding complete!");
    println!("  Run `TodaysChallenge login` to sign in,");
    println!("  then `TodaysChallenge challenge quiz` to start.");
    println!("──────────────────────────────────────────");

    Ok(config)
}
