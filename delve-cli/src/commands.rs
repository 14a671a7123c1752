//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use delve_core::{DelveConfig, HttpBackend, ResearchBackend, SessionSummary};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: &DelveConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Sessions { json } => handle_sessions(config, json).await,
        Commands::Quota => handle_quota(config).await,
        Commands::Config { action } => handle_config(action, config, workspace),
    }
}

async fn handle_sessions(config: &DelveConfig, json: bool) -> anyhow::Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let sessions = backend.list_sessions().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions yet. Run `delve` to start one.");
        return Ok(());
    }
    println!("Sessions ({}):", sessions.len());
    for session in &sessions {
        println!("  {}", session_line(session));
    }
    Ok(())
}

pub(crate) fn session_line(session: &SessionSummary) -> String {
    let status = if session.has_error {
        "errored"
    } else if session.is_completed {
        "completed"
    } else {
        "open"
    };
    let created = session
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<12} {:<10} {:<16} {}",
        session.id.as_str(),
        status,
        created,
        session.title
    )
}

async fn handle_quota(config: &DelveConfig) -> anyhow::Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let quota = backend.session_quota().await?;
    println!(
        "Sessions today: {} of {} ({} remaining){}",
        quota.today_count,
        quota.max_sessions,
        quota.remaining(),
        if quota.is_premium { " [premium]" } else { "" }
    );
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    config: &DelveConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".delve");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&DelveConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
        ConfigAction::Validate => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
                return Ok(());
            }
            for problem in &problems {
                println!("  - {}", problem);
            }
            anyhow::bail!("{} configuration problem(s) found", problems.len())
        }
    }
}
