//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{CairnError, CairnResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "remote.backend",
    "remote.store_dir",
    "remote.client_id",
    "sync.hash_workers",
    "join.blocking_timeout_secs",
    "join.request_timeout_secs",
    "join.max_attempts",
    "join.retry_base_delay_ms",
    "join.retry_max_delay_ms",
    "image.python_version",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> CairnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> CairnResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> CairnResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        return Err(CairnError::User(format!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

async fn set_value(manager: &ConfigManager, config: &Config, key: &str, value: &str) -> CairnResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();
    apply(&mut config, key, value)?;

    config.validate().map_err(|reason| CairnError::ConfigInvalid {
        path: manager.path().to_path_buf(),
        reason,
    })?;

    manager.save(&config).await?;
    ui::step_ok_detail(&ctx, &format!("Set {} = {}", key, value), &manager.path().display().to_string());
    Ok(())
}

/// Apply one dot-separated key to a config
fn apply(config: &mut Config, key: &str, value: &str) -> CairnResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = value.to_string(),

        ["remote", "backend"] => config.remote.backend = value.to_string(),
        ["remote", "store_dir"] => config.remote.store_dir = optional(value).map(PathBuf::from),
        ["remote", "client_id"] => config.remote.client_id = optional(value).map(str::to_string),

        ["sync", "hash_workers"] => {
            config.sync.hash_workers = optional(value).map(parse_number::<usize>).transpose()?
        }

        ["join", "blocking_timeout_secs"] => config.join.blocking_timeout_secs = parse_number(value)?,
        ["join", "request_timeout_secs"] => config.join.request_timeout_secs = parse_number(value)?,
        ["join", "max_attempts"] => config.join.max_attempts = parse_number(value)?,
        ["join", "retry_base_delay_ms"] => config.join.retry_base_delay_ms = parse_number(value)?,
        ["join", "retry_max_delay_ms"] => config.join.retry_max_delay_ms = parse_number(value)?,

        ["image", "python_version"] => config.image.python_version = value.to_string(),

        _ => {
            return Err(CairnError::User(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

/// Empty string clears an optional setting
fn optional(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_number<T: std::str::FromStr>(value: &str) -> CairnResult<T> {
    value
        .parse()
        .map_err(|_| CairnError::User(format!("Invalid number: {}", value)))
}
