//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{ScriptistoError, ScriptistoResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: &[&str] = &[
    "cache.root",
    "cache.lock_timeout_secs",
    "build.shell",
    "build.timeout_secs",
    "build.on_failure",
    "build.show_output",
    "run.on_cancel",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    manager: &ConfigManager,
    config: &Config,
) -> ScriptistoResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> ScriptistoResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> ScriptistoResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn(
            &ctx,
            &format!(
                "Config already exists at {} (use --force to overwrite)",
                path.display()
            ),
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok(
        &ctx,
        &format!("Configuration initialized at {}", path.display()),
    );

    Ok(())
}

/// Apply a dotted `key = value` to a copy of `config`
fn apply(config: &Config, key: &str, value: &str) -> ScriptistoResult<Config> {
    let mut config = config.clone();
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["cache", "root"] => {
            config.cache.root = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        ["cache", "lock_timeout_secs"] => config.cache.lock_timeout_secs = parse_u64(value)?,

        ["build", "shell"] => {
            if value.trim().is_empty() {
                return Err(ScriptistoError::User("build.shell must not be empty".into()));
            }
            config.build.shell = value.to_string();
        }
        ["build", "timeout_secs"] => config.build.timeout_secs = parse_u64(value)?,
        ["build", "on_failure"] => {
            config.build.on_failure = value.parse().map_err(ScriptistoError::User)?
        }
        ["build", "show_output"] => config.build.show_output = parse_bool(value)?,

        ["run", "on_cancel"] => {
            config.run.on_cancel = value.parse().map_err(ScriptistoError::User)?
        }

        _ => {
            return Err(ScriptistoError::User(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(config)
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> ScriptistoResult<()> {
    let ctx = UiContext::detect();
    let updated = apply(config, key, value)?;

    manager.save(&updated).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

fn parse_bool(value: &str) -> ScriptistoResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ScriptistoError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_u64(value: &str) -> ScriptistoResult<u64> {
    value
        .parse()
        .map_err(|_| ScriptistoError::User(format!("Invalid number: {}", value)))
}
