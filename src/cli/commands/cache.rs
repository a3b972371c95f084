//! Cache command - inspect or clean a script's build cache

use super::orchestrator;
use crate::build::BuildMode;
use crate::cache::{
    absolute_script_path, dir_size, format_bytes, CacheLock, CacheResolver, EntryState,
    FreshnessMarker,
};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::{ScriptistoError, ScriptistoResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config, cache_root: &Path) -> ScriptistoResult<()> {
    match args.action {
        CacheAction::Info { script } => show_info(&script, config, cache_root).await,
        CacheAction::Get { name, script } => get_item(&name, &script, config, cache_root).await,
        CacheAction::Clean { script } => clean(&script, config, cache_root).await,
    }
}

/// Named facts about a script's cache entry, in display order
async fn collect_items(
    script: &Path,
    config: &Config,
    cache_root: &Path,
) -> ScriptistoResult<Vec<(&'static str, String)>> {
    let (prepared, freshness) = orchestrator(config, cache_root, BuildMode::Default, false)
        .status(script)
        .await?;

    let marker = FreshnessMarker::load(&prepared.cache_dir.path).await?;
    let built_at = match &marker {
        Some(m) if m.state == EntryState::Complete => m.updated_at.to_rfc3339(),
        _ => "never".to_string(),
    };

    Ok(vec![
        ("cache_path", prepared.cache_dir.path.display().to_string()),
        ("content_hash", prepared.content_hash),
        ("state", freshness.to_string()),
        ("built_at", built_at),
        ("binary_path", prepared.binary_path.display().to_string()),
        ("dir_size", format_bytes(dir_size(&prepared.cache_dir.path))),
    ])
}

async fn show_info(script: &Path, config: &Config, cache_root: &Path) -> ScriptistoResult<()> {
    let ctx = UiContext::detect();
    for (name, value) in collect_items(script, config, cache_root).await? {
        ui::key_value(&ctx, name, &value);
    }
    Ok(())
}

async fn get_item(
    name: &str,
    script: &Path,
    config: &Config,
    cache_root: &Path,
) -> ScriptistoResult<()> {
    let items = collect_items(script, config, cache_root).await?;
    match items.iter().find(|(item, _)| *item == name) {
        Some((_, value)) => {
            println!("{}", value);
            Ok(())
        }
        None => Err(ScriptistoError::CacheItemNotFound {
            name: name.to_string(),
            available: items.iter().map(|(item, _)| item.to_string()).collect(),
        }),
    }
}

/// Remove the cache directory under the build lock
///
/// Works from the script path alone, so a script whose manifest no longer
/// parses can still be cleaned.
async fn clean(script: &Path, config: &Config, cache_root: &Path) -> ScriptistoResult<()> {
    let ctx = UiContext::detect();
    let script_path = absolute_script_path(script)?;
    let cache_dir = CacheResolver::new(cache_root).resolve(&script_path);

    let _lock = CacheLock::acquire(cache_dir.lock_path(), config.cache.lock_timeout()).await?;
    if !fs::try_exists(&cache_dir.path).await.unwrap_or(false) {
        ui::step_info(&ctx, "Nothing to clean");
        return Ok(());
    }

    debug!(cache_dir = %cache_dir.path.display(), "Removing cache directory");
    fs::remove_dir_all(&cache_dir.path).await.map_err(|e| {
        ScriptistoError::io(format!("removing {}", cache_dir.path.display()), e)
    })?;
    ui::step_ok(&ctx, &format!("Removed {}", cache_dir.path.display()));
    Ok(())
}
