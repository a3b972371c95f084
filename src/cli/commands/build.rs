//! Build command - build a script without running it

use super::orchestrator;
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::ScriptistoResult;
use crate::ui::{self, UiContext};
use std::path::Path;

/// Execute the build command
///
/// SETUP/BUILD output is streamed to stderr as it arrives.
pub async fn execute(args: BuildArgs, config: &Config, cache_root: &Path) -> ScriptistoResult<()> {
    let ctx = UiContext::detect();
    let prepared = orchestrator(config, cache_root, args.mode(), true)
        .prepare(&args.script)
        .await?;

    if prepared.rebuilt {
        ui::step_ok(
            &ctx,
            &format!("Built {}", prepared.binary_path.display()),
        );
    } else {
        ui::step_info(
            &ctx,
            &format!("Up to date: {}", prepared.binary_path.display()),
        );
    }
    Ok(())
}
