//! Run command - build if needed, then execute the script

use super::orchestrator;
use crate::build::BuildMode;
use crate::config::Config;
use crate::dispatch::{Dispatcher, Invocation};
use crate::error::ScriptistoResult;
use crate::ui::{BuildSpinner, UiContext};
use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

/// Execute the run command, returning the script's exit code
pub async fn execute(
    script: &Path,
    args: &[OsString],
    config: &Config,
    cache_root: &Path,
) -> ScriptistoResult<i32> {
    let ctx = UiContext::detect();
    let echo = config.build.show_output;

    let mut orchestrator = orchestrator(config, cache_root, BuildMode::Default, echo);
    let spinner = (!echo).then(|| BuildSpinner::new(&ctx, &script.display().to_string()));
    if let Some(spinner) = &spinner {
        orchestrator = orchestrator.with_observer(spinner.observer());
    }

    let prepared = orchestrator.prepare(script).await;
    if let Some(spinner) = &spinner {
        spinner.finish();
    }
    let prepared = prepared?;

    debug!(
        binary = %prepared.binary_path.display(),
        rebuilt = prepared.rebuilt,
        "Script ready"
    );

    let invocation = Invocation::for_script(&prepared, args);
    Dispatcher::new(config.run.on_cancel)
        .execute(&invocation)
        .await
}
