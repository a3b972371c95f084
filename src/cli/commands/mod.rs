//! CLI command implementations

pub mod build;
pub mod cache;
pub mod completions;
pub mod config;
pub mod run;

pub use build::execute as build;
pub use cache::execute as cache;
pub use completions::execute as completions;
pub use config::execute as config;
pub use run::execute as run;

use crate::build::{BuildMode, BuildOptions, Orchestrator, ShellRunner};
use crate::cache::CacheResolver;
use crate::config::Config;
use std::path::Path;

/// Orchestrator wired to the configured shell and cache root
pub(crate) fn orchestrator(
    config: &Config,
    cache_root: &Path,
    mode: BuildMode,
    echo_output: bool,
) -> Orchestrator {
    let options = BuildOptions {
        mode,
        echo_output,
        ..BuildOptions::from_config(config)
    };
    Orchestrator::new(
        CacheResolver::new(cache_root),
        Box::new(ShellRunner::new(config.build.shell.clone())),
        options,
    )
}
