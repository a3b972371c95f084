//! CLI argument definitions using clap derive

use crate::build::BuildMode;
use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use std::ffi::OsString;
use std::path::PathBuf;

/// Scriptisto - shebang interpreter for compiled languages
///
/// Put `#!/usr/bin/env scriptisto` on the first line of a script that
/// carries a scriptisto-begin/scriptisto-end build block. The script is
/// built on first use, cached, and rebuilt only when it changes.
#[derive(Parser, Debug)]
#[command(name = "scriptisto")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Script to run followed by its arguments (shebang form)
    ///
    /// The script path must start with '.' or '/' if it could be mistaken
    /// for a subcommand name.
    #[arg(value_name = "SCRIPT", trailing_var_arg = true)]
    pub script: Vec<OsString>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SCRIPTISTO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, global = true, env = "CACHE_ROOT")]
    pub cache_root: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the script if needed, then run it
    Run(RunArgs),

    /// Build a script without running it
    Build(BuildArgs),

    /// Inspect or clean a script's build cache
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Print a shell completion script
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the script
    pub script: PathBuf,

    /// Arguments passed to the script (put them after `--` if they start with '-')
    #[arg(trailing_var_arg = true)]
    pub args: Vec<OsString>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Path to the script
    pub script: PathBuf,

    /// Rebuild even if the cache is fresh, including build_once_cmd
    #[arg(short, long, conflicts_with = "build_mode")]
    pub force: bool,

    /// default: build only if stale; source: always rebuild; full: also rerun build_once_cmd
    #[arg(short, long, value_enum)]
    pub build_mode: Option<BuildMode>,
}

impl BuildArgs {
    pub fn mode(&self) -> BuildMode {
        if self.force {
            BuildMode::Full
        } else {
            self.build_mode.unwrap_or_default()
        }
    }
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show information about the script's cache directory
    Info {
        /// Path to the script
        script: PathBuf,
    },

    /// Print a single item from `info` by name, e.g. cache_path
    Get {
        /// Item name
        name: String,
        /// Path to the script
        script: PathBuf,
    },

    /// Remove the script's cache directory
    #[command(visible_alias = "clear")]
    Clean {
        /// Path to the script
        script: PathBuf,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.timeout_secs)
        key: String,
        /// Value to set
        value: String,
    },
}
