//! Configuration schema for Scriptisto
//!
//! Configuration is stored at `~/.config/scriptisto/config.toml`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache location and locking
    pub cache: CacheConfig,

    /// Setup/build subprocess settings
    pub build: BuildConfig,

    /// Artifact execution settings
    pub run: RunConfig,
}

/// Cache configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root directory (defaults to the platform cache dir)
    pub root: Option<PathBuf>,

    /// Seconds to wait for a concurrent build (0 = wait forever)
    pub lock_timeout_secs: u64,
}

impl CacheConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.lock_timeout_secs)
    }
}

/// What to do with materialized files when setup or build fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Leave everything in place for inspection
    #[default]
    Keep,
    /// Remove materialized sources and auxiliary files
    Clean,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::Clean => write!(f, "clean"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Self::Keep),
            "clean" => Ok(Self::Clean),
            other => Err(format!("'{other}' is not one of: keep, clean")),
        }
    }
}

/// Build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Shell used to run build_cmd and build_once_cmd
    pub shell: String,

    /// Per-command timeout in seconds (0 = none)
    pub timeout_secs: u64,

    /// Policy for materialized files after a failed build
    pub on_failure: FailurePolicy,

    /// Stream build output while running scripts
    pub show_output: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            timeout_secs: 0,
            on_failure: FailurePolicy::Keep,
            show_output: false,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Option<Duration> {
        non_zero_secs(self.timeout_secs)
    }
}

/// What happens to a running script when scriptisto is signalled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Forward the signal to the child and wait for it to exit
    #[default]
    Propagate,
    /// Leave the child running and exit immediately
    Orphan,
}

impl fmt::Display for CancelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Propagate => write!(f, "propagate"),
            Self::Orphan => write!(f, "orphan"),
        }
    }
}

impl FromStr for CancelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagate" => Ok(Self::Propagate),
            "orphan" => Ok(Self::Orphan),
            other => Err(format!("'{other}' is not one of: propagate, orphan")),
        }
    }
}

/// Run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub on_cancel: CancelPolicy,
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
