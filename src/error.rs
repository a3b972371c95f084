//! Error types for Scriptisto
//!
//! All modules use `ScriptistoResult<T>` as their return type. Every variant
//! maps onto one of the process exit codes via [`ScriptistoError::exit_code`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Scriptisto operations
pub type ScriptistoResult<T> = Result<T, ScriptistoError>;

/// Exit code for manifest and script input errors
pub const EXIT_MANIFEST: u8 = 1;
/// Exit code for setup/build failures
pub const EXIT_BUILD: u8 = 2;
/// Exit code for execution and runtime errors
pub const EXIT_RUNTIME: u8 = 3;

/// All errors that can occur in Scriptisto
#[derive(Error, Debug)]
pub enum ScriptistoError {
    // Input errors
    #[error("Script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("No scriptisto-begin/scriptisto-end block found in script")]
    ManifestNotFound,

    #[error("Malformed manifest block (line {line}): {reason}")]
    ManifestMalformed { line: usize, reason: String },

    #[error("Manifest is missing required field '{0}'")]
    ManifestMissingField(String),

    #[error("Invalid manifest field '{field}': {reason}")]
    ManifestInvalid { field: String, reason: String },

    // Build errors
    #[error("Setup command failed: {command}, exit code: {code}")]
    SetupFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Build command failed: {command}, exit code: {code}")]
    BuildFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Build finished but target binary is missing: {0}")]
    BuildArtifactMissing(PathBuf),

    #[error("Command timed out after {}s: {command}", .timeout.as_secs())]
    BuildTimeout { command: String, timeout: Duration },

    // Contention
    #[error("Timed out after {}s waiting for cache lock {path}", .timeout.as_secs())]
    LockTimeout { path: PathBuf, timeout: Duration },

    // Execution errors
    #[error("Cannot execute {program}: {source}")]
    ExecutionFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Cache inspection
    #[error("'{name}' is not found. Available items: {}", .available.join(", "))]
    CacheItemNotFound {
        name: String,
        available: Vec<String>,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl ScriptistoError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid-field error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed-block error
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::ManifestMalformed {
            line,
            reason: reason.into(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ScriptNotFound(_)
            | Self::ManifestNotFound
            | Self::ManifestMalformed { .. }
            | Self::ManifestMissingField(_)
            | Self::ManifestInvalid { .. } => EXIT_MANIFEST,
            Self::SetupFailed { .. }
            | Self::BuildFailed { .. }
            | Self::BuildArtifactMissing(_)
            | Self::BuildTimeout { .. } => EXIT_BUILD,
            _ => EXIT_RUNTIME,
        }
    }

    /// Captured subprocess output, for build-time failures
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::SetupFailed { output, .. } | Self::BuildFailed { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }

    /// Check if error is retryable without editing the script
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BuildTimeout { .. } | Self::LockTimeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ManifestNotFound => Some(
                "Add a '// scriptisto-begin' ... '// scriptisto-end' block to the script's leading comments",
            ),
            Self::ManifestMissingField(_) => {
                Some("Required keys: script_src, build_cmd, target_bin")
            }
            Self::BuildArtifactMissing(_) => {
                Some("Check that target_bin matches what build_cmd produces")
            }
            Self::LockTimeout { .. } => {
                Some("Another invocation is building this script; retry or raise cache.lock_timeout_secs")
            }
            Self::ExecutionFailed { .. } => {
                Some("Check that the target binary is executable or set target_interpreter")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ScriptistoError::ManifestMissingField("target_bin".to_string());
        assert!(err.to_string().contains("target_bin"));
    }

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(ScriptistoError::ManifestNotFound.exit_code(), 1);
        assert_eq!(ScriptistoError::invalid("files", "bad").exit_code(), 1);
        assert_eq!(
            ScriptistoError::BuildFailed {
                command: "exit 1".into(),
                code: 1,
                output: String::new(),
            }
            .exit_code(),
            2
        );
        assert_eq!(
            ScriptistoError::BuildArtifactMissing(PathBuf::from("./bin")).exit_code(),
            2
        );
        assert_eq!(
            ScriptistoError::ExecutionFailed {
                program: "./bin".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn error_hint() {
        let err = ScriptistoError::ManifestMissingField("build_cmd".into());
        assert!(err.hint().unwrap().contains("build_cmd"));
    }

    #[test]
    fn error_retryable() {
        assert!(ScriptistoError::LockTimeout {
            path: PathBuf::from("/tmp/x.lock"),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!ScriptistoError::ManifestNotFound.is_retryable());
    }

    #[test]
    fn captured_output_only_for_build_failures() {
        let err = ScriptistoError::SetupFailed {
            command: "pip install".into(),
            code: 1,
            output: "no network".into(),
        };
        assert_eq!(err.captured_output(), Some("no network"));
        assert!(ScriptistoError::ManifestNotFound.captured_output().is_none());
    }
}
