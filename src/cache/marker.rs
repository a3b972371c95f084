//! Freshness marker persistence
//!
//! Each cache directory records the content hash it was built from in
//! `scriptisto.metadata`. The marker is written as `building` before any
//! file is materialized and flipped to `complete` only once the target
//! binary has been verified, so an interrupted or failed build is always
//! seen as stale.

use super::key::CacheDir;
use crate::error::{ScriptistoError, ScriptistoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// File name of the marker inside the cache directory
pub const MARKER_FILE: &str = "scriptisto.metadata";

const MARKER_VERSION: u32 = 1;

/// Lifecycle state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Materialize/setup/build in progress, or interrupted
    Building,
    /// Built and verified
    Complete,
    /// Last build failed
    Failed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// On-disk freshness record of one cache directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessMarker {
    pub version: u32,
    pub content_hash: String,
    pub state: EntryState,
    pub script_path: PathBuf,
    pub updated_at: DateTime<Utc>,
}

impl FreshnessMarker {
    pub fn new(content_hash: impl Into<String>, state: EntryState, script_path: &Path) -> Self {
        Self {
            version: MARKER_VERSION,
            content_hash: content_hash.into(),
            state,
            script_path: script_path.to_path_buf(),
            updated_at: Utc::now(),
        }
    }

    /// Marker path for a cache directory
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MARKER_FILE)
    }

    /// Load the marker of `dir`
    ///
    /// Returns `None` when it is absent or cannot be decoded; an unreadable
    /// marker simply means the entry cannot be trusted.
    pub async fn load(dir: &Path) -> ScriptistoResult<Option<Self>> {
        let path = Self::path(dir);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ScriptistoError::io(
                    format!("reading cache marker {}", path.display()),
                    e,
                ))
            }
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(marker) if marker.version == MARKER_VERSION => Ok(Some(marker)),
            Ok(marker) => {
                warn!(version = marker.version, path = %path.display(), "Unsupported cache marker version");
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Ignoring unreadable cache marker");
                Ok(None)
            }
        }
    }

    /// Persist the marker, replacing any previous one atomically
    pub async fn save(&self, dir: &Path) -> ScriptistoResult<()> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| ScriptistoError::io(format!("creating cache directory {}", dir.display()), e))?;

        let path = Self::path(dir);
        let tmp = dir.join(format!("{MARKER_FILE}.tmp"));
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content)
            .await
            .map_err(|e| ScriptistoError::io(format!("writing cache marker {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| ScriptistoError::io(format!("replacing cache marker {}", path.display()), e))?;

        debug!(cache_dir = %dir.display(), state = %self.state, "Cache marker written");
        Ok(())
    }
}

/// Outcome of comparing a cache directory against the current script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Marker complete, hash matches, binary present
    Fresh,
    /// No usable marker
    Missing,
    /// Marker left in `building` or `failed`
    Incomplete(EntryState),
    /// Built from a different version of the script
    Outdated,
    /// Marker is fine but the binary has disappeared
    ArtifactMissing,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Whether the directory must be wiped and SETUP re-run
    pub fn is_cold(&self) -> bool {
        matches!(self, Self::Missing | Self::Incomplete(_) | Self::Outdated)
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Missing => write!(f, "missing"),
            Self::Incomplete(state) => write!(f, "{state}"),
            Self::Outdated => write!(f, "outdated"),
            Self::ArtifactMissing => write!(f, "artifact missing"),
        }
    }
}

/// Compare the marker of `dir` against `content_hash` and look for `binary`
pub async fn check_freshness(
    dir: &CacheDir,
    content_hash: &str,
    binary: &Path,
) -> ScriptistoResult<Freshness> {
    let freshness = match FreshnessMarker::load(&dir.path).await? {
        None => Freshness::Missing,
        Some(marker) if marker.state != EntryState::Complete => Freshness::Incomplete(marker.state),
        Some(marker) if marker.content_hash != content_hash => Freshness::Outdated,
        Some(_) if !fs::try_exists(binary).await.unwrap_or(false) => Freshness::ArtifactMissing,
        Some(_) => Freshness::Fresh,
    };
    debug!(cache_dir = %dir.path.display(), %freshness, "Checked cache freshness");
    Ok(freshness)
}

/// Whether the entry's marker disagrees with `content_hash`
///
/// Only the marker is consulted; see [`check_freshness`] for the variant
/// that also verifies the built artifact.
pub async fn is_stale(dir: &CacheDir, content_hash: &str) -> bool {
    match FreshnessMarker::load(&dir.path).await {
        Ok(Some(marker)) => {
            marker.state != EntryState::Complete || marker.content_hash != content_hash
        }
        _ => true,
    }
}
