//! Persistent per-script build cache
//!
//! Every script owns one directory under `<root>/bin`, named after the
//! script's absolute path. The directory holds the materialized source,
//! auxiliary files, build output and a freshness marker.
//!
//! # Cache States
//!
//! | State | Next build | Description |
//! |-------|------------|-------------|
//! | Missing | wipe + setup + build | No marker (first build or crash before marker) |
//! | Building | wipe + setup + build | Interrupted mid-build |
//! | Failed | wipe + setup + build | Last setup/build failed |
//! | Outdated | wipe + setup + build | Script content changed |
//! | ArtifactMissing | build | Binary removed behind our back |
//! | Fresh | none | Ready to run |

pub mod key;
pub mod lock;
pub mod marker;

pub use key::{absolute_script_path, content_hash, content_hash_with_extras, CacheDir, CacheResolver};
pub use lock::CacheLock;
pub use marker::{check_freshness, is_stale, EntryState, Freshness, FreshnessMarker, MARKER_FILE};

use std::path::Path;
use walkdir::WalkDir;

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Total size of regular files below `dir`; unreadable entries are skipped
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("a"), [0u8; 10]).unwrap();
        std::fs::write(temp.path().join("sub/b"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(temp.path()), 15);
        assert_eq!(dir_size(&temp.path().join("absent")), 0);
    }
}
