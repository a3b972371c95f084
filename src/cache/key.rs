//! Cache keys and directory resolution
//!
//! The cache directory is named after the script's absolute path, never its
//! hash: a new version of a script lands in the same directory, where the
//! stored marker exposes it as stale.

use crate::error::{ScriptistoError, ScriptistoResult};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Name of the subdirectory holding per-script cache directories
const BIN_DIR: &str = "bin";
/// Name of the subdirectory holding lock files
const LOCKS_DIR: &str = "locks";

/// Canonical absolute path of a script
pub fn absolute_script_path(script: &Path) -> ScriptistoResult<PathBuf> {
    script.canonicalize().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScriptistoError::ScriptNotFound(script.to_path_buf())
        } else {
            ScriptistoError::io(format!("resolving script path {}", script.display()), e)
        }
    })
}

/// SHA256 of the script bytes, hex encoded
pub fn content_hash(script: &[u8]) -> String {
    hex::encode(Sha256::digest(script))
}

/// SHA256 of the script bytes followed by every file under `extra_paths`
///
/// Relative extra paths are taken from `script_dir`. Directory contents are
/// walked in sorted order, and each file contributes its path relative to
/// the extra root followed by its bytes. A missing extra path contributes a
/// fixed marker so it shows up as a change once created.
pub fn content_hash_with_extras(
    script: &[u8],
    script_dir: &Path,
    extra_paths: &[String],
) -> ScriptistoResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(script);

    for extra in extra_paths {
        let root = script_dir.join(extra);
        hasher.update(extra.as_bytes());
        if !root.exists() {
            warn!(path = %root.display(), "Extra source path does not exist");
            hasher.update(b"\0<missing>\0");
            continue;
        }

        debug!(path = %root.display(), "Hashing extra source path");
        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let context = format!("walking extra source path {}", root.display());
                match e.into_io_error() {
                    Some(io) => ScriptistoError::io(context, io),
                    None => ScriptistoError::User(format!("{context}: filesystem loop")),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let bytes = std::fs::read(entry.path()).map_err(|e| {
                ScriptistoError::io(format!("reading {}", entry.path().display()), e)
            })?;
            hasher.update(b"\0");
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(&bytes);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Per-script cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDir {
    /// Directory holding the materialized sources and build output
    pub path: PathBuf,
    /// Absolute path of the script this directory belongs to
    pub script_path: PathBuf,
    lock_path: PathBuf,
}

impl CacheDir {
    /// Lock file guarding this directory; lives outside it so wiping is safe
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Directory containing the script itself
    pub fn script_dir(&self) -> &Path {
        self.script_path.parent().unwrap_or_else(|| Path::new("/"))
    }
}

/// Maps script paths onto cache directories under a root
#[derive(Debug, Clone)]
pub struct CacheResolver {
    root: PathBuf,
}

impl CacheResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the cache directory for an absolute script path
    ///
    /// Pure function of the path: the same script always yields the same
    /// directory.
    pub fn resolve(&self, script_path: &Path) -> CacheDir {
        let mut path = self.root.join(BIN_DIR);
        for component in script_path.components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }

        let digest = hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()));
        let lock_path = self
            .root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", &digest[..16]));

        CacheDir {
            path,
            script_path: script_path.to_path_buf(),
            lock_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_is_deterministic() {
        let resolver = CacheResolver::new("/cache");
        let a = resolver.resolve(Path::new("/home/user/scripts/tool.rs"));
        let b = resolver.resolve(Path::new("/home/user/scripts/tool.rs"));
        assert_eq!(a, b);
        assert_eq!(a.path, PathBuf::from("/cache/bin/home/user/scripts/tool.rs"));
        assert!(a.lock_path().starts_with("/cache/locks"));
    }

    #[test]
    fn resolve_distinguishes_scripts() {
        let resolver = CacheResolver::new("/cache");
        let a = resolver.resolve(Path::new("/a/tool.rs"));
        let b = resolver.resolve(Path::new("/b/tool.rs"));
        assert_ne!(a.path, b.path);
        assert_ne!(a.lock_path(), b.lock_path());
    }

    #[test]
    fn hash_changes_with_any_byte() {
        let a = content_hash(b"// scriptisto-begin\nfoo");
        let b = content_hash(b"// scriptisto-begin\nfoO");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, content_hash(b"// scriptisto-begin\nfoo"));
    }

    #[test]
    fn extras_fold_into_hash() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("lib")).unwrap();
        std::fs::write(temp.path().join("lib/a.txt"), "one").unwrap();

        let plain = content_hash_with_extras(b"src", temp.path(), &[]).unwrap();
        assert_eq!(plain, content_hash(b"src"));

        let extras = vec!["lib".to_string()];
        let first = content_hash_with_extras(b"src", temp.path(), &extras).unwrap();
        std::fs::write(temp.path().join("lib/a.txt"), "two").unwrap();
        let second = content_hash_with_extras(b"src", temp.path(), &extras).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn missing_extra_is_hashed_not_fatal() {
        let temp = TempDir::new().unwrap();
        let extras = vec!["absent".to_string()];
        let before = content_hash_with_extras(b"src", temp.path(), &extras).unwrap();
        std::fs::write(temp.path().join("absent"), "now here").unwrap();
        let after = content_hash_with_extras(b"src", temp.path(), &extras).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn missing_script_is_not_found() {
        let err = absolute_script_path(Path::new("/definitely/not/here.rs")).unwrap_err();
        assert!(matches!(err, ScriptistoError::ScriptNotFound(_)));
    }
}
