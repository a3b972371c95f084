//! Scoped exclusive lock over one cache directory
//!
//! The lock is an advisory `flock` on a file under `<root>/locks`, held from
//! MATERIALIZE through BUILD. Dropping the guard releases it, on every exit
//! path including errors and panics.

use crate::error::{ScriptistoError, ScriptistoResult};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held exclusive lock; released when dropped
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Acquire the lock at `path`, waiting for other holders
    ///
    /// With `timeout` of `None` the wait is unbounded; otherwise the wait
    /// ends in [`ScriptistoError::LockTimeout`].
    pub async fn acquire(path: &Path, timeout: Option<Duration>) -> ScriptistoResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ScriptistoError::io(format!("creating lock directory {}", parent.display()), e)
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| ScriptistoError::io(format!("opening lock file {}", path.display()), e))?;

        let started = Instant::now();
        let mut announced = false;
        loop {
            let locked = try_flock_exclusive(&file)
                .map_err(|e| ScriptistoError::io(format!("locking {}", path.display()), e))?;
            if locked {
                debug!(lock = %path.display(), waited_ms = started.elapsed().as_millis() as u64, "Cache lock acquired");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if !announced {
                info!(lock = %path.display(), "Waiting for another build of this script to finish");
                announced = true;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(ScriptistoError::LockTimeout {
                        path: path.to_path_buf(),
                        timeout: limit,
                    });
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        unlock(&self.file);
        debug!(lock = %self.path.display(), "Cache lock released");
    }
}

/// Try to take a non-blocking exclusive flock
///
/// Returns `Ok(false)` when another descriptor holds the lock.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

fn unlock(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fd is a valid descriptor owned by `file`; closing it would
        // release the lock as well, this just makes release immediate.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
    }
}
