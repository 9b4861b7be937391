//! Process lock - only one run per host.
//!
//! Uses a non-blocking exclusive `flock` on a lock file, so acquisition is
//! atomic across processes and the kernel drops the lock if the holder
//! dies. The file also records who holds it, for diagnostics only.

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use thiserror::Error;
use tracing::debug;

/// Lock file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub host: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            pid: process::id(),
            host,
            acquired_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another run is in progress{}", holder_suffix(.holder))]
    AlreadyRunning { holder: Option<LockHolder> },

    #[error("Lock IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn holder_suffix(holder: &Option<LockHolder>) -> String {
    match holder {
        Some(h) => format!(" (pid {} on {} since {})", h.pid, h.host, h.acquired_at.to_rfc3339()),
        None => String::new(),
    }
}

/// Lock file location
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempt to take the lock without waiting
    pub fn acquire(&self) -> Result<LockHandle, LockError> {
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(io_err)?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(LockError::AlreadyRunning {
                    holder: read_holder(&self.path),
                });
            }
            Err((_, errno)) => return Err(io_err(io::Error::from(errno))),
        };

        let holder = LockHolder::current();
        write_holder(&mut lock, &holder).map_err(io_err)?;
        debug!("Lock acquired at {} (pid {})", self.path.display(), holder.pid);

        Ok(LockHandle {
            path: self.path.clone(),
            _lock: lock,
        })
    }
}

fn write_holder(file: &mut File, holder: &LockHolder) -> io::Result<()> {
    let content = serde_json::to_string(holder)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Exclusive ownership of the run; the lock is released on drop
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    _lock: Flock<File>,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicit release, same as dropping the handle
    pub fn release(self) {
        debug!("Lock released at {}", self.path.display());
    }
}
