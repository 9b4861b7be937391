//! Timestamp store - when the last run completed its check phase.
//!
//! State file: /var/lib/autopatch/last_run.json

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const MARKER_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// On-disk last-run marker
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LastRunMarker {
    last_run: DateTime<Utc>,
    version: u32,
}

#[derive(Debug, Clone)]
pub struct TimestampStore {
    path: PathBuf,
}

impl TimestampStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable markers mean "never ran"
    pub fn read_last_run(&self) -> Option<DateTime<Utc>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<LastRunMarker>(&content) {
            Ok(marker) => Some(marker.last_run),
            Err(e) => {
                warn!("Ignoring corrupt marker {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Atomic write via temp file + rename
    pub fn write_last_run(&self, at: DateTime<Utc>) -> Result<(), StateError> {
        self.write_marker(at).map_err(|source| StateError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn write_marker(&self, at: DateTime<Utc>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let marker = LastRunMarker {
            last_run: at,
            version: MARKER_VERSION,
        };
        let content = serde_json::to_string_pretty(&marker)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }
}

/// Whether enough time passed since `last` to run again
pub fn is_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    let Some(last) = last else {
        return true;
    };
    if interval.is_zero() {
        return true;
    }
    // Marker from the future: clock went backwards, don't block forever
    if last > now {
        return true;
    }
    match (now - last).to_std() {
        Ok(elapsed) => elapsed >= interval,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_marker_reads_none() {
        let temp = TempDir::new().unwrap();
        let store = TimestampStore::new(temp.path().join("last_run.json"));
        assert!(store.read_last_run().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let store = TimestampStore::new(temp.path().join("state/last_run.json"));
        let now = Utc::now();
        store.write_last_run(now).unwrap();
        assert_eq!(store.read_last_run(), Some(now));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_marker_reads_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("last_run.json");
        fs::write(&path, "{not json").unwrap();
        assert!(TimestampStore::new(&path).read_last_run().is_none());
    }

    #[test]
    fn test_write_into_unwritable_location_fails() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // Parent is a regular file, so create_dir_all fails
        let store = TimestampStore::new(blocker.join("last_run.json"));
        assert!(store.write_last_run(Utc::now()).is_err());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let hour = Duration::from_secs(3600);

        assert!(is_due(None, now, hour));
        assert!(!is_due(Some(now - ChronoDuration::minutes(10)), now, hour));
        assert!(is_due(Some(now - ChronoDuration::minutes(61)), now, hour));
        assert!(is_due(Some(now - ChronoDuration::minutes(10)), now, Duration::ZERO));
        assert!(is_due(Some(now + ChronoDuration::hours(5)), now, hour));
    }
}
