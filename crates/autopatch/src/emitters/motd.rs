//! Keeps a message-of-the-day file in sync with the last report.

use super::{EmitError, Emitter};
use async_trait::async_trait;
use autopatch_common::{Report, RunResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct MotdEmitter {
    path: PathBuf,
}

impl MotdEmitter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait]
impl Emitter for MotdEmitter {
    fn name(&self) -> &'static str {
        "motd"
    }

    async fn emit(&self, _result: &RunResult, report: &Report) -> Result<(), EmitError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{}\n", report.full_text())).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), EmitError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
