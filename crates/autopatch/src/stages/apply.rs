//! Transaction Apply Stage - one atomic transaction for the verified set.

use crate::backend::{PackageBackend, TransactionError};
use autopatch_common::{DownloadedArtifact, UpdateCandidate};
use std::time::Duration;
use tracing::{info, warn};

pub struct ApplyStage<'a> {
    backend: &'a dyn PackageBackend,
    timeout: Duration,
}

impl<'a> ApplyStage<'a> {
    pub fn new(backend: &'a dyn PackageBackend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Submit every verified artifact as one batch. On any error nothing
    /// counts as applied.
    pub async fn apply(
        &self,
        downloaded: &[DownloadedArtifact],
    ) -> Result<Vec<UpdateCandidate>, TransactionError> {
        if downloaded.is_empty() {
            return Ok(Vec::new());
        }

        info!("Applying transaction of {} packages", downloaded.len());
        match tokio::time::timeout(self.timeout, self.backend.apply(downloaded)).await {
            Ok(Ok(())) => {
                info!("Transaction applied");
                Ok(downloaded.iter().map(|a| a.candidate.clone()).collect())
            }
            Ok(Err(e)) => {
                warn!("Transaction failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("Transaction timed out after {:?}", self.timeout);
                Err(TransactionError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FakeBackend, FakeBackendBuilder};
    use std::path::PathBuf;

    fn artifact(name: &str) -> DownloadedArtifact {
        let candidate = FakeBackend::candidate(name, "updates");
        DownloadedArtifact {
            path: PathBuf::from("/tmp").join(candidate.artifact_file_name()),
            candidate,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_skips_backend() {
        let backend = FakeBackendBuilder::new().build();
        let applied = ApplyStage::new(&backend, Duration::from_secs(5))
            .apply(&[])
            .await
            .unwrap();
        assert!(applied.is_empty());
        assert_eq!(backend.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_submitted_once() {
        let backend = FakeBackendBuilder::new().build();
        let applied = ApplyStage::new(&backend, Duration::from_secs(5))
            .apply(&[artifact("bash"), artifact("vim")])
            .await
            .unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(backend.apply_count(), 1);
        assert_eq!(backend.last_applied().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_applies_nothing() {
        let backend = FakeBackendBuilder::new()
            .reject_transaction("conflicting requests")
            .build();
        let err = ApplyStage::new(&backend, Duration::from_secs(5))
            .apply(&[artifact("bash")])
            .await
            .unwrap_err();
        assert!(matches!(err, TransactionError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let backend = FakeBackendBuilder::new()
            .apply_delay(Duration::from_millis(200))
            .build();
        let err = ApplyStage::new(&backend, Duration::from_millis(10))
            .apply(&[artifact("bash")])
            .await
            .unwrap_err();
        assert_eq!(err, TransactionError::Timeout(Duration::from_millis(10)));
        assert!(err.state_unknown());
        assert!(err.to_string().contains("10ms"));
    }
}
