//! Download Stage - bounded-concurrency fetch with checksum verification.
//!
//! Each candidate is fetched into the cache directory and its digest checked
//! against the repository checksum. Transient failures are retried with
//! exponential backoff plus jitter; verification failures are final. One
//! candidate failing never affects another.

use crate::backend::{FetchError, PackageBackend};
use autopatch_common::config::DownloadConfig;
use autopatch_common::{Checksum, ChecksumAlgorithm, DownloadedArtifact, UpdateCandidate};
use futures::future::join_all;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// A candidate that could not be downloaded and verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub candidate: UpdateCandidate,
    pub reason: String,
    pub attempts: u32,
}

/// Per-candidate outcome, both lists in input order
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub succeeded: Vec<DownloadedArtifact>,
    pub failed: Vec<DownloadFailure>,
}

pub struct DownloadStage {
    backend: Arc<dyn PackageBackend>,
    config: DownloadConfig,
    semaphore: Arc<Semaphore>,
}

impl DownloadStage {
    pub fn new(backend: Arc<dyn PackageBackend>, config: DownloadConfig) -> Self {
        let permits = config.max_parallel.max(1);
        Self {
            backend,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub async fn download(&self, candidates: &[UpdateCandidate]) -> DownloadReport {
        if candidates.is_empty() {
            return DownloadReport::default();
        }

        info!(
            "Downloading {} packages ({} in parallel)",
            candidates.len(),
            self.config.max_parallel
        );

        let results = join_all(candidates.iter().map(|c| self.download_one(c))).await;

        let mut report = DownloadReport::default();
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Ok(path) => report.succeeded.push(DownloadedArtifact {
                    candidate: candidate.clone(),
                    path,
                }),
                Err((reason, attempts)) => report.failed.push(DownloadFailure {
                    candidate: candidate.clone(),
                    reason,
                    attempts,
                }),
            }
        }

        info!(
            "Download finished: {} verified, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    async fn download_one(&self, candidate: &UpdateCandidate) -> Result<PathBuf, (String, u32)> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ("download pool closed".to_string(), 0))?;

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match tokio::time::timeout(
                self.config.timeout(),
                self.backend.fetch(candidate, &self.config.cache_dir),
            )
            .await
            {
                Ok(Ok(path)) => {
                    return verify_artifact(candidate, &path)
                        .await
                        .map(|()| path)
                        .map_err(|reason| (reason, attempt));
                }
                Ok(Err(e)) => e,
                Err(_) => FetchError::Transient(format!(
                    "timed out after {}s",
                    self.config.timeout_secs
                )),
            };

            if !error.is_transient() || attempt >= max_attempts {
                warn!(
                    "Download of {} failed after {} attempt(s): {}",
                    candidate.nevra(),
                    attempt,
                    error
                );
                return Err((error.to_string(), attempt));
            }

            let delay = with_jitter(backoff_delay(
                attempt,
                self.config.backoff_base_ms,
                self.config.backoff_max_ms,
            ));
            debug!(
                "Retrying {} in {:?} (attempt {} of {}): {}",
                candidate.nevra(),
                delay,
                attempt + 1,
                max_attempts,
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// `base * 2^(attempt-1)`, capped at `max`
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let ms = base_ms.saturating_mul(1u64 << exp).min(max_ms);
    Duration::from_millis(ms)
}

/// Read buffer for hashing artifacts
const HASH_CHUNK: usize = 64 * 1024;

/// Add up to half of `delay` again, at random
fn with_jitter(delay: Duration) -> Duration {
    let half = delay.as_millis() as u64 / 2;
    if half == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
}

/// Check the file digest; the file is removed when it cannot be trusted
async fn verify_artifact(candidate: &UpdateCandidate, path: &Path) -> Result<(), String> {
    let outcome = match &candidate.checksum {
        None => Err("no checksum in repository metadata".to_string()),
        Some(expected) => match file_digest(expected.algorithm, path).await {
            Ok(calculated) => check_digest(expected, &calculated),
            Err(e) => Err(format!("cannot read {}: {}", path.display(), e)),
        },
    };

    if let Err(reason) = &outcome {
        warn!("Rejecting {}: {}", candidate.nevra(), reason);
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    } else {
        debug!("Checksum verified for {}", candidate.nevra());
    }
    outcome
}

/// Hex digest of the file, read in fixed-size chunks
async fn file_digest(algorithm: ChecksumAlgorithm, path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    match algorithm {
        ChecksumAlgorithm::Sha256 => hash_reader(Sha256::new(), &mut file).await,
        ChecksumAlgorithm::Sha512 => hash_reader(Sha512::new(), &mut file).await,
    }
}

async fn hash_reader<D: Digest>(
    mut hasher: D,
    file: &mut tokio::fs::File,
) -> std::io::Result<String> {
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn check_digest(expected: &Checksum, calculated: &str) -> Result<(), String> {
    if calculated.eq_ignore_ascii_case(&expected.digest) {
        Ok(())
    } else {
        Err(format!(
            "checksum mismatch: expected {}, got {}",
            expected.digest, calculated
        ))
    }
}
