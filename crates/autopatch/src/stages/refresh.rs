//! Metadata Refresher - keeps repository metadata younger than max age.

use crate::backend::{PackageBackend, RepoState};
use crate::error::RunError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which repositories can be trusted for this run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Repositories with usable metadata (fresh or refreshed)
    pub available: Vec<String>,
    /// Repositories refreshed during this run
    pub refreshed: Vec<String>,
    /// Repositories whose refresh failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl RefreshSummary {
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct MetadataRefresher<'a> {
    backend: &'a dyn PackageBackend,
    /// Restrict to these ids; empty means every enabled repository
    repo_filter: &'a [String],
    timeout: Duration,
}

impl<'a> MetadataRefresher<'a> {
    pub fn new(backend: &'a dyn PackageBackend, repo_filter: &'a [String], timeout: Duration) -> Self {
        Self {
            backend,
            repo_filter,
            timeout,
        }
    }

    pub async fn ensure_fresh(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary, RunError> {
        let repos = self
            .backend
            .repositories()
            .await
            .map_err(|e| RunError::MetadataUnavailable(format!("cannot list repositories: {:#}", e)))?;

        let repos: Vec<RepoState> = repos
            .into_iter()
            .filter(|r| self.repo_filter.is_empty() || self.repo_filter.contains(&r.id))
            .collect();

        if repos.is_empty() {
            return Err(RunError::MetadataUnavailable(
                "no enabled repositories".to_string(),
            ));
        }

        let mut summary = RefreshSummary::default();
        for repo in &repos {
            if !is_stale(repo, max_age, now) {
                debug!("Metadata for {} is fresh", repo.id);
                summary.available.push(repo.id.clone());
                continue;
            }

            info!("Refreshing metadata for {}", repo.id);
            match tokio::time::timeout(self.timeout, self.backend.refresh(&repo.id)).await {
                Ok(Ok(())) => {
                    summary.refreshed.push(repo.id.clone());
                    summary.available.push(repo.id.clone());
                }
                Ok(Err(e)) => {
                    warn!("Refresh of {} failed: {:#}", repo.id, e);
                    summary.failed.push((repo.id.clone(), format!("{:#}", e)));
                }
                Err(_) => {
                    warn!("Refresh of {} timed out after {:?}", repo.id, self.timeout);
                    summary
                        .failed
                        .push((repo.id.clone(), format!("timed out after {}s", self.timeout.as_secs())));
                }
            }
        }

        if summary.available.is_empty() {
            return Err(RunError::MetadataUnavailable(format!(
                "all {} repositories failed to refresh",
                repos.len()
            )));
        }

        Ok(summary)
    }
}

/// Absent metadata is stale; metadata stamped in the future is fresh
fn is_stale(repo: &RepoState, max_age: Duration, now: DateTime<Utc>) -> bool {
    match repo.last_refreshed {
        None => true,
        Some(at) => match (now - at).to_std() {
            Ok(age) => age >= max_age,
            Err(_) => false,
        },
    }
}
