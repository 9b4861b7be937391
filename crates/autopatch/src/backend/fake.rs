//! Fake collaborators for deterministic testing.
//!
//! No dnf, no network, no sysfs. Every answer is configured up front through
//! `FakeBackendBuilder` / `FakeHost` and every call is counted so tests can
//! assert on what the orchestrator did (or did not) invoke.
//!
//! ```rust,ignore
//! let backend = FakeBackendBuilder::new()
//!     .repo("updates", None)
//!     .candidate(FakeBackend::candidate("bash", "updates"))
//!     .fetch_behavior("bash", FetchBehavior::TransientThenOk(2))
//!     .build();
//! ```

use super::{FetchError, HostState, PackageBackend, RepoState, TransactionError};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use autopatch_common::{
    Advisory, AdvisoryKind, Checksum, DownloadedArtifact, PackageId, Severity, UpdateCandidate,
};
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fake Package Backend
// ============================================================================

/// How a fake fetch of one package behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchBehavior {
    /// Write the expected content
    Ok,
    /// Fail transiently this many times, then succeed
    TransientThenOk(u32),
    AlwaysTransient,
    Permanent,
    /// Write bytes that do not match the checksum
    WrongContent,
    /// Never return (exercises per-attempt timeouts)
    Hang,
}

/// Bytes the fake "downloads" for a candidate
pub fn artifact_content(candidate: &UpdateCandidate) -> Vec<u8> {
    format!("fake-rpm:{}", candidate.nevra()).into_bytes()
}

#[derive(Debug, Default)]
struct Calls {
    repositories: usize,
    refresh: HashMap<String, usize>,
    query: usize,
    last_query_repos: Vec<String>,
    fetch: HashMap<String, usize>,
    apply: usize,
    last_applied: Vec<PackageId>,
}

pub struct FakeBackend {
    repos: Vec<RepoState>,
    failing_repos: HashSet<String>,
    candidates: Vec<UpdateCandidate>,
    query_error: Option<String>,
    fetch_behaviors: HashMap<String, FetchBehavior>,
    fetch_delay: Duration,
    apply_result: Result<(), TransactionError>,
    apply_delay: Duration,
    calls: Arc<Mutex<Calls>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    /// Candidate with a checksum matching `artifact_content`
    pub fn candidate(name: &str, repo: &str) -> UpdateCandidate {
        let mut candidate = UpdateCandidate {
            name: name.to_string(),
            arch: "x86_64".to_string(),
            old_version: Some("1.0-1.fc40".to_string()),
            new_version: "1.1-1.fc40".to_string(),
            repo: repo.to_string(),
            advisory: None,
            location: None,
            checksum: None,
        };
        candidate.checksum = Some(Checksum::sha256(hex::encode(Sha256::digest(
            artifact_content(&candidate),
        ))));
        candidate
    }

    /// Candidate carrying a security advisory
    pub fn security_candidate(
        name: &str,
        repo: &str,
        advisory_id: &str,
        severity: Option<Severity>,
    ) -> UpdateCandidate {
        let mut candidate = Self::candidate(name, repo);
        candidate.advisory = Some(Advisory {
            id: advisory_id.to_string(),
            kind: AdvisoryKind::Security,
            severity,
        });
        candidate
    }

    pub fn repositories_calls(&self) -> usize {
        self.calls.lock().unwrap().repositories
    }

    pub fn refresh_count(&self, repo_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .refresh
            .get(repo_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_refreshes(&self) -> usize {
        self.calls.lock().unwrap().refresh.values().sum()
    }

    pub fn query_count(&self) -> usize {
        self.calls.lock().unwrap().query
    }

    /// Repositories handed to the most recent upgrade query
    pub fn last_query_repos(&self) -> Vec<String> {
        self.calls.lock().unwrap().last_query_repos.clone()
    }

    pub fn fetch_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .fetch
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.calls.lock().unwrap().fetch.values().sum()
    }

    pub fn apply_count(&self) -> usize {
        self.calls.lock().unwrap().apply
    }

    /// Packages submitted in the most recent transaction
    pub fn last_applied(&self) -> Vec<PackageId> {
        self.calls.lock().unwrap().last_applied.clone()
    }

    /// Highest number of fetches observed running at once
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, name: &str) -> FetchBehavior {
        self.fetch_behaviors
            .get(name)
            .cloned()
            .unwrap_or(FetchBehavior::Ok)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PackageBackend for FakeBackend {
    async fn repositories(&self) -> Result<Vec<RepoState>> {
        self.calls.lock().unwrap().repositories += 1;
        Ok(self.repos.clone())
    }

    async fn refresh(&self, repo_id: &str) -> Result<()> {
        {
            let mut calls = self.calls.lock().unwrap();
            *calls.refresh.entry(repo_id.to_string()).or_insert(0) += 1;
        }
        if self.failing_repos.contains(repo_id) {
            bail!("Cannot download repomd.xml for {}", repo_id);
        }
        Ok(())
    }

    async fn available_upgrades(&self, repos: &[String]) -> Result<Vec<UpdateCandidate>> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.query += 1;
            calls.last_query_repos = repos.to_vec();
        }
        match &self.query_error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self
                .candidates
                .iter()
                .filter(|c| repos.contains(&c.repo))
                .cloned()
                .collect()),
        }
    }

    async fn fetch(
        &self,
        candidate: &UpdateCandidate,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.fetch.entry(candidate.name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let content = match self.behavior_for(&candidate.name) {
            FetchBehavior::Ok => artifact_content(candidate),
            FetchBehavior::TransientThenOk(failures) if (attempt as u32) <= failures => {
                return Err(FetchError::Transient(format!(
                    "connection reset (attempt {})",
                    attempt
                )));
            }
            FetchBehavior::TransientThenOk(_) => artifact_content(candidate),
            FetchBehavior::AlwaysTransient => {
                return Err(FetchError::Transient("mirror timed out".to_string()));
            }
            FetchBehavior::Permanent => {
                return Err(FetchError::Permanent("HTTP 404".to_string()));
            }
            FetchBehavior::WrongContent => b"truncated".to_vec(),
            FetchBehavior::Hang => std::future::pending::<Vec<u8>>().await,
        };

        let path = dest_dir.join(candidate.artifact_file_name());
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| FetchError::Permanent(e.to_string()))?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| FetchError::Permanent(e.to_string()))?;
        Ok(path)
    }

    async fn apply(&self, artifacts: &[DownloadedArtifact]) -> Result<(), TransactionError> {
        {
            let mut calls = self.calls.lock().unwrap();
            calls.apply += 1;
            calls.last_applied = artifacts.iter().map(|a| a.candidate.id()).collect();
        }
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        self.apply_result.clone()
    }
}

// ============================================================================
// Builder for FakeBackend
// ============================================================================

pub struct FakeBackendBuilder {
    repos: Vec<RepoState>,
    failing_repos: HashSet<String>,
    candidates: Vec<UpdateCandidate>,
    query_error: Option<String>,
    fetch_behaviors: HashMap<String, FetchBehavior>,
    fetch_delay: Duration,
    apply_result: Result<(), TransactionError>,
    apply_delay: Duration,
}

impl FakeBackendBuilder {
    pub fn new() -> Self {
        Self {
            repos: Vec::new(),
            failing_repos: HashSet::new(),
            candidates: Vec::new(),
            query_error: None,
            fetch_behaviors: HashMap::new(),
            fetch_delay: Duration::ZERO,
            apply_result: Ok(()),
            apply_delay: Duration::ZERO,
        }
    }

    /// Add a repository whose metadata is `age` old (`None` = never fetched)
    pub fn repo(mut self, id: &str, age: Option<Duration>) -> Self {
        let last_refreshed = age.map(|age| {
            Utc::now() - ChronoDuration::from_std(age).unwrap_or_else(|_| ChronoDuration::zero())
        });
        self.repos.push(RepoState {
            id: id.to_string(),
            last_refreshed,
        });
        self
    }

    /// Add a stale repository whose refresh fails
    pub fn failing_repo(mut self, id: &str) -> Self {
        self = self.repo(id, None);
        self.failing_repos.insert(id.to_string());
        self
    }

    pub fn candidate(mut self, candidate: UpdateCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn candidates(mut self, candidates: Vec<UpdateCandidate>) -> Self {
        self.candidates.extend(candidates);
        self
    }

    pub fn query_error(mut self, message: &str) -> Self {
        self.query_error = Some(message.to_string());
        self
    }

    pub fn fetch_behavior(mut self, name: &str, behavior: FetchBehavior) -> Self {
        self.fetch_behaviors.insert(name.to_string(), behavior);
        self
    }

    /// Delay every fetch (makes concurrency observable)
    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn reject_transaction(mut self, reason: &str) -> Self {
        self.apply_result = Err(TransactionError::Rejected(reason.to_string()));
        self
    }

    /// Fail the transaction with `error`
    pub fn apply_error(mut self, error: TransactionError) -> Self {
        self.apply_result = Err(error);
        self
    }

    pub fn apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn build(self) -> FakeBackend {
        FakeBackend {
            repos: self.repos,
            failing_repos: self.failing_repos,
            candidates: self.candidates,
            query_error: self.query_error,
            fetch_behaviors: self.fetch_behaviors,
            fetch_delay: self.fetch_delay,
            apply_result: self.apply_result,
            apply_delay: self.apply_delay,
            calls: Arc::new(Mutex::new(Calls::default())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl Default for FakeBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Fake Host
// ============================================================================

/// Fake host: network state, reboot rule and reboot command are configured
pub struct FakeHost {
    /// Network reports offline for this many checks, then online
    offline_checks: AtomicUsize,
    network_always_down: bool,
    reboot_packages: HashSet<String>,
    reboot_fails: bool,
    network_checks: AtomicUsize,
    reboot_commands: Mutex<Vec<String>>,
}

impl FakeHost {
    /// Online host where no package needs a reboot
    pub fn new() -> Self {
        Self {
            offline_checks: AtomicUsize::new(0),
            network_always_down: false,
            reboot_packages: HashSet::new(),
            reboot_fails: false,
            network_checks: AtomicUsize::new(0),
            reboot_commands: Mutex::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        Self {
            network_always_down: true,
            ..Self::new()
        }
    }

    /// Network comes up after `checks` negative answers
    pub fn online_after(checks: usize) -> Self {
        Self {
            offline_checks: AtomicUsize::new(checks),
            ..Self::new()
        }
    }

    /// Applying any of `names` requires a reboot
    pub fn with_reboot_packages(mut self, names: &[&str]) -> Self {
        self.reboot_packages = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_failing_reboot(mut self) -> Self {
        self.reboot_fails = true;
        self
    }

    pub fn network_checks(&self) -> usize {
        self.network_checks.load(Ordering::SeqCst)
    }

    /// Reboot commands that were executed
    pub fn reboot_commands(&self) -> Vec<String> {
        self.reboot_commands.lock().unwrap().clone()
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostState for FakeHost {
    async fn network_online(&self) -> bool {
        self.network_checks.fetch_add(1, Ordering::SeqCst);
        if self.network_always_down {
            return false;
        }
        self.offline_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    async fn reboot_required(&self, applied: &[UpdateCandidate]) -> Result<Option<String>> {
        let names: Vec<&str> = applied
            .iter()
            .filter(|c| self.reboot_packages.contains(&c.name))
            .map(|c| c.name.as_str())
            .collect();
        if names.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!("core packages updated: {}", names.join(", "))))
        }
    }

    async fn trigger_reboot(&self, command: &str) -> Result<()> {
        if self.reboot_fails {
            bail!("reboot command exited with status 1");
        }
        self.reboot_commands.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
