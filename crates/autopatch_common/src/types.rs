//! Core data model: update candidates, advisories, run results.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Packages and advisories
// ============================================================================

/// Package identity (name + architecture)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub arch: String,
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.arch)
    }
}

/// Advisory classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryKind {
    Security,
    Bugfix,
    Enhancement,
    Newpackage,
    Unknown,
}

impl AdvisoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisoryKind::Security => "security",
            AdvisoryKind::Bugfix => "bugfix",
            AdvisoryKind::Enhancement => "enhancement",
            AdvisoryKind::Newpackage => "newpackage",
            AdvisoryKind::Unknown => "unknown",
        }
    }
}

impl FromStr for AdvisoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "security" | "sec." | "sec" => Ok(AdvisoryKind::Security),
            "bugfix" => Ok(AdvisoryKind::Bugfix),
            "enhancement" => Ok(AdvisoryKind::Enhancement),
            "newpackage" => Ok(AdvisoryKind::Newpackage),
            "unknown" => Ok(AdvisoryKind::Unknown),
            other => Err(format!("unknown advisory kind '{}'", other)),
        }
    }
}

/// Advisory severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    Important,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::Important => "important",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "moderate" => Ok(Severity::Moderate),
            "important" => Ok(Severity::Important),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Advisory metadata attached to a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub kind: AdvisoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(format!("unsupported checksum algorithm '{}'", other)),
        }
    }
}

/// Expected artifact digest taken from repository metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest
    pub digest: String,
}

impl Checksum {
    pub fn sha256(digest: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: digest.into().to_ascii_lowercase(),
        }
    }
}

/// One available package upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCandidate {
    pub name: String,
    pub arch: String,
    /// Installed version; `None` when the upgrade pulls in a new package
    pub old_version: Option<String>,
    pub new_version: String,
    /// Originating repository id
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<Advisory>,
    /// Artifact URL or local path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
}

impl UpdateCandidate {
    pub fn id(&self) -> PackageId {
        PackageId {
            name: self.name.clone(),
            arch: self.arch.clone(),
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(&self.advisory, Some(a) if a.kind == AdvisoryKind::Security)
    }

    pub fn severity(&self) -> Option<Severity> {
        self.advisory.as_ref().and_then(|a| a.severity)
    }

    /// `name-version.arch`
    pub fn nevra(&self) -> String {
        format!("{}-{}.{}", self.name, self.new_version, self.arch)
    }

    /// File name the artifact is stored under in the download cache
    pub fn artifact_file_name(&self) -> String {
        format!("{}.rpm", self.nevra().replace(':', "_"))
    }
}

/// A candidate whose artifact was fetched and verified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedArtifact {
    pub candidate: UpdateCandidate,
    pub path: PathBuf,
}

// ============================================================================
// Scope
// ============================================================================

/// Which candidates a run considers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeScope {
    All,
    Security,
    /// Security advisories at or above the given severity
    SecuritySeverity(Severity),
    /// Only the named advisories
    Advisories(BTreeSet<String>),
}

impl UpgradeScope {
    pub fn matches(&self, candidate: &UpdateCandidate) -> bool {
        match self {
            UpgradeScope::All => true,
            UpgradeScope::Security => candidate.is_security(),
            UpgradeScope::SecuritySeverity(min) => {
                candidate.is_security() && candidate.severity().is_some_and(|s| s >= *min)
            }
            UpgradeScope::Advisories(ids) => candidate
                .advisory
                .as_ref()
                .is_some_and(|a| ids.contains(&a.id)),
        }
    }
}

impl fmt::Display for UpgradeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeScope::All => f.write_str("all"),
            UpgradeScope::Security => f.write_str("security"),
            UpgradeScope::SecuritySeverity(s) => write!(f, "security (>= {})", s.as_str()),
            UpgradeScope::Advisories(ids) => {
                let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                write!(f, "advisories [{}]", ids.join(", "))
            }
        }
    }
}

// ============================================================================
// Run result
// ============================================================================

/// What the run does with the candidates it finds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    ReportOnly,
    DownloadOnly,
    Apply,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::ReportOnly => "report-only",
            RunMode::DownloadOnly => "download-only",
            RunMode::Apply => "apply",
        }
    }
}

/// Pipeline stage a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lock,
    IntervalCheck,
    Refresh,
    Query,
    Download,
    Apply,
    Reboot,
    Emit,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lock => "lock",
            Stage::IntervalCheck => "interval_check",
            Stage::Refresh => "refresh",
            Stage::Query => "query",
            Stage::Download => "download",
            Stage::Apply => "apply",
            Stage::Reboot => "reboot",
            Stage::Emit => "emit",
            Stage::Persist => "persist",
        }
    }
}

/// One recorded failure or warning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageId>,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Final classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Skipped,
    UpToDate,
    Completed,
    PartialFailure,
    Aborted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::UpToDate => "up-to-date",
            Outcome::Completed => "completed",
            Outcome::PartialFailure => "partial-failure",
            Outcome::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootRecommendation {
    pub recommended: bool,
    pub reason: String,
    /// Set once the reboot command actually ran
    #[serde(default)]
    pub triggered: bool,
}

/// Everything a run did, built incrementally by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub system_name: String,
    pub mode: RunMode,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_kind: Option<ErrorKind>,
    pub considered: Vec<UpdateCandidate>,
    pub downloaded: Vec<UpdateCandidate>,
    pub applied: Vec<UpdateCandidate>,
    /// Failures that affected the outcome
    pub failures: Vec<FailureRecord>,
    /// Problems that were contained and did not affect the outcome
    pub warnings: Vec<FailureRecord>,
    pub reboot: RebootRecommendation,
}

impl RunResult {
    pub fn new(system_name: impl Into<String>, mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            system_name: system_name.into(),
            mode,
            outcome: Outcome::Completed,
            abort_kind: None,
            considered: Vec::new(),
            downloaded: Vec::new(),
            applied: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            reboot: RebootRecommendation::default(),
        }
    }

    pub fn record_failure(
        &mut self,
        stage: Stage,
        package: Option<PackageId>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) {
        self.failures.push(FailureRecord {
            stage,
            package,
            kind,
            reason: reason.into(),
        });
    }

    pub fn record_warning(&mut self, stage: Stage, kind: ErrorKind, reason: impl Into<String>) {
        self.warnings.push(FailureRecord {
            stage,
            package: None,
            kind,
            reason: reason.into(),
        });
    }

    /// Mark the run aborted. The first abort kind wins.
    pub fn abort(&mut self, stage: Stage, kind: ErrorKind, reason: impl Into<String>) {
        self.record_failure(stage, None, kind, reason);
        self.outcome = Outcome::Aborted;
        if self.abort_kind.is_none() {
            self.abort_kind = Some(kind);
        }
    }

    /// Candidates that failed individually (download / verification)
    pub fn failed_packages(&self) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(|f| f.package.is_some())
    }

    pub fn failed_count(&self) -> usize {
        self.failed_packages().count()
    }

    /// Whether the run found something to report (available, downloaded or applied)
    pub fn has_changes(&self) -> bool {
        !self.considered.is_empty()
    }

    pub fn is_aborted_with(&self, kind: ErrorKind) -> bool {
        self.outcome == Outcome::Aborted && self.abort_kind == Some(kind)
    }
}
