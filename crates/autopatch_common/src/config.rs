//! Configuration for autopatch.
//!
//! Loads settings from /etc/autopatch/autopatch.toml or uses defaults.
//! Every field has a serde default so a partial file is always valid TOML
//! input; semantic checks happen in `RunConfig::validate`.

use crate::types::{RunMode, Severity, UpgradeScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/autopatch/autopatch.toml";

/// Default lock file
pub const LOCK_PATH: &str = "/run/autopatch/autopatch.lock";

/// Default last-run marker
pub const TIMESTAMP_PATH: &str = "/var/lib/autopatch/last_run.json";

/// Default artifact cache
pub const CACHE_DIR: &str = "/var/cache/autopatch/packages";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// [commands]
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeType {
    #[serde(alias = "all")]
    Default,
    Security,
    SecuritySeverity,
    Advisories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPolicy {
    No,
    Yes,
    /// Download and leave installation to an operator
    Attended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebootPolicy {
    Never,
    WhenChanged,
    WhenNeeded,
}

impl RebootPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebootPolicy::Never => "never",
            RebootPolicy::WhenChanged => "when-changed",
            RebootPolicy::WhenNeeded => "when-needed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_upgrade_type")]
    pub upgrade_type: UpgradeType,

    /// Minimum severity for `security-severity`
    #[serde(default)]
    pub min_severity: Option<Severity>,

    /// Advisory ids for `advisories`
    #[serde(default)]
    pub advisories: Vec<String>,

    /// Minimum seconds between two runs; 0 disables the gate
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    /// Upper bound of the random sleep in timer mode
    #[serde(default = "default_random_sleep")]
    pub random_sleep_secs: u64,

    #[serde(default = "default_download_updates")]
    pub download_updates: DownloadPolicy,

    #[serde(default)]
    pub apply_updates: bool,

    #[serde(default = "default_reboot")]
    pub reboot: RebootPolicy,

    /// Actually run `reboot_command` when a reboot is recommended
    #[serde(default)]
    pub trigger_reboot: bool,

    #[serde(default = "default_reboot_command")]
    pub reboot_command: String,

    /// Seconds to wait for a network before refreshing; 0 disables
    #[serde(default = "default_network_online_timeout")]
    pub network_online_timeout_secs: u64,

    /// Repository metadata older than this is refreshed
    #[serde(default = "default_metadata_max_age")]
    pub metadata_max_age_secs: u64,

    /// Timeout for one repository refresh or the upgrade query
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,
}

fn default_upgrade_type() -> UpgradeType {
    UpgradeType::Default
}

fn default_min_interval() -> u64 {
    3_600
}

fn default_random_sleep() -> u64 {
    0
}

fn default_download_updates() -> DownloadPolicy {
    DownloadPolicy::Yes
}

fn default_reboot() -> RebootPolicy {
    RebootPolicy::Never
}

fn default_reboot_command() -> String {
    "shutdown -r +5 'Rebooting after applying package updates'".to_string()
}

fn default_network_online_timeout() -> u64 {
    60
}

fn default_metadata_max_age() -> u64 {
    6 * 3_600
}

fn default_metadata_timeout() -> u64 {
    300
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            upgrade_type: default_upgrade_type(),
            min_severity: None,
            advisories: Vec::new(),
            min_interval_secs: default_min_interval(),
            random_sleep_secs: default_random_sleep(),
            download_updates: default_download_updates(),
            apply_updates: false,
            reboot: default_reboot(),
            trigger_reboot: false,
            reboot_command: default_reboot_command(),
            network_online_timeout_secs: default_network_online_timeout(),
            metadata_max_age_secs: default_metadata_max_age(),
            metadata_timeout_secs: default_metadata_timeout(),
        }
    }
}

// ============================================================================
// [download] / [apply]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Concurrent artifact downloads
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Total attempts per artifact, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Per-attempt timeout
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_download_timeout() -> u64 {
    120
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(CACHE_DIR)
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            timeout_secs: default_download_timeout(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    #[serde(default = "default_apply_timeout")]
    pub timeout_secs: u64,
}

fn default_apply_timeout() -> u64 {
    3_600
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_apply_timeout(),
        }
    }
}

// ============================================================================
// Emitters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitterKind {
    Stdio,
    Email,
    Syslog,
    Motd,
    Command,
    CommandEmail,
}

impl EmitterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitterKind::Stdio => "stdio",
            EmitterKind::Email => "email",
            EmitterKind::Syslog => "syslog",
            EmitterKind::Motd => "motd",
            EmitterKind::Command => "command",
            EmitterKind::CommandEmail => "command_email",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmittersConfig {
    #[serde(default = "default_emit_via")]
    pub emit_via: Vec<EmitterKind>,

    /// Name used in report titles; host name when unset
    #[serde(default)]
    pub system_name: Option<String>,

    /// Also report runs that found nothing to do
    #[serde(default)]
    pub emit_when_up_to_date: bool,

    /// Timeout for one emitter (mail delivery, spawned commands)
    #[serde(default = "default_emitter_timeout")]
    pub timeout_secs: u64,
}

fn default_emit_via() -> Vec<EmitterKind> {
    vec![EmitterKind::Stdio]
}

fn default_emitter_timeout() -> u64 {
    30
}

impl Default for EmittersConfig {
    fn default() -> Self {
        Self {
            emit_via: default_emit_via(),
            system_name: None,
            emit_when_up_to_date: false,
            timeout_secs: default_emitter_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailTls {
    No,
    Starttls,
    Yes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_from")]
    pub email_from: String,

    #[serde(default)]
    pub email_to: Vec<String>,

    #[serde(default = "default_email_host")]
    pub email_host: String,

    #[serde(default = "default_email_port")]
    pub email_port: u16,

    #[serde(default = "default_email_tls")]
    pub email_tls: EmailTls,
}

fn default_email_from() -> String {
    "root@localhost".to_string()
}

fn default_email_host() -> String {
    "localhost".to_string()
}

fn default_email_port() -> u16 {
    25
}

fn default_email_tls() -> EmailTls {
    EmailTls::No
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            email_from: default_email_from(),
            email_to: Vec::new(),
            email_host: default_email_host(),
            email_port: default_email_port(),
            email_tls: default_email_tls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEmitterConfig {
    /// Shell command; `{title}` and `{body}` are substituted
    #[serde(default = "default_command_format")]
    pub command_format: String,

    /// Text written to the command's stdin
    #[serde(default = "default_stdin_format")]
    pub stdin_format: String,
}

fn default_command_format() -> String {
    "cat".to_string()
}

fn default_stdin_format() -> String {
    "{body}".to_string()
}

impl Default for CommandEmitterConfig {
    fn default() -> Self {
        Self {
            command_format: default_command_format(),
            stdin_format: default_stdin_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEmailConfig {
    /// `{subject}`, `{body}`, `{email_from}`, `{email_to}` are substituted
    #[serde(default = "default_command_email_format")]
    pub command_format: String,

    #[serde(default = "default_stdin_format")]
    pub stdin_format: String,

    #[serde(default = "default_email_from")]
    pub email_from: String,

    #[serde(default)]
    pub email_to: Vec<String>,
}

fn default_command_email_format() -> String {
    "mail -Ssendwait -s {subject} -r {email_from} {email_to}".to_string()
}

impl Default for CommandEmailConfig {
    fn default() -> Self {
        Self {
            command_format: default_command_email_format(),
            stdin_format: default_stdin_format(),
            email_from: default_email_from(),
            email_to: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogConfig {
    #[serde(default = "default_syslog_tag")]
    pub tag: String,

    #[serde(default = "default_syslog_facility")]
    pub facility: String,
}

fn default_syslog_tag() -> String {
    "autopatch".to_string()
}

fn default_syslog_facility() -> String {
    "daemon".to_string()
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            tag: default_syslog_tag(),
            facility: default_syslog_facility(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotdConfig {
    #[serde(default = "default_motd_path")]
    pub path: PathBuf,
}

fn default_motd_path() -> PathBuf {
    PathBuf::from("/etc/motd.d/autopatch")
}

impl Default for MotdConfig {
    fn default() -> Self {
        Self {
            path: default_motd_path(),
        }
    }
}

// ============================================================================
// [base] / [state]
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    /// 0 = warnings only, 1-2 = info, 3-5 = debug, >5 = trace
    #[serde(default = "default_debuglevel")]
    pub debuglevel: u8,

    /// Restrict the run to these repository ids (all enabled when empty)
    #[serde(default)]
    pub repos: Vec<String>,

    /// Package names never considered
    #[serde(default)]
    pub excludepkgs: Vec<String>,
}

fn default_debuglevel() -> u8 {
    1
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            debuglevel: default_debuglevel(),
            repos: Vec::new(),
            excludepkgs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    #[serde(default = "default_timestamp_path")]
    pub timestamp_path: PathBuf,
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(LOCK_PATH)
}

fn default_timestamp_path() -> PathBuf {
    PathBuf::from(TIMESTAMP_PATH)
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            lock_path: default_lock_path(),
            timestamp_path: default_timestamp_path(),
        }
    }
}

// ============================================================================
// RunConfig
// ============================================================================

/// Complete configuration for one invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub emitters: EmittersConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub command: CommandEmitterConfig,
    #[serde(default)]
    pub command_email: CommandEmailConfig,
    #[serde(default)]
    pub syslog: SyslogConfig,
    #[serde(default)]
    pub motd: MotdConfig,
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl RunConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.commands;
        if c.upgrade_type == UpgradeType::SecuritySeverity && c.min_severity.is_none() {
            return Err(ConfigError::Invalid(
                "upgrade_type = security-severity requires min_severity".to_string(),
            ));
        }
        if c.upgrade_type == UpgradeType::Advisories && c.advisories.is_empty() {
            return Err(ConfigError::Invalid(
                "upgrade_type = advisories requires a non-empty advisories list".to_string(),
            ));
        }
        if self.download.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "download.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.download.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "download.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.emitters.emit_via.contains(&EmitterKind::Email) && self.email.email_to.is_empty() {
            return Err(ConfigError::Invalid(
                "email emitter requires email.email_to".to_string(),
            ));
        }
        if self.emitters.emit_via.contains(&EmitterKind::CommandEmail)
            && self.command_email.email_to.is_empty()
        {
            return Err(ConfigError::Invalid(
                "command_email emitter requires command_email.email_to".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides of the download/apply policies
    pub fn with_overrides(mut self, download: Option<bool>, apply: Option<bool>) -> Self {
        if let Some(download) = download {
            self.commands.download_updates = if download {
                DownloadPolicy::Yes
            } else {
                DownloadPolicy::No
            };
        }
        if let Some(apply) = apply {
            self.commands.apply_updates = apply;
        }
        self
    }

    /// Download policy after the apply-implies-download rule
    pub fn effective_download(&self) -> DownloadPolicy {
        if self.commands.apply_updates {
            DownloadPolicy::Yes
        } else {
            self.commands.download_updates
        }
    }

    pub fn run_mode(&self) -> RunMode {
        if self.commands.apply_updates {
            RunMode::Apply
        } else if self.effective_download() == DownloadPolicy::No {
            RunMode::ReportOnly
        } else {
            RunMode::DownloadOnly
        }
    }

    pub fn upgrade_scope(&self) -> UpgradeScope {
        let c = &self.commands;
        match c.upgrade_type {
            UpgradeType::Default => UpgradeScope::All,
            UpgradeType::Security => UpgradeScope::Security,
            UpgradeType::SecuritySeverity => {
                UpgradeScope::SecuritySeverity(c.min_severity.unwrap_or(Severity::Low))
            }
            UpgradeType::Advisories => {
                UpgradeScope::Advisories(c.advisories.iter().cloned().collect::<BTreeSet<_>>())
            }
        }
    }

    /// Configured system name, else the host name
    pub fn system_name(&self) -> String {
        if let Some(name) = self.emitters.system_name.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.commands.min_interval_secs)
    }

    pub fn metadata_max_age(&self) -> Duration {
        Duration::from_secs(self.commands.metadata_max_age_secs)
    }

    /// tracing filter directive for `[base] debuglevel`
    pub fn log_level(&self) -> &'static str {
        match self.base.debuglevel {
            0 => "warn",
            1..=2 => "info",
            3..=5 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.commands.upgrade_type, UpgradeType::Default);
        assert_eq!(config.commands.download_updates, DownloadPolicy::Yes);
        assert!(!config.commands.apply_updates);
        assert_eq!(config.commands.reboot, RebootPolicy::Never);
        assert_eq!(config.emitters.emit_via, vec![EmitterKind::Stdio]);
        assert_eq!(config.run_mode(), RunMode::DownloadOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_parses() {
        let config = RunConfig::parse(
            r#"
            [commands]
            upgrade_type = "security"
            apply_updates = true
            download_updates = "no"
            reboot = "when-needed"

            [emitters]
            emit_via = ["stdio", "motd", "command_email"]

            [command_email]
            email_to = ["ops@example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.upgrade_scope(), UpgradeScope::Security);
        assert_eq!(config.commands.reboot, RebootPolicy::WhenNeeded);
        assert_eq!(config.download.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_implies_download() {
        let mut config = RunConfig::default();
        config.commands.download_updates = DownloadPolicy::No;
        config.commands.apply_updates = true;
        assert_eq!(config.effective_download(), DownloadPolicy::Yes);
        assert_eq!(config.run_mode(), RunMode::Apply);
    }

    #[test]
    fn test_report_only_mode() {
        let mut config = RunConfig::default();
        config.commands.download_updates = DownloadPolicy::No;
        assert_eq!(config.run_mode(), RunMode::ReportOnly);

        config.commands.download_updates = DownloadPolicy::Attended;
        assert_eq!(config.run_mode(), RunMode::DownloadOnly);
    }

    #[test]
    fn test_all_alias() {
        let config = RunConfig::parse("[commands]\nupgrade_type = \"all\"\n").unwrap();
        assert_eq!(config.upgrade_scope(), UpgradeScope::All);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = RunConfig::default();
        config.commands.upgrade_type = UpgradeType::SecuritySeverity;
        assert!(config.validate().is_err());
        config.commands.min_severity = Some(Severity::Important);
        assert!(config.validate().is_ok());

        config.emitters.emit_via.push(EmitterKind::Email);
        assert!(config.validate().is_err());
        config.email.email_to.push("root@example.com".to_string());
        assert!(config.validate().is_ok());

        config.download.max_parallel = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = RunConfig::default().with_overrides(Some(false), Some(true));
        assert_eq!(config.commands.download_updates, DownloadPolicy::No);
        assert_eq!(config.run_mode(), RunMode::Apply);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = RunConfig::load_from(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.commands.min_interval_secs, 3_600);
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("autopatch.toml");
        fs::write(&path, "[commands\n").unwrap();
        assert!(matches!(
            RunConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_system_name_override() {
        let mut config = RunConfig::default();
        config.emitters.system_name = Some("db01".to_string());
        assert_eq!(config.system_name(), "db01");
    }

    #[test]
    fn test_log_level_mapping() {
        let mut config = RunConfig::default();
        config.base.debuglevel = 0;
        assert_eq!(config.log_level(), "warn");
        config.base.debuglevel = 4;
        assert_eq!(config.log_level(), "debug");
        config.base.debuglevel = 10;
        assert_eq!(config.log_level(), "trace");
    }
}
