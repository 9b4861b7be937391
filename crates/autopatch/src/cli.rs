//! Command-line interface and exit status mapping.

use autopatch_common::config::CONFIG_PATH;
use autopatch_common::{ConfigError, ErrorKind, Outcome, RunConfig, RunResult};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Skipped or nothing to do
pub const EXIT_OK: i32 = 0;
/// Run aborted
pub const EXIT_FAILURE: i32 = 1;
/// Some packages failed, the rest went through
pub const EXIT_PARTIAL: i32 = 2;
/// Another run holds the lock (EX_TEMPFAIL)
pub const EXIT_LOCKED: i32 = 75;
/// Updates were found, downloaded or applied
pub const EXIT_CHANGES: i32 = 100;
/// Interrupted by a signal
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "autopatch")]
#[command(about = "Unattended package update runner", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(value_name = "CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Configuration file (same as the positional argument)
    #[arg(short = 'c', long = "config", value_name = "PATH", conflicts_with = "config_file")]
    pub config: Option<PathBuf>,

    /// Sleep a random time before starting (for timers)
    #[arg(long)]
    pub timer: bool,

    /// Install updates regardless of the configuration
    #[arg(long, overrides_with = "no_installupdates")]
    pub installupdates: bool,

    /// Never install updates
    #[arg(long, overrides_with = "installupdates")]
    pub no_installupdates: bool,

    /// Download updates regardless of the configuration
    #[arg(long, overrides_with = "no_downloadupdates")]
    pub downloadupdates: bool,

    /// Only report available updates
    #[arg(long, overrides_with = "downloadupdates")]
    pub no_downloadupdates: bool,

    /// More log output (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Errors only
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print the run result as JSON instead of the text report
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| self.config_file.clone())
            .unwrap_or_else(|| PathBuf::from(CONFIG_PATH))
    }

    pub fn install_override(&self) -> Option<bool> {
        flag_pair(self.installupdates, self.no_installupdates)
    }

    pub fn download_override(&self) -> Option<bool> {
        flag_pair(self.downloadupdates, self.no_downloadupdates)
    }

    /// Filter directive: `-q`/`-v` win over the configured level
    pub fn log_filter(&self, configured: &str) -> String {
        let level = if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => configured,
                1 => "debug",
                _ => "trace",
            }
        };
        level.to_string()
    }

    /// `RUST_LOG` wins over -v/-q and the configured level
    pub fn env_filter(&self, configured: &str) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_filter(configured)))
    }

    /// Load the configuration with `subscriber` active, so the loader's
    /// own log lines are not lost before the real subscriber exists.
    pub fn load_config_with<S>(&self, subscriber: S) -> Result<RunConfig, ConfigError>
    where
        S: tracing::Subscriber + Send + Sync + 'static,
    {
        let path = self.config_path();
        let config = tracing::subscriber::with_default(subscriber, || RunConfig::load_from(&path))?;
        Ok(config.with_overrides(self.download_override(), self.install_override()))
    }
}

fn flag_pair(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

pub fn exit_code(result: &RunResult) -> i32 {
    match result.outcome {
        Outcome::Skipped | Outcome::UpToDate => EXIT_OK,
        Outcome::Completed if result.has_changes() => EXIT_CHANGES,
        Outcome::Completed => EXIT_OK,
        Outcome::PartialFailure => EXIT_PARTIAL,
        Outcome::Aborted => match result.abort_kind {
            Some(ErrorKind::LockContention) => EXIT_LOCKED,
            Some(ErrorKind::Interrupted) => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopatch_common::{RunMode, Stage};
    use chrono::Utc;

    #[test]
    fn test_config_path_forms() {
        let cli = Cli::parse_from(["autopatch"]);
        assert_eq!(cli.config_path(), PathBuf::from(CONFIG_PATH));

        let cli = Cli::parse_from(["autopatch", "/tmp/a.toml"]);
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/a.toml"));

        let cli = Cli::parse_from(["autopatch", "-c", "/tmp/b.toml"]);
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/b.toml"));
    }

    #[test]
    fn test_overrides_last_one_wins() {
        let cli = Cli::parse_from(["autopatch", "--installupdates", "--no-installupdates"]);
        assert_eq!(cli.install_override(), Some(false));

        let cli = Cli::parse_from(["autopatch", "--no-downloadupdates"]);
        assert_eq!(cli.download_override(), Some(false));
        assert_eq!(cli.install_override(), None);
    }

    #[test]
    fn test_log_filter() {
        let cli = Cli::parse_from(["autopatch", "-vv"]);
        assert_eq!(cli.log_filter("info"), "trace");
        let cli = Cli::parse_from(["autopatch", "-q"]);
        assert_eq!(cli.log_filter("info"), "error");
        let cli = Cli::parse_from(["autopatch"]);
        assert_eq!(cli.log_filter("warn"), "warn");
        assert!(Cli::try_parse_from(["autopatch", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let mut result = RunResult::new("h", RunMode::Apply, Utc::now());
        assert_eq!(exit_code(&result), EXIT_OK);

        result.considered.push(crate::backend::FakeBackend::candidate("bash", "updates"));
        assert_eq!(exit_code(&result), EXIT_CHANGES);

        result.outcome = Outcome::PartialFailure;
        assert_eq!(exit_code(&result), EXIT_PARTIAL);

        let mut locked = RunResult::new("h", RunMode::Apply, Utc::now());
        locked.abort(Stage::Lock, ErrorKind::LockContention, "held");
        assert_eq!(exit_code(&locked), EXIT_LOCKED);

        let mut interrupted = RunResult::new("h", RunMode::Apply, Utc::now());
        interrupted.abort(Stage::Download, ErrorKind::Interrupted, "signal");
        assert_eq!(exit_code(&interrupted), EXIT_INTERRUPTED);

        let mut failed = RunResult::new("h", RunMode::Apply, Utc::now());
        failed.abort(Stage::Refresh, ErrorKind::MetadataUnavailable, "down");
        assert_eq!(exit_code(&failed), EXIT_FAILURE);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_load_logs_reach_bootstrap_subscriber() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("autopatch.toml");
        let cli = Cli::parse_from([
            "autopatch",
            "--installupdates",
            missing.to_str().unwrap(),
        ]);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("info"))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = cli.load_config_with(subscriber).unwrap();
        assert!(config.commands.apply_updates);

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("No config at"), "{}", output);
        assert!(output.contains(missing.to_str().unwrap()));
    }
}
