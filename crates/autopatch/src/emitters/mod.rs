//! Emitter Fan-out - delivers the run report to every configured sink.
//!
//! Emitters run independently: one failing (or hanging past the emitter
//! timeout) is logged and counted, never stops the others, and never
//! changes the run outcome.

pub mod command;
pub mod email;
pub mod motd;
pub mod stdio;
pub mod syslog;

use async_trait::async_trait;
use autopatch_common::{EmitterKind, Outcome, Report, RunConfig, RunResult};
use futures::future::join_all;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use command::{CommandEmailEmitter, CommandEmitter};
pub use email::EmailEmitter;
pub use motd::MotdEmitter;
pub use stdio::StdioEmitter;
pub use syslog::SyslogEmitter;

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command '{command}' failed: {detail}")]
    Command { command: String, detail: String },

    #[error("mail delivery failed: {0}")]
    Mail(String),

    #[error("invalid emitter configuration: {0}")]
    Config(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// One report sink
#[async_trait]
pub trait Emitter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn emit(&self, result: &RunResult, report: &Report) -> Result<(), EmitError>;

    /// Called instead of `emit` when an up-to-date run is not reported
    async fn clear(&self) -> Result<(), EmitError> {
        Ok(())
    }
}

/// Which emitters delivered and which failed
#[derive(Debug, Default)]
pub struct EmitSummary {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

pub struct EmitterSet {
    emitters: Vec<Box<dyn Emitter>>,
    emit_when_up_to_date: bool,
    timeout: Duration,
}

impl EmitterSet {
    pub fn new(emitters: Vec<Box<dyn Emitter>>, emit_when_up_to_date: bool, timeout: Duration) -> Self {
        Self {
            emitters,
            emit_when_up_to_date,
            timeout,
        }
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, EmitError> {
        let mut emitters: Vec<Box<dyn Emitter>> = Vec::new();
        for kind in &config.emitters.emit_via {
            let emitter: Box<dyn Emitter> = match kind {
                EmitterKind::Stdio => Box::new(StdioEmitter::new()),
                EmitterKind::Email => Box::new(EmailEmitter::from_config(&config.email)?),
                EmitterKind::Syslog => Box::new(SyslogEmitter::new(&config.syslog)),
                EmitterKind::Motd => Box::new(MotdEmitter::new(&config.motd.path)),
                EmitterKind::Command => Box::new(CommandEmitter::new(&config.command)),
                EmitterKind::CommandEmail => {
                    Box::new(CommandEmailEmitter::new(&config.command_email))
                }
            };
            emitters.push(emitter);
        }
        Ok(Self::new(
            emitters,
            config.emitters.emit_when_up_to_date,
            Duration::from_secs(config.emitters.timeout_secs),
        ))
    }

    /// Drop every emitter of the given name (`--json` replaces stdio)
    pub fn without(mut self, name: &str) -> Self {
        self.emitters.retain(|e| e.name() != name);
        self
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    /// Whether a run with this outcome is reported at all
    pub fn should_emit(&self, result: &RunResult) -> bool {
        match result.outcome {
            Outcome::Skipped => false,
            Outcome::UpToDate => self.emit_when_up_to_date,
            _ => true,
        }
    }

    pub async fn emit(&self, result: &RunResult) -> EmitSummary {
        let mut summary = EmitSummary::default();

        if result.outcome == Outcome::Skipped {
            debug!("Skipped run, nothing to emit");
            return summary;
        }

        if !self.should_emit(result) {
            debug!("Up to date, clearing stale notices");
            for emitter in &self.emitters {
                if let Err(e) = emitter.clear().await {
                    warn!("Emitter {} failed to clear: {}", emitter.name(), e);
                }
            }
            return summary;
        }

        let report = Report::render(result);
        let outcomes = join_all(self.emitters.iter().map(|emitter| {
            let report = &report;
            async move {
                let outcome = match tokio::time::timeout(self.timeout, emitter.emit(result, report)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EmitError::Timeout(self.timeout.as_secs())),
                };
                (emitter.name(), outcome)
            }
        }))
        .await;

        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!("Emitter {} delivered", name);
                    summary.delivered.push(name);
                }
                Err(e) => {
                    warn!("Emitter {} failed: {}", name, e);
                    summary.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            "Report delivered by {} of {} emitters",
            summary.delivered.len(),
            self.emitters.len()
        );
        summary
    }
}
