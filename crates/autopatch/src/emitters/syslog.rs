//! One summary line per run through logger(1).

use super::{EmitError, Emitter};
use async_trait::async_trait;
use autopatch_common::config::SyslogConfig;
use autopatch_common::report::summary_line;
use autopatch_common::{Outcome, Report, RunResult};
use tokio::process::Command;

pub struct SyslogEmitter {
    tag: String,
    facility: String,
}

impl SyslogEmitter {
    pub fn new(config: &SyslogConfig) -> Self {
        Self {
            tag: config.tag.clone(),
            facility: config.facility.clone(),
        }
    }

    fn priority(&self, outcome: Outcome) -> String {
        let level = match outcome {
            Outcome::Aborted => "err",
            Outcome::PartialFailure => "warning",
            _ => "info",
        };
        format!("{}.{}", self.facility, level)
    }
}

#[async_trait]
impl Emitter for SyslogEmitter {
    fn name(&self) -> &'static str {
        "syslog"
    }

    async fn emit(&self, result: &RunResult, _report: &Report) -> Result<(), EmitError> {
        let priority = self.priority(result.outcome);
        let output = Command::new("logger")
            .args(["-t", self.tag.as_str(), "-p", priority.as_str(), "--"])
            .arg(summary_line(result))
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EmitError::Command {
                command: "logger".to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
