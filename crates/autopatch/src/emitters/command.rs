//! Spawned-command emitters.
//!
//! `command` pipes the report into an arbitrary shell command;
//! `command_email` does the same with a mail command line built from the
//! subject and recipients. Placeholders in the command line are shell
//! quoted; placeholders in the stdin text are substituted verbatim.

use super::{EmitError, Emitter};
use async_trait::async_trait;
use autopatch_common::config::{CommandEmailConfig, CommandEmitterConfig};
use autopatch_common::{Report, RunResult};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub struct CommandEmitter {
    command_format: String,
    stdin_format: String,
}

impl CommandEmitter {
    pub fn new(config: &CommandEmitterConfig) -> Self {
        Self {
            command_format: config.command_format.clone(),
            stdin_format: config.stdin_format.clone(),
        }
    }
}

#[async_trait]
impl Emitter for CommandEmitter {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn emit(&self, _result: &RunResult, report: &Report) -> Result<(), EmitError> {
        let command = substitute(
            &self.command_format,
            &[
                ("title", shell_quote(&report.title)),
                ("body", shell_quote(&report.body)),
            ],
        );
        let stdin = substitute(
            &self.stdin_format,
            &[("title", report.title.clone()), ("body", report.body.clone())],
        );
        run_shell(&command, &stdin).await
    }
}

pub struct CommandEmailEmitter {
    command_format: String,
    stdin_format: String,
    email_from: String,
    email_to: Vec<String>,
}

impl CommandEmailEmitter {
    pub fn new(config: &CommandEmailConfig) -> Self {
        Self {
            command_format: config.command_format.clone(),
            stdin_format: config.stdin_format.clone(),
            email_from: config.email_from.clone(),
            email_to: config.email_to.clone(),
        }
    }
}

#[async_trait]
impl Emitter for CommandEmailEmitter {
    fn name(&self) -> &'static str {
        "command_email"
    }

    async fn emit(&self, _result: &RunResult, report: &Report) -> Result<(), EmitError> {
        let recipients: Vec<String> = self.email_to.iter().map(|to| shell_quote(to)).collect();
        let command = substitute(
            &self.command_format,
            &[
                ("subject", shell_quote(&report.title)),
                ("body", shell_quote(&report.body)),
                ("email_from", shell_quote(&self.email_from)),
                ("email_to", recipients.join(" ")),
            ],
        );
        let stdin = substitute(
            &self.stdin_format,
            &[
                ("subject", report.title.clone()),
                ("body", report.body.clone()),
                ("email_from", self.email_from.clone()),
                ("email_to", self.email_to.join(", ")),
            ],
        );
        run_shell(&command, &stdin).await
    }
}

/// Run `sh -c command` with `stdin` piped in; non-zero exit is an error
async fn run_shell(command: &str, stdin: &str) -> Result<(), EmitError> {
    debug!("Spawning emitter command: {}", command);
    let mut child = Command::new("sh")
        .args(["-c", command])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut pipe) = child.stdin.take() {
        // A command that ignores stdin closes the pipe early
        if let Err(e) = pipe.write_all(stdin.as_bytes()).await {
            debug!("Emitter command closed stdin: {}", e);
        }
    }

    let output = child.wait_with_output().await?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(EmitError::Command {
            command: command.to_string(),
            detail: format!("{} {}", output.status, stderr.trim()),
        })
    }
}

/// Replace `{key}` placeholders in a single pass; unknown keys stay as-is
pub fn substitute(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (value, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// POSIX single-quote quoting
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopatch_common::RunMode;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_substitute_single_pass() {
        let out = substitute(
            "{title}: {body} {unknown}",
            &[("title", "T {body}".to_string()), ("body", "B".to_string())],
        );
        assert_eq!(out, "T {body}: B {unknown}");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_command_receives_report_on_stdin() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("report.txt");
        let emitter = CommandEmitter::new(&CommandEmitterConfig {
            command_format: format!("cat > {}", shell_quote(&out.to_string_lossy())),
            stdin_format: "{title}\n{body}".to_string(),
        });
        let result = RunResult::new("web01", RunMode::DownloadOnly, Utc::now());
        let report = Report::render(&result);

        emitter.emit(&result, &report).await.unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("Updates downloaded on web01\n"));
    }

    #[tokio::test]
    async fn test_failing_command_is_error() {
        let emitter = CommandEmitter::new(&CommandEmitterConfig {
            command_format: "cat >/dev/null; exit 4".to_string(),
            stdin_format: "{body}".to_string(),
        });
        let result = RunResult::new("web01", RunMode::DownloadOnly, Utc::now());
        let report = Report::render(&result);
        assert!(matches!(
            emitter.emit(&result, &report).await,
            Err(EmitError::Command { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_email_line() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("argv.txt");
        let emitter = CommandEmailEmitter::new(&CommandEmailConfig {
            command_format: format!(
                "printf '%s|' {{subject}} {{email_from}} {{email_to}} > {}",
                shell_quote(&out.to_string_lossy())
            ),
            stdin_format: "{body}".to_string(),
            email_from: "root@db01".to_string(),
            email_to: vec!["ops@example.com".to_string(), "dba@example.com".to_string()],
        });
        let result = RunResult::new("db01", RunMode::Apply, Utc::now());
        let report = Report::render(&result);

        emitter.emit(&result, &report).await.unwrap();
        let argv = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            argv,
            "Updates applied on db01|root@db01|ops@example.com|dba@example.com|"
        );
    }
}
