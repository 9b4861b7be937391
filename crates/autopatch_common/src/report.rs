//! Human-readable run report.
//!
//! Every emitter sends the same rendering: a one-line title plus a body
//! carrying the timestamp, outcome, counts, reboot recommendation and the
//! package and failure lists.

use crate::types::{FailureRecord, Outcome, RunMode, RunResult, UpdateCandidate};
use std::fmt::Write;

/// Rendered report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub body: String,
}

impl Report {
    pub fn render(result: &RunResult) -> Self {
        Self {
            title: title(result),
            body: body(result),
        }
    }

    /// Title and body separated by a blank line
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

pub fn title(result: &RunResult) -> String {
    let system = &result.system_name;
    match result.outcome {
        Outcome::Aborted => format!("Update run failed on {}", system),
        Outcome::Skipped | Outcome::UpToDate => format!("No updates on {}", system),
        Outcome::Completed | Outcome::PartialFailure => {
            let base = match result.mode {
                RunMode::ReportOnly => format!("Updates available on {}", system),
                RunMode::DownloadOnly => format!("Updates downloaded on {}", system),
                RunMode::Apply => format!("Updates applied on {}", system),
            };
            if result.outcome == Outcome::PartialFailure {
                format!("{} (with errors)", base)
            } else {
                base
            }
        }
    }
}

/// One line for syslog-style sinks
pub fn summary_line(result: &RunResult) -> String {
    format!(
        "{}: {} (mode {}): {}; {}",
        result.system_name,
        result.outcome,
        result.mode.as_str(),
        counts(result),
        reboot_text(result)
    )
}

fn counts(result: &RunResult) -> String {
    format!(
        "{} considered, {} downloaded, {} applied, {} failed",
        result.considered.len(),
        result.downloaded.len(),
        result.applied.len(),
        result.failed_count()
    )
}

fn reboot_text(result: &RunResult) -> String {
    let reboot = &result.reboot;
    if reboot.recommended {
        let mut text = format!("reboot recommended ({})", reboot.reason);
        if reboot.triggered {
            text.push_str(", reboot triggered");
        }
        text
    } else {
        "reboot not recommended".to_string()
    }
}

fn body(result: &RunResult) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Run started:  {}", result.started_at.to_rfc3339());
    if let Some(finished) = result.finished_at {
        let _ = writeln!(out, "Run finished: {}", finished.to_rfc3339());
    }
    let outcome = match result.abort_kind {
        Some(kind) => format!("{} ({})", result.outcome, kind),
        None => result.outcome.to_string(),
    };
    let _ = writeln!(out, "Outcome:      {}", outcome);
    let _ = writeln!(out, "Mode:         {}", result.mode.as_str());
    let _ = writeln!(out, "Packages:     {}", counts(result));
    let _ = writeln!(out, "Reboot:       {}", reboot_text(result));

    if !result.considered.is_empty() {
        let header = match result.mode {
            RunMode::ReportOnly => "The following updates are available:",
            RunMode::DownloadOnly => "The following updates were considered for download:",
            RunMode::Apply => "The following updates were considered for installation:",
        };
        let _ = writeln!(out, "\n{}", header);
        for candidate in &result.considered {
            let _ = writeln!(out, "  {}{}", package_line(candidate), status_marker(result, candidate));
        }
    }

    if !result.failures.is_empty() {
        let _ = writeln!(out, "\nFailures:");
        for failure in &result.failures {
            let _ = writeln!(out, "  {}", failure_line(failure));
        }
    }

    if !result.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in &result.warnings {
            let _ = writeln!(out, "  {}", failure_line(warning));
        }
    }

    out
}

fn package_line(candidate: &UpdateCandidate) -> String {
    let old = candidate.old_version.as_deref().unwrap_or("(new)");
    let mut line = format!(
        "{}.{} {} -> {} [{}]",
        candidate.name, candidate.arch, old, candidate.new_version, candidate.repo
    );
    if let Some(advisory) = &candidate.advisory {
        let _ = write!(line, " {} {}", advisory.id, advisory.kind.as_str());
        if let Some(severity) = advisory.severity {
            let _ = write!(line, "/{}", severity.as_str());
        }
    }
    line
}

fn status_marker(result: &RunResult, candidate: &UpdateCandidate) -> &'static str {
    let same = |c: &UpdateCandidate| c.name == candidate.name && c.arch == candidate.arch;
    if result.applied.iter().any(same) {
        " (applied)"
    } else if result.downloaded.iter().any(same) {
        " (downloaded)"
    } else if result
        .failed_packages()
        .any(|f| f.package.as_ref() == Some(&candidate.id()))
    {
        " (failed)"
    } else {
        ""
    }
}

fn failure_line(failure: &FailureRecord) -> String {
    match &failure.package {
        Some(package) => format!(
            "[{}] {}: {} ({})",
            failure.stage.as_str(),
            package,
            failure.reason,
            failure.kind
        ),
        None => format!(
            "[{}] {} ({})",
            failure.stage.as_str(),
            failure.reason,
            failure.kind
        ),
    }
}
