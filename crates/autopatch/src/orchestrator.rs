//! Run Orchestrator - the top-level state machine of one update run.
//!
//! Idle → Locking → IntervalCheck → Refreshing → Querying →
//! {UpToDate | Downloading} → {Applying | DownloadOnlyDone} →
//! EvaluatingReboot → Emitting → Persisting → Done, with Aborted reachable
//! from every state. The process lock is held for the whole run and
//! released on every path when the handle drops.

use crate::backend::{HostState, PackageBackend};
use crate::cancel::CancelToken;
use crate::emitters::EmitterSet;
use crate::error::RunError;
use crate::stages::{reboot, ApplyStage, DownloadStage, MetadataRefresher, UpdateQuery};
use autopatch_common::{
    is_due, ErrorKind, LockError, Outcome, ProcessLock, RunConfig, RunMode, RunResult, Stage,
    TimestampStore,
};
use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Locking,
    IntervalCheck,
    Refreshing,
    Querying,
    UpToDate,
    Downloading,
    Applying,
    DownloadOnlyDone,
    EvaluatingReboot,
    Emitting,
    Persisting,
    Done,
    Aborted,
}

/// How far the pipeline got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Interval gate said not due
    Skipped,
    /// Aborted before the update query completed
    Stopped,
    /// Update query completed
    Queried,
}

pub struct Orchestrator {
    config: RunConfig,
    backend: Arc<dyn PackageBackend>,
    host: Arc<dyn HostState>,
    emitters: EmitterSet,
    timestamps: TimestampStore,
    lock: ProcessLock,
    timer: bool,
    network_poll: Duration,
    history: Vec<RunState>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        backend: Arc<dyn PackageBackend>,
        host: Arc<dyn HostState>,
        emitters: EmitterSet,
        timestamps: TimestampStore,
        lock: ProcessLock,
    ) -> Self {
        Self {
            config,
            backend,
            host,
            emitters,
            timestamps,
            lock,
            timer: false,
            network_poll: Duration::from_secs(1),
            history: Vec::new(),
        }
    }

    /// Timer mode: random sleep after the interval gate
    pub fn with_timer(mut self, timer: bool) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_network_poll_interval(mut self, interval: Duration) -> Self {
        self.network_poll = interval;
        self
    }

    /// States visited by the last run, in order
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, state: RunState) {
        debug!("Run state -> {:?}", state);
        self.history.push(state);
    }

    pub async fn run(&mut self, cancel: CancelToken) -> RunResult {
        self.history.clear();
        self.transition(RunState::Idle);

        let started = Utc::now();
        let mode = self.config.run_mode();
        let mut result = RunResult::new(self.config.system_name(), mode, started);
        info!(
            "Starting update run on {} (mode {}, scope {})",
            result.system_name,
            mode.as_str(),
            self.config.upgrade_scope()
        );

        self.transition(RunState::Locking);
        let lock = match self.lock.acquire() {
            Ok(lock) => Some(lock),
            Err(e @ LockError::AlreadyRunning { .. }) => {
                // The other run owns the timestamp and the notices
                warn!("{}", e);
                result.abort(Stage::Lock, ErrorKind::LockContention, e.to_string());
                return self.finish(result);
            }
            Err(e) => {
                warn!("{}", e);
                result.abort(Stage::Lock, ErrorKind::Collaborator, e.to_string());
                None
            }
        };

        let progress = if lock.is_some() {
            self.pipeline(&mut result, &cancel).await
        } else {
            Progress::Stopped
        };

        if progress == Progress::Skipped {
            return self.finish(result);
        }

        result.finished_at = Some(Utc::now());

        self.transition(RunState::Emitting);
        let summary = self.emitters.emit(&result).await;
        for (name, reason) in summary.failed {
            result.record_warning(
                Stage::Emit,
                ErrorKind::EmitterFailure,
                format!("{}: {}", name, reason),
            );
        }

        // The package set may differ from what was reported; retry next time
        let unsettled = result.is_aborted_with(ErrorKind::Interrupted)
            || result.is_aborted_with(ErrorKind::TransactionStateUnknown);
        if progress == Progress::Queried && !unsettled {
            self.transition(RunState::Persisting);
            let now = Utc::now();
            match self.timestamps.write_last_run(now) {
                Ok(()) => debug!("Last run recorded at {}", now.to_rfc3339()),
                Err(e) => {
                    warn!("{}", e);
                    result.record_warning(
                        Stage::Persist,
                        ErrorKind::TimestampPersistenceFailure,
                        e.to_string(),
                    );
                }
            }
        }

        if result.reboot.recommended && self.config.commands.trigger_reboot && !unsettled {
            info!("Triggering reboot: {}", result.reboot.reason);
            match self.host.trigger_reboot(&self.config.commands.reboot_command).await {
                Ok(()) => result.reboot.triggered = true,
                Err(e) => {
                    warn!("Reboot command failed: {:#}", e);
                    result.record_warning(
                        Stage::Reboot,
                        ErrorKind::Collaborator,
                        format!("reboot command failed: {:#}", e),
                    );
                }
            }
        }

        drop(lock);
        self.finish(result)
    }

    fn finish(&mut self, mut result: RunResult) -> RunResult {
        if result.finished_at.is_none() {
            result.finished_at = Some(Utc::now());
        }
        let last = if result.outcome == Outcome::Aborted {
            RunState::Aborted
        } else {
            RunState::Done
        };
        self.transition(last);
        info!(
            "Run finished: {} ({} considered, {} downloaded, {} applied, {} failed)",
            result.outcome,
            result.considered.len(),
            result.downloaded.len(),
            result.applied.len(),
            result.failed_count()
        );
        result
    }

    /// Everything between the lock and the emitters
    async fn pipeline(&mut self, result: &mut RunResult, cancel: &CancelToken) -> Progress {
        // Interval gate
        self.transition(RunState::IntervalCheck);
        let last = self.timestamps.read_last_run();
        if !is_due(last, result.started_at, self.config.min_interval()) {
            let reason = match last {
                Some(at) => format!("last run at {}", at.to_rfc3339()),
                None => "last run too recent".to_string(),
            };
            info!("Skipping run: {}", reason);
            result.outcome = Outcome::Skipped;
            result.record_warning(Stage::IntervalCheck, ErrorKind::IntervalNotElapsed, reason);
            return Progress::Skipped;
        }

        if self.timer && self.config.commands.random_sleep_secs > 0 {
            let secs = rand::thread_rng().gen_range(0..=self.config.commands.random_sleep_secs);
            info!("Timer mode: sleeping {}s before starting", secs);
            if guarded(cancel, tokio::time::sleep(Duration::from_secs(secs)))
                .await
                .is_err()
            {
                interrupt(result, Stage::IntervalCheck);
                return Progress::Stopped;
            }
        }

        if self.config.commands.network_online_timeout_secs > 0
            && self.wait_for_network(cancel).await.is_err()
        {
            interrupt(result, Stage::Refresh);
            return Progress::Stopped;
        }

        // Metadata
        self.transition(RunState::Refreshing);
        let backend = self.backend.clone();
        let metadata_timeout = Duration::from_secs(self.config.commands.metadata_timeout_secs);
        let refresher =
            MetadataRefresher::new(backend.as_ref(), &self.config.base.repos, metadata_timeout);
        let refreshed = guarded(
            cancel,
            refresher.ensure_fresh(self.config.metadata_max_age(), Utc::now()),
        )
        .await
        .and_then(|r| r);
        let summary = match refreshed {
            Ok(summary) => summary,
            Err(e) => {
                abort(result, Stage::Refresh, &e);
                return Progress::Stopped;
            }
        };
        for (repo, reason) in &summary.failed {
            result.record_warning(
                Stage::Refresh,
                ErrorKind::PartialMetadataDegradation,
                format!("{}: {}", repo, reason),
            );
        }

        // Query
        self.transition(RunState::Querying);
        let scope = self.config.upgrade_scope();
        let query = UpdateQuery::new(
            backend.as_ref(),
            &scope,
            &self.config.base.excludepkgs,
            metadata_timeout,
        );
        let queried = guarded(cancel, query.list_candidates(&summary.available))
            .await
            .and_then(|r| r);
        let candidates = match queried {
            Ok(candidates) => candidates,
            Err(e) => {
                abort(result, Stage::Query, &e);
                return Progress::Stopped;
            }
        };

        if candidates.is_empty() {
            self.transition(RunState::UpToDate);
            info!("System is up to date");
            result.outcome = Outcome::UpToDate;
            return Progress::Queried;
        }
        result.considered = candidates;

        if result.mode == RunMode::ReportOnly {
            info!("{} updates available (report only)", result.considered.len());
            result.outcome = Outcome::Completed;
            self.transition(RunState::EvaluatingReboot);
            return Progress::Queried;
        }

        // Download
        self.transition(RunState::Downloading);
        let stage = DownloadStage::new(backend.clone(), self.config.download.clone());
        let downloaded = guarded(cancel, stage.download(&result.considered)).await;
        let report = match downloaded {
            Ok(report) => report,
            Err(e) => {
                abort(result, Stage::Download, &e);
                return Progress::Queried;
            }
        };
        result.downloaded = report
            .succeeded
            .iter()
            .map(|a| a.candidate.clone())
            .collect();
        for failure in &report.failed {
            result.record_failure(
                Stage::Download,
                Some(failure.candidate.id()),
                ErrorKind::DownloadFailure,
                failure.reason.clone(),
            );
        }
        let any_download_failed = !report.failed.is_empty();

        if result.mode == RunMode::DownloadOnly {
            self.transition(RunState::DownloadOnlyDone);
            result.outcome = if any_download_failed {
                Outcome::PartialFailure
            } else {
                Outcome::Completed
            };
            self.transition(RunState::EvaluatingReboot);
            return Progress::Queried;
        }

        // Apply
        self.transition(RunState::Applying);
        let apply_timeout = Duration::from_secs(self.config.apply.timeout_secs);
        let applied = guarded(
            cancel,
            ApplyStage::new(backend.as_ref(), apply_timeout).apply(&report.succeeded),
        )
        .await;
        match applied {
            Err(e) => {
                warn!("Interrupted during apply; transaction state unknown");
                abort(result, Stage::Apply, &e);
                return Progress::Queried;
            }
            Ok(Ok(applied)) => {
                result.applied = applied;
                result.outcome = if any_download_failed {
                    Outcome::PartialFailure
                } else {
                    Outcome::Completed
                };
            }
            Ok(Err(e)) if e.state_unknown() => {
                warn!("{}; transaction state unknown", e);
                result.abort(Stage::Apply, ErrorKind::TransactionStateUnknown, e.to_string());
                return Progress::Queried;
            }
            Ok(Err(e)) => {
                if any_download_failed {
                    result.record_failure(
                        Stage::Apply,
                        None,
                        ErrorKind::TransactionRejected,
                        e.to_string(),
                    );
                    result.outcome = Outcome::PartialFailure;
                } else {
                    result.abort(Stage::Apply, ErrorKind::TransactionRejected, e.to_string());
                    return Progress::Queried;
                }
            }
        }

        // Reboot
        self.transition(RunState::EvaluatingReboot);
        let host = self.host.clone();
        let evaluated = guarded(
            cancel,
            reboot::evaluate(self.config.commands.reboot, &result.applied, host.as_ref()),
        )
        .await;
        match evaluated {
            Ok(Ok(recommendation)) => {
                if recommendation.recommended {
                    info!("Reboot recommended: {}", recommendation.reason);
                }
                result.reboot = recommendation;
            }
            Ok(Err(e)) => {
                warn!("Reboot check failed: {:#}", e);
                result.record_warning(
                    Stage::Reboot,
                    ErrorKind::Collaborator,
                    format!("reboot check failed: {:#}", e),
                );
            }
            Err(e) => abort(result, Stage::Reboot, &e),
        }

        Progress::Queried
    }

    /// Poll the host until a network is up; gives up (and carries on)
    /// after the configured timeout
    async fn wait_for_network(&self, cancel: &CancelToken) -> Result<(), RunError> {
        let timeout = Duration::from_secs(self.config.commands.network_online_timeout_secs);
        let deadline = Instant::now() + timeout;
        loop {
            if guarded(cancel, self.host.network_online()).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(
                    "No network after {}s, continuing anyway",
                    timeout.as_secs()
                );
                return Ok(());
            }
            debug!("Waiting for network");
            guarded(cancel, tokio::time::sleep(self.network_poll)).await?;
        }
    }

}

fn abort(result: &mut RunResult, stage: Stage, error: &RunError) {
    warn!("Run aborted at {}: {}", stage.as_str(), error);
    result.abort(stage, error.kind(), error.to_string());
}

fn interrupt(result: &mut RunResult, stage: Stage) {
    warn!("Run interrupted at {}", stage.as_str());
    result.abort(stage, ErrorKind::Interrupted, RunError::Interrupted.to_string());
}

/// Race `fut` against cancellation; cancellation wins ties
async fn guarded<F: Future>(cancel: &CancelToken, fut: F) -> Result<F::Output, RunError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::Interrupted),
        output = fut => Ok(output),
    }
}
