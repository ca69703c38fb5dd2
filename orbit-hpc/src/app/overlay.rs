// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::dispatch::CommandDispatcher;
use crate::app::errors::AppError;
use crate::app::ports::{ClockPort, LocalFilesystemPort, LocalJob, SchedulerBackend};
use crate::app::registry::JobRegistry;
use crate::app::types::{ContainerSpec, JobState};

/// Knobs of the overlay that are not about transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySettings {
    /// Submit held first and release on `queue`.
    pub hold_on_submit: bool,
    pub poll_interval: Duration,
    /// Jobs per status query.
    pub status_batch_size: usize,
    /// Status passes a finished job may wait for its result file.
    pub result_wait_passes: u32,
    pub account: Option<String>,
    pub container: Option<ContainerSpec>,
    /// Replaces the built-in submission script template.
    pub script_template: Option<String>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            hold_on_submit: true,
            poll_interval: Duration::from_secs(10),
            status_batch_size: 25,
            result_wait_passes: 3,
            account: None,
            container: None,
            script_template: None,
        }
    }
}

/// Run-wide cancellation plus the first fatal error, if any.
#[derive(Default)]
pub struct RunState {
    token: CancellationToken,
    fatal: Mutex<Option<AppError>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Records `err` unless an earlier one is already there, then cancels.
    pub fn set_fatal(&self, err: AppError) {
        if let Ok(mut slot) = self.fatal.lock() {
            slot.get_or_insert(err);
        }
        self.token.cancel();
    }

    pub fn fatal(&self) -> Option<AppError> {
        self.fatal.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Per-state job counts at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OverlayStats {
    pub waiting: usize,
    pub held: usize,
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub killed: usize,
    pub resubmitted: usize,
    pub failed: usize,
}

impl OverlayStats {
    pub fn total(&self) -> usize {
        self.waiting + self.held + self.queued + self.running + self.done + self.killed
    }
}

/// Runs local jobs on a remote batch scheduler.
///
/// Cheap to clone; clones share the registry, pools, sessions and the
/// background poller.
#[derive(Clone)]
pub struct HpcOverlay {
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) dispatcher: Arc<CommandDispatcher>,
    pub(crate) fs: Arc<dyn LocalFilesystemPort>,
    pub(crate) clock: Arc<dyn ClockPort>,
    pub(crate) settings: Arc<OverlaySettings>,
    pub(crate) run: Arc<RunState>,
    pub(crate) poller: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HpcOverlay {
    pub fn new(
        dispatcher: CommandDispatcher,
        fs: Arc<dyn LocalFilesystemPort>,
        clock: Arc<dyn ClockPort>,
        settings: OverlaySettings,
    ) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            dispatcher: Arc::new(dispatcher),
            fs,
            clock,
            settings: Arc::new(settings),
            run: Arc::new(RunState::new()),
            poller: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn backend(&self) -> &Arc<dyn SchedulerBackend> {
        self.dispatcher.backend()
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Local slots a job occupies. The real resources are remote.
    pub fn slots_used(&self, _job: &dyn LocalJob) -> u32 {
        1
    }

    /// Stops the run early, e.g. on SIGINT.
    pub fn cancel(&self) {
        self.run.cancel();
    }

    pub fn fatal_error(&self) -> Option<AppError> {
        self.run.fatal()
    }

    pub(crate) fn id_caveat(&self, id: &str) -> String {
        format!("{} id {id}", self.backend().name())
    }

    pub async fn stats(&self) -> OverlayStats {
        let mut stats = OverlayStats::default();
        for job in self.registry.snapshot().await {
            let state = job.lock().await;
            match state.state() {
                JobState::Waiting => stats.waiting += 1,
                JobState::Held => stats.held += 1,
                JobState::Queued => stats.queued += 1,
                JobState::Running => stats.running += 1,
                JobState::Done => stats.done += 1,
                JobState::Killed => stats.killed += 1,
            }
            if state.num_resubmit() > 0 {
                stats.resubmitted += 1;
            }
            if state.exit_code().is_some_and(|code| code != 0) {
                stats.failed += 1;
            }
        }
        stats
    }

    /// End of run: cancels speculative held submissions, stops the poller
    /// and closes every cached connection.
    pub async fn finish(&self) -> OverlayStats {
        let swept = self.cancel_held().await;
        if swept > 0 {
            tracing::info!(count = swept, "cancelled held submissions at end of run");
        }
        self.run.cancel();
        let handle = self.poller.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!("status poller ended abnormally: {err}");
            }
        }
        self.dispatcher.sessions().shutdown_all().await;
        self.stats().await
    }
}
