// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Drives a batch of shell commands through the overlay for the `run`
//! subcommand.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::app::errors::{AppError, AppErrorKind, codes};
use crate::app::overlay::{HpcOverlay, OverlayStats};
use crate::app::ports::{JobTimer, LocalJob};
use crate::app::timer::PhaseTimer;
use crate::app::types::{JobOutcome, JobResources};

const DEFAULT_JOB_NAME: &str = "job";
/// Scripts, outputs and result files go here, under the working directory.
const STAGING_DIR: &str = ".orbit-hpc";

/// One command of a `run` invocation.
pub struct CliJob {
    key: String,
    command: String,
    working_dir: PathBuf,
    resources: JobResources,
    caveats: Mutex<Vec<String>>,
    timer: PhaseTimer,
    outcome: watch::Sender<Option<JobOutcome>>,
}

impl CliJob {
    pub fn new(
        key: String,
        command: String,
        working_dir: PathBuf,
        resources: JobResources,
    ) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            key,
            command,
            working_dir,
            resources,
            caveats: Mutex::new(Vec::new()),
            timer: PhaseTimer::new(),
            outcome,
        })
    }

    pub fn caveats(&self) -> Vec<String> {
        self.caveats
            .lock()
            .map(|caveats| caveats.clone())
            .unwrap_or_default()
    }

    pub fn phase_timer(&self) -> &PhaseTimer {
        &self.timer
    }

    pub fn outcome(&self) -> Option<JobOutcome> {
        self.outcome.borrow().clone()
    }

    /// Resolves once the overlay reported completion.
    pub async fn wait_finished(&self) -> Option<JobOutcome> {
        let mut receiver = self.outcome.subscribe();
        let outcome = receiver.wait_for(Option::is_some).await.ok()?;
        outcome.clone()
    }
}

impl LocalJob for CliJob {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.key
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn output_prefix(&self) -> PathBuf {
        self.working_dir.join(STAGING_DIR).join(&self.key)
    }

    fn working_dir(&self) -> PathBuf {
        self.working_dir.clone()
    }

    fn resources(&self) -> JobResources {
        self.resources.clone()
    }

    fn is_skipped(&self) -> bool {
        false
    }

    fn add_caveat(&self, caveat: String) {
        if let Ok(mut caveats) = self.caveats.lock() {
            caveats.push(caveat);
        }
    }

    fn remove_caveat(&self, caveat: &str) {
        if let Ok(mut caveats) = self.caveats.lock() {
            caveats.retain(|existing| existing != caveat);
        }
    }

    fn timer(&self) -> &dyn JobTimer {
        &self.timer
    }

    fn finished(&self, outcome: JobOutcome) {
        self.outcome.send_replace(Some(outcome));
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub name: Option<String>,
    pub commands: Vec<String>,
    pub working_dir: PathBuf,
    pub resources: JobResources,
}

/// Jobs are named after `name`, numbered from 1 when there are several.
pub fn build_jobs(request: &RunRequest) -> Vec<Arc<CliJob>> {
    let base = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_JOB_NAME);
    let numbered = request.commands.len() > 1;
    request
        .commands
        .iter()
        .enumerate()
        .map(|(index, command)| {
            let key = if numbered {
                format!("{base}.{}", index + 1)
            } else {
                base.to_string()
            };
            CliJob::new(
                key,
                command.clone(),
                request.working_dir.clone(),
                request.resources.clone(),
            )
        })
        .collect()
}

#[derive(Debug)]
pub struct JobReport {
    pub key: String,
    pub command: String,
    pub outcome: Option<JobOutcome>,
    pub error: Option<AppError>,
    pub caveats: Vec<String>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.outcome.as_ref().is_some_and(|out| out.exit_code == 0)
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
    pub stats: OverlayStats,
    pub fatal: Option<AppError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.fatal.is_none() && self.jobs.iter().all(JobReport::succeeded)
    }
}

/// Submits every job held, queues them, and waits for all of them or for
/// the run to be cancelled. Jobs still alive on cancellation are killed.
pub async fn run_jobs(overlay: &HpcOverlay, jobs: &[Arc<CliJob>]) -> RunReport {
    let mut errors: Vec<Option<AppError>> = vec![None; jobs.len()];

    for (job, error) in jobs.iter().zip(errors.iter_mut()) {
        let local: Arc<dyn LocalJob> = job.clone();
        if let Err(err) = overlay.submit(&local, true).await {
            tracing::warn!(job = job.key(), "submission failed: {err}");
        }
        if overlay.run_state().is_cancelled() {
            *error = Some(cancelled_error());
        }
    }
    for (job, error) in jobs.iter().zip(errors.iter_mut()) {
        if error.is_some() {
            continue;
        }
        let local: Arc<dyn LocalJob> = job.clone();
        if let Err(err) = overlay.queue(&local).await {
            tracing::error!(job = job.key(), "failed to queue: {err}");
            *error = Some(err);
        }
    }

    let token = overlay.run_state().token().clone();
    for (job, error) in jobs.iter().zip(errors.iter()) {
        if error.is_some() {
            continue;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            outcome = job.wait_finished() => {
                if let Some(outcome) = outcome {
                    tracing::info!(job = job.key(), exit_code = outcome.exit_code, "job finished");
                }
            }
        }
    }

    if token.is_cancelled() {
        let killed = overlay
            .kill_jobs(|state| !state.state().is_terminal())
            .await;
        if killed > 0 {
            tracing::warn!(count = killed, "killed unfinished jobs");
        }
    }

    let stats = overlay.finish().await;
    let fatal = overlay.fatal_error();
    let jobs = jobs
        .iter()
        .zip(errors)
        .map(|(job, error)| {
            let outcome = job.outcome();
            let error = match (error, &outcome) {
                (Some(err), _) => Some(err),
                (None, None) => Some(fatal.clone().unwrap_or_else(cancelled_error)),
                (None, Some(_)) => None,
            };
            JobReport {
                key: job.key().to_string(),
                command: job.command().to_string(),
                outcome,
                error,
                caveats: job.caveats(),
            }
        })
        .collect();
    RunReport { jobs, stats, fatal }
}

fn cancelled_error() -> AppError {
    AppError::with_message(
        AppErrorKind::Cancelled,
        codes::CANCELED,
        "run cancelled before the job finished",
    )
}
