// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::job::{HpcJob, HpcJobState};
use crate::app::overlay::HpcOverlay;
use crate::app::ports::LocalJob;
use crate::app::services::terminator::parse_result_file;
use crate::app::types::{ExecCategory, JobOutcome, JobPaths, JobState, RemoteStatus};

/// Consecutive failed passes after which the run is aborted.
const MAX_FAILED_PASSES: u32 = 2;

impl HpcOverlay {
    /// Spawns the status poller unless it is already running.
    pub(crate) fn ensure_poller(&self) {
        if self.run.is_cancelled() {
            return;
        }
        let Ok(mut slot) = self.poller.lock() else {
            return;
        };
        if slot.is_none() {
            let overlay = self.clone();
            *slot = Some(tokio::spawn(async move { overlay.poll_loop().await }));
        }
    }

    async fn poll_loop(self) {
        let token = self.run.token().clone();
        let mut failed_passes = 0;
        tracing::debug!(interval = ?self.settings.poll_interval, "status poller started");
        loop {
            if token.is_cancelled() {
                break;
            }
            match self.poll_once().await {
                Ok(_) => failed_passes = 0,
                Err(err) => {
                    failed_passes += 1;
                    if failed_passes >= MAX_FAILED_PASSES {
                        tracing::error!(
                            "status polling failed {failed_passes} times in a row: {err}"
                        );
                        let mut fatal = AppError::with_message(
                            AppErrorKind::Aborted,
                            codes::FATAL_POLLING,
                            format!("cannot observe remote job status: {}", err.message()),
                        );
                        if let Some(context) = err.context() {
                            fatal = fatal.with_context(context.to_string());
                        }
                        self.run.set_fatal(fatal);
                        break;
                    }
                    tracing::warn!("status pass failed, will try again: {err}");
                }
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        tracing::debug!("status poller stopped");
    }

    /// One pass over all queued and running jobs. Returns the number of
    /// status queries issued; fails when any of them failed.
    pub async fn poll_once(&self) -> AppResult<usize> {
        let mut active = Vec::new();
        for hpc in self.registry.snapshot().await {
            let id = {
                let state = hpc.lock().await;
                if !state.state().is_polled() {
                    continue;
                }
                state.id().map(str::to_string)
            };
            if let Some(id) = id {
                active.push((hpc, id));
            }
        }

        let mut batches = 0;
        let mut failure = None;
        for batch in active.chunks(self.settings.status_batch_size.max(1)) {
            batches += 1;
            if let Err(err) = self.update_batch(batch).await {
                failure = Some(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(batches),
        }
    }

    async fn update_batch(&self, batch: &[(Arc<HpcJob>, String)]) -> AppResult<()> {
        let ids: Vec<String> = batch.iter().map(|(_, id)| id.clone()).collect();
        let statuses = self.query_statuses(&ids).await?;
        let now = self.clock.now_utc();
        for (hpc, id) in batch {
            // Jobs the scheduler no longer lists have left the queue.
            let status =
                lookup_status(&statuses, id).unwrap_or(RemoteStatus::Finished { exit_code: None });
            if let Some(outcome) = self.apply_status(hpc, id, status, now).await? {
                hpc.local().finished(outcome);
            }
        }
        Ok(())
    }

    /// Status of every listed id. When the scheduler rejects the batch
    /// because some ids were purged, the ids are asked about one at a time
    /// and the purged ones are left out.
    async fn query_statuses(&self, ids: &[String]) -> AppResult<HashMap<String, RemoteStatus>> {
        if let Some(statuses) = self.status_listing(ids).await? {
            return Ok(statuses);
        }
        if ids.len() == 1 {
            return Ok(HashMap::new());
        }
        let mut statuses = HashMap::new();
        for id in ids {
            if let Some(listed) = self.status_listing(std::slice::from_ref(id)).await? {
                statuses.extend(listed);
            }
        }
        Ok(statuses)
    }

    /// `None` when the query failed only because of unknown ids.
    async fn status_listing(
        &self,
        ids: &[String],
    ) -> AppResult<Option<HashMap<String, RemoteStatus>>> {
        let command = self.backend().status_command(ids);
        let outcome = self.dispatcher.execute(ExecCategory::Status, &command).await?;
        if outcome.success() {
            return Ok(Some(self.backend().parse_status(&outcome.stdout)));
        }
        let failure = outcome.failure_text();
        if self.backend().is_unknown_job_failure(&failure) {
            tracing::debug!(ids = ?ids, "scheduler no longer knows some ids: {failure}");
            return Ok(None);
        }
        Err(AppError::remote_command(
            codes::STATUS_FAILED,
            "status query",
            &outcome.qualified_command,
            &failure,
        ))
    }

    async fn apply_status(
        &self,
        hpc: &HpcJob,
        id: &str,
        status: RemoteStatus,
        now: OffsetDateTime,
    ) -> AppResult<Option<JobOutcome>> {
        let local = hpc.local();
        let mut state = hpc.lock().await;
        // Killed or resubmitted since the snapshot.
        if state.id() != Some(id) || !state.state().is_polled() {
            return Ok(None);
        }
        match status {
            RemoteStatus::Queued => {
                if state.state() == JobState::Running {
                    tracing::info!(job = local.key(), remote_id = id, "requeued");
                    state.set_queued(local.timer(), now)?;
                }
                Ok(None)
            }
            RemoteStatus::Running => {
                if state.state() == JobState::Queued {
                    tracing::info!(job = local.key(), remote_id = id, "running");
                    state.set_running(local.timer(), now)?;
                }
                Ok(None)
            }
            RemoteStatus::Finished { exit_code } => {
                self.complete(local.as_ref(), &mut state, exit_code, now).await
            }
        }
    }

    async fn complete(
        &self,
        local: &dyn LocalJob,
        state: &mut HpcJobState,
        reported: Option<i32>,
        now: OffsetDateTime,
    ) -> AppResult<Option<JobOutcome>> {
        let paths = JobPaths::from_prefix(&local.output_prefix());
        let contents = match self.fs.read_to_string(&paths.result).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(job = local.key(), "cannot read result file: {err}");
                None
            }
        };
        let terminator = state.terminator().unwrap_or_default();
        let from_file = contents
            .as_deref()
            .and_then(|contents| parse_result_file(contents, terminator));

        if state.state() == JobState::Queued {
            state.set_running(local.timer(), now)?;
        }
        let exit_code = match from_file {
            Some(code) => code,
            None => {
                let passes = state.bump_pending_result();
                if passes <= self.settings.result_wait_passes {
                    tracing::debug!(
                        job = local.key(),
                        passes,
                        "waiting for result file {}",
                        paths.result.display()
                    );
                    return Ok(None);
                }
                let message = format!(
                    "result file {} incomplete after {} status passes",
                    paths.result.display(),
                    passes - 1
                );
                tracing::warn!(job = local.key(), "{message}");
                state.record_internal_error(message);
                reported.unwrap_or(1)
            }
        };
        state.set_done(local.timer(), exit_code, now)?;
        tracing::info!(job = local.key(), remote_id = ?state.id(), exit_code, "done");
        Ok(Some(JobOutcome {
            exit_code,
            command: state.attributed_command().map(str::to_string),
            remote_id: state.id().map(str::to_string),
        }))
    }
}

/// Exact match first, then by the numeric part (`123` vs `123.server`).
fn lookup_status(statuses: &HashMap<String, RemoteStatus>, id: &str) -> Option<RemoteStatus> {
    if let Some(status) = statuses.get(id) {
        return Some(*status);
    }
    let short = short_id(id);
    statuses
        .iter()
        .find(|(candidate, _)| short_id(candidate) == short)
        .map(|(_, status)| *status)
}

fn short_id(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}
