// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};

use crate::app::errors::{AppResult, internal};
use crate::app::ports::{JobTimer, LocalJob};
use crate::app::types::{JobState, PHASE_QUEUED, PHASE_RUNNING};

/// Edges of the job lifecycle. `done`/`killed` only lead back to `waiting`
/// through an explicit resubmission.
pub fn transition_allowed(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Waiting, Held)
            | (Waiting, Queued)
            | (Held, Queued)
            | (Queued, Running)
            | (Running, Queued)
            | (Running, Done)
            | (Held, Killed)
            | (Queued, Killed)
            | (Running, Killed)
            | (Done, Waiting)
            | (Killed, Waiting)
    )
}

/// Local view of one remote submission. All access goes through `lock`.
pub struct HpcJob {
    local: Arc<dyn LocalJob>,
    state: Mutex<HpcJobState>,
}

impl HpcJob {
    pub fn new(local: Arc<dyn LocalJob>) -> Self {
        Self {
            local,
            state: Mutex::new(HpcJobState::default()),
        }
    }

    pub fn local(&self) -> &Arc<dyn LocalJob> {
        &self.local
    }

    pub fn key(&self) -> &str {
        self.local.key()
    }

    pub async fn lock(&self) -> MutexGuard<'_, HpcJobState> {
        self.state.lock().await
    }

    /// Point-in-time copy, for statistics and tests.
    pub async fn snapshot(&self) -> HpcJobState {
        self.state.lock().await.clone()
    }
}

impl fmt::Debug for HpcJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HpcJob").field("key", &self.key()).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpcJobState {
    id: Option<String>,
    command: Option<String>,
    state: JobState,
    exit_code: Option<i32>,
    num_resubmit: u32,
    terminator: Option<String>,
    internal_error: Option<String>,
    attributed_command: Option<String>,
    pending_result_passes: u32,
    history: Vec<JobState>,
}

impl Default for HpcJobState {
    fn default() -> Self {
        Self {
            id: None,
            command: None,
            state: JobState::Waiting,
            exit_code: None,
            num_resubmit: 0,
            terminator: None,
            internal_error: None,
            attributed_command: None,
            pending_result_passes: 0,
            history: vec![JobState::Waiting],
        }
    }
}

impl HpcJobState {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn num_resubmit(&self) -> u32 {
        self.num_resubmit
    }

    pub fn terminator(&self) -> Option<&str> {
        self.terminator.as_deref()
    }

    pub fn internal_error(&self) -> Option<&str> {
        self.internal_error.as_deref()
    }

    /// Command reported with the result; only set when completion was confirmed.
    pub fn attributed_command(&self) -> Option<&str> {
        self.attributed_command.as_deref()
    }

    /// Every state this record went through, in order.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    fn transition(&mut self, to: JobState) -> AppResult<()> {
        if !transition_allowed(self.state, to) {
            return Err(internal(format!(
                "illegal job transition {} -> {}",
                self.state, to
            )));
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// First successful submission: `waiting -> held | queued`.
    pub(crate) fn mark_submitted(
        &mut self,
        id: String,
        command: String,
        terminator: String,
        hold: bool,
    ) -> AppResult<()> {
        if self.id.is_some() {
            return Err(internal("remote id already set for this submission"));
        }
        self.transition(if hold { JobState::Held } else { JobState::Queued })?;
        self.id = Some(id);
        self.command = Some(command);
        self.terminator = Some(terminator);
        Ok(())
    }

    /// `held -> queued` after a successful release.
    pub(crate) fn mark_released(&mut self) -> AppResult<()> {
        self.transition(JobState::Queued)
    }

    /// `queued -> running`. The queued phase is stopped no earlier than it
    /// started, so a skewed remote clock cannot produce negative waits.
    pub fn set_running(&mut self, timer: &dyn JobTimer, at: OffsetDateTime) -> AppResult<()> {
        self.transition(JobState::Running)?;
        let stop_at = match timer.started_at(PHASE_QUEUED) {
            Some(queued_at) if at < queued_at => queued_at,
            _ => at,
        };
        timer.stop(PHASE_QUEUED, stop_at);
        timer.start(PHASE_RUNNING, at);
        Ok(())
    }

    /// Re-queue (pre-emption, requeue). No-op when already queued.
    /// Time already spent running stays accumulated.
    pub fn set_queued(&mut self, timer: &dyn JobTimer, at: OffsetDateTime) -> AppResult<()> {
        if self.state == JobState::Queued {
            return Ok(());
        }
        self.transition(JobState::Queued)?;
        timer.stop(PHASE_RUNNING, at);
        timer.start(PHASE_QUEUED, at);
        Ok(())
    }

    /// `running -> done`. The command is attributed to the result only when
    /// no internal error was recorded on the way.
    pub fn set_done(
        &mut self,
        timer: &dyn JobTimer,
        exit_code: i32,
        at: OffsetDateTime,
    ) -> AppResult<()> {
        self.transition(JobState::Done)?;
        timer.stop(PHASE_RUNNING, at);
        self.exit_code = Some(exit_code);
        if self.internal_error.is_none() {
            self.attributed_command = self.command.clone();
        }
        Ok(())
    }

    /// Explicit cancellation. Returns false when there is nothing to kill.
    pub(crate) fn mark_killed(&mut self) -> bool {
        if !transition_allowed(self.state, JobState::Killed) {
            return false;
        }
        self.state = JobState::Killed;
        self.history.push(JobState::Killed);
        true
    }

    pub(crate) fn record_internal_error(&mut self, message: impl Into<String>) {
        self.internal_error = Some(message.into());
    }

    /// Counts status passes spent waiting for the result file to land.
    pub(crate) fn bump_pending_result(&mut self) -> u32 {
        self.pending_result_passes += 1;
        self.pending_result_passes
    }

    /// `done | killed -> waiting`, clearing the previous attempt.
    pub(crate) fn reset_for_resubmit(&mut self) -> AppResult<()> {
        // Resubmitting an in-flight job would orphan the remote one.
        debug_assert!(
            self.state.is_terminal(),
            "resubmit of non-terminal job in state {}",
            self.state
        );
        self.transition(JobState::Waiting)?;
        self.id = None;
        self.command = None;
        self.exit_code = None;
        self.terminator = None;
        self.internal_error = None;
        self.attributed_command = None;
        self.pending_result_passes = 0;
        self.num_resubmit += 1;
        Ok(())
    }
}
