// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::job::HpcJobState;
use crate::app::overlay::HpcOverlay;
use crate::app::ports::LocalJob;
use crate::app::types::{ExecCategory, JobState};

impl HpcOverlay {
    /// Kills every registered job matching `predicate` with one batched
    /// cancel. Returns how many jobs were killed. Remote failures are
    /// logged and otherwise ignored.
    pub async fn kill_jobs<F>(&self, predicate: F) -> usize
    where
        F: Fn(&HpcJobState) -> bool,
    {
        let mut ids = Vec::new();
        {
            let jobs = self.registry.lock().await;
            for hpc in jobs.values() {
                let mut state = hpc.lock().await;
                if !predicate(&state) {
                    continue;
                }
                let id = state.id().map(str::to_string);
                if state.mark_killed() {
                    tracing::debug!(job = hpc.key(), "killed");
                    ids.extend(id);
                }
            }
        }
        let count = ids.len();
        self.cancel_remote(&ids).await;
        count
    }

    /// Kills one job. Does nothing for unknown, finished or killed jobs.
    pub async fn kill_job(&self, job: &dyn LocalJob) -> bool {
        let Some(hpc) = self.registry.get(job.key()).await else {
            return false;
        };
        let mut state = hpc.lock().await;
        self.kill_locked(&mut state).await
    }

    /// Kills everything still held: speculative submissions whose owner
    /// never started.
    pub async fn cancel_held(&self) -> usize {
        self.kill_jobs(|state| state.state() == JobState::Held).await
    }

    pub(crate) async fn kill_locked(&self, state: &mut HpcJobState) -> bool {
        let id = state.id().map(str::to_string);
        if !state.mark_killed() {
            return false;
        }
        if let Some(id) = id {
            self.cancel_remote(&[id]).await;
        }
        true
    }

    async fn cancel_remote(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let command = self.backend().cancel_command(ids);
        match self.dispatcher.execute(ExecCategory::Cancel, &command).await {
            Ok(outcome) if outcome.success() => {
                tracing::debug!(count = ids.len(), "cancelled remote jobs");
            }
            Ok(outcome) => tracing::warn!(
                "cancel failed ({}): {}",
                outcome.qualified_command,
                outcome.failure_text()
            ),
            Err(err) => tracing::warn!("cancel failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::overlay::OverlaySettings;
    use crate::app::testing::{FakeJob, Harness};
    use crate::app::types::JobPaths;

    #[tokio::test]
    async fn kill_jobs_batches_one_cancel() {
        let harness = Harness::new(OverlaySettings::default());
        for key in ["a", "b", "c"] {
            let job = FakeJob::new(key, "true");
            harness.overlay.submit(&harness.local(&job), true).await.unwrap();
        }

        let killed = harness.overlay.kill_jobs(|_| true).await;

        assert_eq!(killed, 3);
        let cancels = harness.connector.commands_containing("cancel");
        assert_eq!(cancels.len(), 1);
        for id in ["101", "102", "103"] {
            assert!(cancels[0].contains(id));
        }
    }

    #[tokio::test]
    async fn predicate_selects_jobs() {
        let harness = Harness::new(OverlaySettings::default());
        let held = FakeJob::new("held", "true");
        let queued = FakeJob::new("queued", "true");
        harness.overlay.submit(&harness.local(&held), true).await.unwrap();
        harness.overlay.submit(&harness.local(&queued), false).await.unwrap();

        assert_eq!(harness.overlay.cancel_held().await, 1);

        let queued_state = harness.overlay.registry().get("queued").await.unwrap();
        assert_eq!(queued_state.snapshot().await.state(), JobState::Queued);
        assert_eq!(harness.connector.commands_containing("cancel 101").len(), 1);
    }

    #[tokio::test]
    async fn killing_a_killed_job_issues_no_cancel() {
        let harness = Harness::new(OverlaySettings::default());
        let job = FakeJob::new("a", "true");
        harness.overlay.submit(&harness.local(&job), true).await.unwrap();

        assert!(harness.overlay.kill_job(job.as_ref()).await);
        assert!(!harness.overlay.kill_job(job.as_ref()).await);
        assert_eq!(harness.overlay.kill_jobs(|_| true).await, 0);
        assert_eq!(harness.connector.commands_containing("cancel").len(), 1);
    }

    #[tokio::test]
    async fn killing_a_done_job_issues_no_cancel() {
        let harness = Harness::new(OverlaySettings::default());
        let job = FakeJob::new("a", "true");
        let hpc = harness
            .overlay
            .submit(&harness.local(&job), false)
            .await
            .unwrap()
            .unwrap();
        let terminator = hpc.snapshot().await.terminator().unwrap().to_string();
        let paths = JobPaths::from_prefix(job.prefix());
        harness.fs.put(&paths.result, &format!("0\n{terminator}\n"));
        harness.set_remote("101", "F");
        harness.overlay.poll_once().await.unwrap();
        assert_eq!(hpc.snapshot().await.state(), JobState::Done);

        assert!(!harness.overlay.kill_job(job.as_ref()).await);
        assert_eq!(harness.overlay.kill_jobs(|_| true).await, 0);
        assert_eq!(hpc.snapshot().await.state(), JobState::Done);
        assert!(harness.connector.commands_containing("cancel").is_empty());
    }

    #[tokio::test]
    async fn unknown_or_waiting_jobs_are_not_killed() {
        let harness = Harness::new(OverlaySettings::default());
        let job = FakeJob::new("never", "true");
        assert!(!harness.overlay.kill_job(job.as_ref()).await);

        harness.fail_next("submit", "invalid account");
        let _ = harness.overlay.submit(&harness.local(&job), false).await;
        assert!(!harness.overlay.kill_job(job.as_ref()).await);
        assert!(harness.connector.commands_containing("cancel").is_empty());
    }

    #[tokio::test]
    async fn cancel_failures_are_swallowed() {
        let harness = Harness::new(OverlaySettings::default());
        let job = FakeJob::new("a", "true");
        harness.overlay.submit(&harness.local(&job), true).await.unwrap();
        harness.fail_next("cancel", "scheduler down");

        assert_eq!(harness.overlay.cancel_held().await, 1);
        let hpc = harness.overlay.registry().get("a").await.unwrap();
        assert_eq!(hpc.snapshot().await.state(), JobState::Killed);
    }
}
