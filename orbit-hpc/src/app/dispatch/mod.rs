// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use crate::app::errors::AppResult;
use crate::app::ports::SchedulerBackend;
use crate::app::types::{ExecCategory, ExecOutcome};

mod channel;
mod pool;

pub mod session_cache;

pub use channel::RemoteChannel;
pub use pool::{WorkerLease, WorkerPool};
pub use session_cache::{SessionCache, WorkerId};

/// Worker count per operation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub submit: usize,
    pub release: usize,
    pub status: usize,
    pub cancel: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            submit: 4,
            release: 4,
            status: 2,
            cancel: 2,
        }
    }
}

impl PoolSizes {
    pub fn for_category(&self, category: ExecCategory) -> usize {
        match category {
            ExecCategory::Submit => self.submit,
            ExecCategory::Release => self.release,
            ExecCategory::Status => self.status,
            ExecCategory::Cancel => self.cancel,
        }
    }
}

/// Extra attempts per category after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub submit: u32,
    pub release: u32,
    pub status: u32,
    pub cancel: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            submit: 3,
            release: 3,
            status: 1,
            cancel: 0,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn for_category(&self, category: ExecCategory) -> u32 {
        match category {
            ExecCategory::Submit => self.submit,
            ExecCategory::Release => self.release,
            ExecCategory::Status => self.status,
            ExecCategory::Cancel => self.cancel,
        }
    }
}

/// Bounded, per-category execution of remote commands.
///
/// Each category has its own pool, so a burst of submissions never blocks
/// status queries. A worker is held for one attempt only; it goes back to
/// the pool while a retry waits.
pub struct CommandDispatcher {
    pools: [WorkerPool; 4],
    channel: RemoteChannel,
    backend: Arc<dyn SchedulerBackend>,
    retries: RetryPolicy,
}

impl CommandDispatcher {
    pub fn new(
        sessions: Arc<SessionCache>,
        backend: Arc<dyn SchedulerBackend>,
        sizes: PoolSizes,
        retries: RetryPolicy,
    ) -> Self {
        let pools = ExecCategory::ALL
            .map(|category| WorkerPool::new(category, sizes.for_category(category)));
        Self {
            pools,
            channel: RemoteChannel::new(sessions),
            backend,
            retries,
        }
    }

    pub fn pool(&self, category: ExecCategory) -> &WorkerPool {
        let index = ExecCategory::ALL
            .iter()
            .position(|candidate| *candidate == category)
            .unwrap_or(0);
        &self.pools[index]
    }

    pub fn backend(&self) -> &Arc<dyn SchedulerBackend> {
        &self.backend
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retries
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        self.channel.sessions()
    }

    /// Runs `command` with the configured retry count for `category`.
    pub async fn execute(&self, category: ExecCategory, command: &str) -> AppResult<ExecOutcome> {
        let retries = self.retries.for_category(category);
        self.execute_with_retries(category, command, retries).await
    }

    /// Attempts `command` up to `retries + 1` times. A failed attempt is only
    /// repeated when the backend classifies it as transient.
    #[tracing::instrument(
        name = "dispatch",
        level = "debug",
        skip(self, command)
    )]
    pub async fn execute_with_retries(
        &self,
        category: ExecCategory,
        command: &str,
        retries: u32,
    ) -> AppResult<ExecOutcome> {
        let pool = self.pool(category);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = {
                let lease = pool.acquire().await?;
                self.channel.exec(lease.worker(), command).await?
            };
            let outcome = ExecOutcome {
                exit_code: result.capture.exit_code,
                stdout: String::from_utf8_lossy(&result.capture.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&result.capture.stderr).into_owned(),
                qualified_command: format!("{}: {command}", result.target),
                attempts: attempt,
            };
            if outcome.success() {
                return Ok(outcome);
            }
            let failure = outcome.failure_text();
            if attempt > retries || !self.backend.should_retry(category, &failure) {
                return Ok(outcome);
            }
            tracing::warn!(
                attempt,
                exit_code = outcome.exit_code,
                "transient {category} failure, retrying in {:?}: {failure}",
                self.retries.delay
            );
            tokio::time::sleep(self.retries.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::codes;
    use crate::app::testing::{ScriptedConnector, TestBackend, capture};

    fn dispatcher(
        connector: Arc<ScriptedConnector>,
        backend: TestBackend,
        sizes: PoolSizes,
    ) -> CommandDispatcher {
        let sessions =
            Arc::new(SessionCache::new(connector, vec!["login1".to_string()]).unwrap());
        CommandDispatcher::new(
            sessions,
            Arc::new(backend),
            sizes,
            RetryPolicy {
                delay: Duration::from_secs(2),
                ..RetryPolicy::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_at_most_retries_plus_one_times() {
        let connector = Arc::new(ScriptedConnector::new());
        for _ in 0..10 {
            connector.push_capture(Ok(capture(1, "", "Socket timed out")));
        }
        let dispatcher = dispatcher(
            connector.clone(),
            TestBackend::transient(),
            PoolSizes::default(),
        );

        let outcome = dispatcher
            .execute_with_retries(ExecCategory::Submit, "sbatch x", 2)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(connector.commands().len(), 3);
        assert_eq!(outcome.qualified_command, "tester@login1: sbatch x");
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_failures_are_not_retried() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_capture(Ok(capture(1, "", "invalid account")));
        let dispatcher = dispatcher(
            connector.clone(),
            TestBackend::never_retry(),
            PoolSizes::default(),
        );

        let outcome = dispatcher
            .execute_with_retries(ExecCategory::Submit, "sbatch x", 5)
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(connector.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_failure() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_capture(Ok(capture(1, "", "Socket timed out")));
        connector.push_capture(Ok(capture(0, "42\n", "")));
        let dispatcher = dispatcher(
            connector.clone(),
            TestBackend::transient(),
            PoolSizes::default(),
        );

        let started = tokio::time::Instant::now();
        let outcome = dispatcher
            .execute(ExecCategory::Status, "squeue")
            .await
            .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout, "42\n");
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn connection_is_reused_by_the_same_worker() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_capture(Ok(capture(0, "", "")));
        connector.push_capture(Ok(capture(0, "", "")));
        let sizes = PoolSizes {
            status: 1,
            ..PoolSizes::default()
        };
        let dispatcher = dispatcher(connector.clone(), TestBackend::never_retry(), sizes);

        dispatcher.execute(ExecCategory::Status, "a").await.unwrap();
        dispatcher.execute(ExecCategory::Status, "b").await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert_eq!(dispatcher.sessions().len().await, 1);
    }

    #[tokio::test]
    async fn broken_transport_reconnects_exactly_once() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_transport_error();
        connector.push_capture(Ok(capture(0, "ok", "")));
        let dispatcher = dispatcher(
            connector.clone(),
            TestBackend::never_retry(),
            PoolSizes::default(),
        );

        let outcome = dispatcher.execute(ExecCategory::Cancel, "scancel 1").await.unwrap();
        assert!(outcome.success());
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn second_transport_failure_is_surfaced_with_host_and_command() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_transport_error();
        connector.push_transport_error();
        let dispatcher = dispatcher(
            connector.clone(),
            TestBackend::transient(),
            PoolSizes::default(),
        );

        let err = dispatcher
            .execute(ExecCategory::Release, "scontrol release 7")
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::TRANSPORT_FAILURE);
        assert_eq!(err.context(), Some("login1: scontrol release 7"));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn categories_use_separate_workers() {
        let connector = Arc::new(ScriptedConnector::new());
        connector.push_capture(Ok(capture(0, "", "")));
        connector.push_capture(Ok(capture(0, "", "")));
        let dispatcher = dispatcher(
            connector.clone(),
            TestBackend::never_retry(),
            PoolSizes::default(),
        );

        dispatcher.execute(ExecCategory::Submit, "a").await.unwrap();
        dispatcher.execute(ExecCategory::Status, "b").await.unwrap();
        assert_eq!(connector.connects(), 2);
        assert_eq!(dispatcher.pool(ExecCategory::Submit).size(), 4);
        assert_eq!(dispatcher.pool(ExecCategory::Status).size(), 2);
    }
}
