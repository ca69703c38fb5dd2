// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use crate::app::errors::{AppError, AppResult, codes, internal};
use crate::app::job::{HpcJob, HpcJobState};
use crate::app::overlay::HpcOverlay;
use crate::app::ports::LocalJob;
use crate::app::services::shell::wait_for_file_then;
use crate::app::services::templates::{container_prefix, render_submit_script};
use crate::app::services::terminator::generate_terminator;
use crate::app::types::{
    EnvVar, ExecCategory, JobPaths, JobState, PHASE_QUEUED, RESUBMITTED_CAVEAT, SubmitContext,
    format_walltime,
};

impl HpcOverlay {
    /// Submits `job` to the remote scheduler, held when `hold` is set and
    /// holding is enabled.
    ///
    /// Returns `None` when a held pre-submission finds the job already
    /// skipped. Submitting a job that left `waiting` is a no-op.
    pub async fn submit(
        &self,
        job: &Arc<dyn LocalJob>,
        hold: bool,
    ) -> AppResult<Option<Arc<HpcJob>>> {
        let hold = hold && self.settings.hold_on_submit;
        if hold && job.is_skipped() {
            tracing::debug!(job = job.key(), "job skipped before held submission");
            return Ok(None);
        }
        self.submit_job(job, hold).await.map(Some)
    }

    async fn submit_job(&self, job: &Arc<dyn LocalJob>, hold: bool) -> AppResult<Arc<HpcJob>> {
        let hpc = self.registry.get_or_insert(job).await;
        {
            let mut state = hpc.lock().await;
            if state.state() == JobState::Waiting {
                self.submit_locked(&hpc, &mut state, hold).await?;
            }
        }
        Ok(hpc)
    }

    /// Releases a held job, or submits it directly when nothing was
    /// pre-submitted. Starts the status poller on first use.
    pub async fn queue(&self, job: &Arc<dyn LocalJob>) -> AppResult<Arc<HpcJob>> {
        self.ensure_poller();
        let hpc = match self.registry.get(job.key()).await {
            Some(hpc) => hpc,
            None => return self.submit_job(job, false).await,
        };
        {
            let mut state = hpc.lock().await;
            match state.state() {
                JobState::Waiting => self.submit_locked(&hpc, &mut state, false).await?,
                JobState::Held => self.release_locked(&hpc, &mut state).await?,
                _ => {}
            }
        }
        Ok(hpc)
    }

    /// Starts a fresh attempt of a finished or killed job.
    pub async fn resubmit(&self, job: &Arc<dyn LocalJob>) -> AppResult<Arc<HpcJob>> {
        self.ensure_poller();
        let hpc = self.registry.get_or_insert(job).await;
        {
            let mut state = hpc.lock().await;
            if !state.state().is_terminal() {
                return Err(internal(format!(
                    "cannot resubmit {} while it is {}",
                    job.key(),
                    state.state()
                )));
            }
            if let Some(id) = state.id() {
                job.remove_caveat(&self.id_caveat(id));
            }
            job.add_caveat(RESUBMITTED_CAVEAT.to_string());
            state.reset_for_resubmit()?;
            self.submit_locked(&hpc, &mut state, false).await?;
        }
        Ok(hpc)
    }

    /// One submission attempt. The caller holds the job lock and the job is
    /// `waiting`; on error it stays `waiting`.
    async fn submit_locked(
        &self,
        hpc: &HpcJob,
        state: &mut HpcJobState,
        hold: bool,
    ) -> AppResult<()> {
        let local = hpc.local();
        let backend = self.backend();
        let paths = JobPaths::from_prefix(&local.output_prefix());
        if let Some(dir) = paths.script.parent() {
            self.fs.create_dir_all(dir).await?;
        }
        for stale in [&paths.script, &paths.output, &paths.result] {
            self.fs.remove_file(stale).await?;
        }

        let terminator = generate_terminator();
        let command = local.command().to_string();
        let ctx = self.submit_context(local.as_ref(), &paths, &command, &terminator);
        let script = render_submit_script(self.settings.script_template.as_deref(), &ctx)?;
        self.fs.write(&paths.script, &script).await?;

        let submit = wait_for_file_then(
            &ctx.script_path,
            &backend.submit_command(&ctx.script_path, hold),
        );
        let outcome = self.dispatcher.execute(ExecCategory::Submit, &submit).await?;
        if !outcome.success() {
            return Err(AppError::remote_command(
                codes::SUBMIT_FAILED,
                "job submission",
                &outcome.qualified_command,
                &outcome.failure_text(),
            ));
        }
        let id = backend.parse_job_id(&outcome.stdout).ok_or_else(|| {
            AppError::remote_command(
                codes::SUBMIT_FAILED,
                "reading the job id",
                &outcome.qualified_command,
                &outcome.stdout,
            )
        })?;

        state.mark_submitted(id.clone(), command, terminator, hold)?;
        local.add_caveat(self.id_caveat(&id));
        if !hold {
            local.timer().start(PHASE_QUEUED, self.clock.now_utc());
        }
        tracing::info!(
            job = local.key(),
            remote_id = %id,
            hold,
            attempts = outcome.attempts,
            "submitted"
        );
        Ok(())
    }

    async fn release_locked(&self, hpc: &HpcJob, state: &mut HpcJobState) -> AppResult<()> {
        let local = hpc.local();
        let Some(id) = state.id().map(str::to_string) else {
            return Err(internal(format!("held job {} has no remote id", local.key())));
        };
        let released = match self
            .dispatcher
            .execute(ExecCategory::Release, &self.backend().release_command(&id))
            .await
        {
            Ok(outcome) if outcome.success() => Ok(()),
            Ok(outcome) => Err(AppError::remote_command(
                codes::RELEASE_FAILED,
                "release from hold",
                &outcome.qualified_command,
                &outcome.failure_text(),
            )),
            Err(err) => Err(err),
        };
        if let Err(err) = released {
            tracing::warn!(job = local.key(), remote_id = %id, "release failed, cancelling: {err}");
            self.kill_locked(state).await;
            return Err(err);
        }
        state.mark_released()?;
        local.timer().start(PHASE_QUEUED, self.clock.now_utc());
        tracing::info!(job = local.key(), remote_id = %id, "released");
        Ok(())
    }

    fn submit_context(
        &self,
        local: &dyn LocalJob,
        paths: &JobPaths,
        command: &str,
        terminator: &str,
    ) -> SubmitContext {
        let resources = local.resources();
        let mut ctx = SubmitContext {
            job_name: local.name().to_string(),
            working_dir: display(&local.working_dir()),
            script_path: display(&paths.script),
            output_path: display(&paths.output),
            result_path: display(&paths.result),
            walltime: resources.walltime.map(format_walltime),
            walltime_secs: resources.walltime.map(|w| w.as_secs()),
            processes: resources.processes.max(1),
            threads: resources.threads.max(1),
            env: resources
                .env
                .into_iter()
                .map(|(name, value)| EnvVar { name, value })
                .collect(),
            modules: resources.modules,
            account: self.settings.account.clone(),
            directives: Vec::new(),
            container_prefix: self.settings.container.as_ref().and_then(container_prefix),
            command: command.to_string(),
            terminator: terminator.to_string(),
            job_id_ref: format!("${}", self.backend().job_id_var()),
            expected_outputs: local
                .expected_outputs()
                .iter()
                .map(|path| display(path))
                .chain(std::iter::once(display(&paths.output)))
                .collect(),
        };
        ctx.directives = self.backend().script_directives(&ctx);
        ctx
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
