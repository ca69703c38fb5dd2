// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;

use crate::app::types::{ExecCategory, RemoteStatus, SubmitContext};

/// Scheduler-specific syntax. Everything else is shared.
pub trait SchedulerBackend: Send + Sync {
    /// Short name, also used as a caveat prefix ("slurm id 42").
    fn name(&self) -> &'static str;

    /// Header lines for the submission script (`#SBATCH ...`, `#PBS ...`).
    fn script_directives(&self, ctx: &SubmitContext) -> Vec<String>;

    fn submit_command(&self, script_path: &str, hold: bool) -> String;

    fn release_command(&self, job_id: &str) -> String;

    fn cancel_command(&self, job_ids: &[String]) -> String;

    fn status_command(&self, job_ids: &[String]) -> String;

    /// Status for every id the scheduler still knows about.
    /// Ids missing from the result are considered finished.
    fn parse_status(&self, output: &str) -> HashMap<String, RemoteStatus>;

    /// Whether a failed status query only means that some of the ids were
    /// purged from the scheduler's memory.
    fn is_unknown_job_failure(&self, _failure_text: &str) -> bool {
        false
    }

    /// Environment variable holding the job id inside a running job.
    fn job_id_var(&self) -> &'static str;

    fn parse_job_id(&self, submit_output: &str) -> Option<String>;

    /// Whether a failed command is worth another attempt.
    fn should_retry(&self, category: ExecCategory, failure_text: &str) -> bool;
}
