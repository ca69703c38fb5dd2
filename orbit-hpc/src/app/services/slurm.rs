// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;

use crate::app::ports::SchedulerBackend;
use crate::app::services::shell::{directive_quote, sh_escape};
use crate::app::types::{ExecCategory, RemoteStatus, SubmitContext};

/// Failure texts that mean "the controller is busy", not "your request is wrong".
const TRANSIENT_MARKERS: &[&str] = &[
    "socket timed out",
    "temporarily unable",
    "resource temporarily unavailable",
    "unable to contact slurm controller",
    "connection refused",
    "slurm_persist_conn_open_without_init",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SlurmBackend;

impl SlurmBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulerBackend for SlurmBackend {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn script_directives(&self, ctx: &SubmitContext) -> Vec<String> {
        let mut lines = vec![
            format!("#SBATCH --job-name={}", job_name(&ctx.job_name)),
            format!("#SBATCH --output={}", directive_quote(&ctx.output_path)),
            format!("#SBATCH --ntasks={}", ctx.processes.max(1)),
            format!("#SBATCH --cpus-per-task={}", ctx.threads.max(1)),
        ];
        if let Some(walltime) = &ctx.walltime {
            lines.push(format!("#SBATCH --time={walltime}"));
        }
        if let Some(account) = &ctx.account {
            lines.push(format!("#SBATCH --account={account}"));
        }
        lines
    }

    fn submit_command(&self, script_path: &str, hold: bool) -> String {
        let hold = if hold { " --hold" } else { "" };
        format!("sbatch --parsable{hold} {}", sh_escape(script_path))
    }

    fn release_command(&self, job_id: &str) -> String {
        format!("scontrol release {job_id}")
    }

    fn cancel_command(&self, job_ids: &[String]) -> String {
        format!("scancel {}", job_ids.join(" "))
    }

    fn status_command(&self, job_ids: &[String]) -> String {
        format!("squeue -h -t all -o '%i|%T' -j {}", job_ids.join(","))
    }

    fn parse_status(&self, output: &str) -> HashMap<String, RemoteStatus> {
        output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| {
                let (id, state) = line.split_once('|')?;
                Some((id.trim().to_string(), remote_status(state)))
            })
            .collect()
    }

    fn is_unknown_job_failure(&self, failure_text: &str) -> bool {
        failure_text
            .to_ascii_lowercase()
            .contains("invalid job id specified")
    }

    fn job_id_var(&self) -> &'static str {
        "SLURM_JOB_ID"
    }

    fn parse_job_id(&self, submit_output: &str) -> Option<String> {
        submit_output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .find_map(parse_job_id_line)
    }

    fn should_retry(&self, _category: ExecCategory, failure_text: &str) -> bool {
        let lowered = failure_text.to_ascii_lowercase();
        TRANSIENT_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

/// Accepts `--parsable` output (`123` or `123;cluster`) as well as the
/// classic "Submitted batch job 123".
fn parse_job_id_line(line: &str) -> Option<String> {
    let candidate = match line.find("job ") {
        Some(idx) => line[idx + "job ".len()..].trim(),
        None => line.split(';').next().unwrap_or(line).trim(),
    };
    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
        Some(candidate.to_string())
    } else {
        None
    }
}

fn job_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn remote_status(state: &str) -> RemoteStatus {
    let normalized = normalize_slurm_state(state);
    if is_slurm_state_running(&normalized) {
        RemoteStatus::Running
    } else if is_slurm_state_terminal(&normalized) {
        RemoteStatus::Finished {
            exit_code: (normalized == "COMPLETED").then_some(0),
        }
    } else {
        RemoteStatus::Queued
    }
}

fn normalize_slurm_state(state: &str) -> String {
    let token = state
        .split(['+', ':', '('])
        .next()
        .unwrap_or(state)
        .split_whitespace()
        .next()
        .unwrap_or_default();
    token.to_ascii_uppercase()
}

fn is_slurm_state_running(state: &str) -> bool {
    matches!(
        state,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" | "RESIZING"
    )
}

fn is_slurm_state_terminal(state: &str) -> bool {
    matches!(
        state,
        "COMPLETED"
            | "CANCELLED"
            | "FAILED"
            | "TIMEOUT"
            | "NODE_FAIL"
            | "PREEMPTED"
            | "BOOT_FAIL"
            | "DEADLINE"
            | "OUT_OF_MEMORY"
            | "SPECIAL_EXIT"
            | "REVOKED"
    )
}
