// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;

use thiserror::Error;

use crate::app::ports::SchedulerBackend;
use crate::app::services::shell::{directive_quote, sh_escape};
use crate::app::types::{ExecCategory, RemoteStatus, SubmitContext};

const TRANSIENT_MARKERS: &[&str] = &[
    "cannot connect to server",
    "pbs_iff",
    "connection refused",
    "connection timed out",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseStatusError {
    #[error("not a job line: {0}")]
    NotAJobLine(String),
    #[error("unknown job state '{state}' for job {id}")]
    UnknownState { id: String, state: String },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PbsBackend;

impl PbsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulerBackend for PbsBackend {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn script_directives(&self, ctx: &SubmitContext) -> Vec<String> {
        let cpus = ctx.processes.max(1) * ctx.threads.max(1);
        let mut lines = vec![
            format!("#PBS -N {}", job_name(&ctx.job_name)),
            "#PBS -j oe".to_string(),
            format!("#PBS -o {}", directive_quote(&ctx.output_path)),
            format!(
                "#PBS -l select=1:ncpus={cpus}:mpiprocs={}",
                ctx.processes.max(1)
            ),
        ];
        if let Some(walltime) = &ctx.walltime {
            lines.push(format!("#PBS -l walltime={walltime}"));
        }
        if let Some(account) = &ctx.account {
            lines.push(format!("#PBS -A {account}"));
        }
        lines
    }

    fn submit_command(&self, script_path: &str, hold: bool) -> String {
        let hold = if hold { " -h" } else { "" };
        format!("qsub{hold} {}", sh_escape(script_path))
    }

    fn release_command(&self, job_id: &str) -> String {
        format!("qrls {job_id}")
    }

    fn cancel_command(&self, job_ids: &[String]) -> String {
        format!("qdel {}", job_ids.join(" "))
    }

    fn status_command(&self, job_ids: &[String]) -> String {
        format!("qstat -x {}", job_ids.join(" "))
    }

    fn parse_status(&self, output: &str) -> HashMap<String, RemoteStatus> {
        let mut statuses = HashMap::new();
        for line in output.lines().map(str::trim) {
            if line.is_empty() || line.starts_with("Job id") || line.starts_with('-') {
                continue;
            }
            match parse_qstat_line(line) {
                Ok((id, status)) => {
                    statuses.insert(id, status);
                }
                Err(err) => tracing::debug!("skipping qstat line: {err}"),
            }
        }
        statuses
    }

    fn is_unknown_job_failure(&self, failure_text: &str) -> bool {
        failure_text.to_ascii_lowercase().contains("unknown job id")
    }

    fn job_id_var(&self) -> &'static str {
        "PBS_JOBID"
    }

    fn parse_job_id(&self, submit_output: &str) -> Option<String> {
        submit_output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with(|c: char| c.is_ascii_digit()))
            .map(str::to_string)
    }

    fn should_retry(&self, _category: ExecCategory, failure_text: &str) -> bool {
        let lowered = failure_text.to_ascii_lowercase();
        TRANSIENT_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

/// One row of the default `qstat` table:
/// `Job id  Name  User  Time Use  S  Queue`.
fn parse_qstat_line(line: &str) -> Result<(String, RemoteStatus), ParseStatusError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 || !fields[0].starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ParseStatusError::NotAJobLine(line.to_string()));
    }
    let id = fields[0].trim_end_matches('*').to_string();
    let state = fields[fields.len() - 2];
    let status = match state {
        "Q" | "W" | "H" | "T" | "S" | "U" => RemoteStatus::Queued,
        "R" | "E" | "B" => RemoteStatus::Running,
        "F" | "X" | "C" => RemoteStatus::Finished { exit_code: None },
        other => {
            return Err(ParseStatusError::UnknownState {
                id,
                state: other.to_string(),
            });
        }
    };
    Ok((id, status))
}

fn job_name(name: &str) -> String {
    // PBS rejects names longer than 15 chars on older servers and any whitespace.
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .take(15)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QSTAT: &str = "\
Job id            Name             User              Time Use S Queue
----------------  ---------------- ----------------  -------- - -----
101.pbs01         align            alice             00:00:00 Q workq
102.pbs01         align            alice             00:01:10 R workq
103.pbs01         align            alice             00:05:00 F workq
104.pbs01*        align            alice             00:00:00 H workq
";

    #[test]
    fn parses_qstat_table() {
        let statuses = PbsBackend::new().parse_status(QSTAT);
        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses["101.pbs01"], RemoteStatus::Queued);
        assert_eq!(statuses["102.pbs01"], RemoteStatus::Running);
        assert_eq!(statuses["103.pbs01"], RemoteStatus::Finished { exit_code: None });
        assert_eq!(statuses["104.pbs01"], RemoteStatus::Queued);
    }

    #[test]
    fn unknown_state_is_an_error() {
        let err = parse_qstat_line("7.srv a b 00:00:00 Z q").unwrap_err();
        assert_eq!(
            err,
            ParseStatusError::UnknownState {
                id: "7.srv".to_string(),
                state: "Z".to_string()
            }
        );
        assert!(matches!(
            parse_qstat_line("qstat: Unknown Job Id 9.srv"),
            Err(ParseStatusError::NotAJobLine(_))
        ));
    }

    #[test]
    fn submit_output_is_the_job_id() {
        let backend = PbsBackend::new();
        assert_eq!(
            backend.parse_job_id("1234.pbs01.cluster\n"),
            Some("1234.pbs01.cluster".to_string())
        );
        assert_eq!(backend.parse_job_id("qsub: Bad UID for job execution"), None);
    }

    #[test]
    fn commands() {
        let backend = PbsBackend::new();
        let ids = vec!["1.s".to_string(), "2.s".to_string()];
        assert_eq!(backend.submit_command("/o/a.hpc_submit", true), "qsub -h '/o/a.hpc_submit'");
        assert_eq!(backend.submit_command("/o/a.hpc_submit", false), "qsub '/o/a.hpc_submit'");
        assert_eq!(backend.release_command("1.s"), "qrls 1.s");
        assert_eq!(backend.cancel_command(&ids), "qdel 1.s 2.s");
        assert_eq!(backend.status_command(&ids), "qstat -x 1.s 2.s");
    }

    #[test]
    fn retries_on_server_trouble_only() {
        let backend = PbsBackend::new();
        assert!(backend.should_retry(
            ExecCategory::Status,
            "qstat: cannot connect to server pbs01 (errno=111)"
        ));
        assert!(!backend.should_retry(ExecCategory::Submit, "qsub: Unknown queue"));
    }

    #[test]
    fn purged_ids_are_recognised() {
        let backend = PbsBackend::new();
        assert!(backend.is_unknown_job_failure("qstat: Unknown Job Id 9.pbs01"));
        assert!(!backend.is_unknown_job_failure("qstat: cannot connect to server pbs01"));
    }

    #[test]
    fn directives_quote_the_output_path() {
        let ctx = SubmitContext {
            job_name: "align s1".to_string(),
            working_dir: "/w".to_string(),
            script_path: "/o/s 1.hpc_submit".to_string(),
            output_path: "/o/s 1.hpc_out.txt".to_string(),
            result_path: "/o/s 1.hpc_result".to_string(),
            walltime: None,
            walltime_secs: None,
            processes: 2,
            threads: 4,
            env: Vec::new(),
            modules: Vec::new(),
            account: None,
            directives: Vec::new(),
            container_prefix: None,
            command: "true".to_string(),
            terminator: "T".to_string(),
            job_id_ref: "$PBS_JOBID".to_string(),
            expected_outputs: Vec::new(),
        };
        assert_eq!(
            PbsBackend::new().script_directives(&ctx),
            vec![
                "#PBS -N align_s1",
                "#PBS -j oe",
                r#"#PBS -o "/o/s 1.hpc_out.txt""#,
                "#PBS -l select=1:ncpus=8:mpiprocs=2",
            ]
        );
    }

    #[test]
    fn job_names_are_shortened() {
        assert_eq!(job_name("a very long job name here"), "a_very_long_job");
    }
}
