// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

pub const PHASE_QUEUED: &str = "hpc_queued";
pub const PHASE_RUNNING: &str = "runner_run";

pub const RESUBMITTED_CAVEAT: &str = "resubmitted";

/// Lifecycle of one remote submission, as seen locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Waiting,
    Held,
    Queued,
    Running,
    Done,
    Killed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Held => "held",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Killed => "killed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Killed)
    }

    /// States the status poller keeps an eye on.
    pub fn is_polled(self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation categories; each gets its own bounded worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecCategory {
    Submit,
    Release,
    Status,
    Cancel,
}

impl ExecCategory {
    pub const ALL: [ExecCategory; 4] = [
        ExecCategory::Submit,
        ExecCategory::Release,
        ExecCategory::Status,
        ExecCategory::Cancel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecCategory::Submit => "submit",
            ExecCategory::Release => "release",
            ExecCategory::Status => "status",
            ExecCategory::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ExecCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one command through the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// `user@host: command`, used in error messages.
    pub qualified_command: String,
    pub attempts: u32,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Text handed to the backend retry classifier and to error messages.
    pub fn failure_text(&self) -> String {
        let err = self.stderr.trim();
        let out = self.stdout.trim();
        match (err.is_empty(), out.is_empty()) {
            (false, false) => format!("{err}\n{out}"),
            (false, true) => err.to_string(),
            (true, false) => out.to_string(),
            (true, true) => String::new(),
        }
    }
}

/// What the remote scheduler says about one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    Running,
    Finished { exit_code: Option<i32> },
}

/// Resource request for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResources {
    pub walltime: Option<Duration>,
    pub processes: u32,
    pub threads: u32,
    pub env: Vec<(String, String)>,
    pub modules: Vec<String>,
}

impl Default for JobResources {
    fn default() -> Self {
        Self {
            walltime: None,
            processes: 1,
            threads: 1,
            env: Vec::new(),
            modules: Vec::new(),
        }
    }
}

/// Container wrapper the command is executed under, e.g. apptainer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub runtime: String,
    pub image: String,
    pub binds: Vec<String>,
    pub args: Vec<String>,
}

/// Finished-job report handed back to the local scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub exit_code: i32,
    /// The exact command executed; absent when completion could not be
    /// confirmed through the result file.
    pub command: Option<String>,
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub script: PathBuf,
    pub output: PathBuf,
    pub result: PathBuf,
}

impl JobPaths {
    pub fn from_prefix(prefix: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut raw = prefix.as_os_str().to_os_string();
            raw.push(suffix);
            PathBuf::from(raw)
        };
        Self {
            script: with_suffix(".hpc_submit"),
            output: with_suffix(".hpc_out.txt"),
            result: with_suffix(".hpc_result"),
        }
    }
}

/// Template variables for one submission attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitContext {
    pub job_name: String,
    pub working_dir: String,
    pub script_path: String,
    pub output_path: String,
    pub result_path: String,
    pub walltime: Option<String>,
    pub walltime_secs: Option<u64>,
    pub processes: u32,
    pub threads: u32,
    pub env: Vec<EnvVar>,
    pub modules: Vec<String>,
    pub account: Option<String>,
    pub directives: Vec<String>,
    pub container_prefix: Option<String>,
    pub command: String,
    pub terminator: String,
    pub job_id_ref: String,
    pub expected_outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Formats a walltime as `HH:MM:SS`, rolling days into hours.
pub fn format_walltime(walltime: Duration) -> String {
    let secs = walltime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
