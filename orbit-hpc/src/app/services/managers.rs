// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::str::FromStr;
use std::sync::Arc;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ConnectorPort, SchedulerBackend};
use crate::app::services::pbs::PbsBackend;
use crate::app::services::slurm::SlurmBackend;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum WorkloadManager {
    Slurm,
    PBS,
}

impl FromStr for WorkloadManager {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SLURM" => Ok(Self::Slurm),
            "PBS" | "PBSPRO" | "TORQUE" => Ok(Self::PBS),
            other => Err(format!("unknown Workload Manager: {other}")),
        }
    }
}

impl WorkloadManager {
    pub fn backend(self) -> Arc<dyn SchedulerBackend> {
        match self {
            WorkloadManager::Slurm => Arc::new(SlurmBackend::new()),
            WorkloadManager::PBS => Arc::new(PbsBackend::new()),
        }
    }
}

/// First supported manager found in the output of
/// [`DETERMINE_HPC_WORKLOAD_MANAGERS_CMD`].
pub fn parse_wlm(output: &str) -> Option<WorkloadManager> {
    output
        .lines()
        .find_map(|line| line.parse::<WorkloadManager>().ok())
}

/// Asks `host` which scheduler it has. Opens a throwaway connection.
pub async fn detect(connector: &dyn ConnectorPort, host: &str) -> AppResult<WorkloadManager> {
    let session = connector.connect(host).await?;
    let result = session
        .exec_capture(DETERMINE_HPC_WORKLOAD_MANAGERS_CMD)
        .await;
    session.shutdown().await;
    let capture = result?;
    let stdout = String::from_utf8_lossy(&capture.stdout);
    let manager = parse_wlm(&stdout).ok_or_else(|| {
        AppError::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            format!("no supported workload manager found on {}", session.target()),
        )
    })?;
    tracing::info!(host, ?manager, "detected workload manager");
    Ok(manager)
}

pub const DETERMINE_HPC_WORKLOAD_MANAGERS_CMD: &str = r#"for p in sbatch:SLURM qsub:PBS; do bin=${p%%:*}; name=${p#*:}; command -v "$bin" >/dev/null 2>&1 && echo "$name" || continue; done"#;
