// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use time::OffsetDateTime;

use crate::app::types::{JobOutcome, JobResources};

/// Named-phase stopwatch owned by the local scheduler.
pub trait JobTimer: Send + Sync {
    fn start(&self, phase: &str, at: OffsetDateTime);
    fn stop(&self, phase: &str, at: OffsetDateTime);
    /// Start of the currently open interval of `phase`, if any.
    fn started_at(&self, phase: &str) -> Option<OffsetDateTime>;
    /// Accumulated duration of closed intervals of `phase`.
    fn total(&self, phase: &str) -> time::Duration;
}

/// Unit of work owned by the local concurrency scheduler.
///
/// The overlay only borrows it: it reads what to run and reports back
/// through the caveat, timer and completion hooks.
pub trait LocalJob: Send + Sync {
    /// Stable identity used as the registry key.
    fn key(&self) -> &str;

    fn name(&self) -> &str;

    fn command(&self) -> &str;

    /// Prefix for `.hpc_submit`, `.hpc_out.txt` and `.hpc_result`.
    fn output_prefix(&self) -> PathBuf;

    fn working_dir(&self) -> PathBuf;

    fn resources(&self) -> JobResources;

    fn expected_outputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// True once the local scheduler gave up on this job,
    /// e.g. because an upstream dependency failed.
    fn is_skipped(&self) -> bool;

    fn add_caveat(&self, caveat: String);

    fn remove_caveat(&self, caveat: &str);

    fn timer(&self) -> &dyn JobTimer;

    fn finished(&self, outcome: JobOutcome);
}
