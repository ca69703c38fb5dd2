// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod backend;
pub mod clock;
pub mod local_fs;
pub mod local_job;
pub mod remote_exec;

pub use backend::SchedulerBackend;
pub use clock::ClockPort;
pub use local_fs::LocalFilesystemPort;
pub use local_job::{JobTimer, LocalJob};
pub use remote_exec::{ConnectorPort, ExecCapture, RemoteExecPort};
