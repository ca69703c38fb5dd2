// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::ExecCapture;

use super::session_cache::{SessionCache, WorkerId};

/// Runs one command on the worker's cached connection.
///
/// A broken transport gets exactly one reconnect; the second failure is
/// surfaced with host and command attached.
pub struct RemoteChannel {
    sessions: Arc<SessionCache>,
}

pub struct ChannelCapture {
    pub capture: ExecCapture,
    pub target: String,
}

impl RemoteChannel {
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub async fn exec(&self, worker: WorkerId, command: &str) -> AppResult<ChannelCapture> {
        match self.exec_once(worker, command).await {
            Ok(capture) => Ok(capture),
            Err(err) => {
                tracing::warn!(
                    worker = %worker,
                    host = self.sessions.host_for(worker),
                    "remote exec failed, reconnecting once: {err}"
                );
                self.sessions.remove_and_shutdown(worker).await;
                self.exec_once(worker, command).await.map_err(|err| {
                    AppError::with_message(
                        AppErrorKind::Aborted,
                        codes::TRANSPORT_FAILURE,
                        format!("remote exec failed after reconnect: {err}"),
                    )
                    .with_context(format!(
                        "{}: {command}",
                        self.sessions.host_for(worker)
                    ))
                })
            }
        }
    }

    async fn exec_once(&self, worker: WorkerId, command: &str) -> AppResult<ChannelCapture> {
        let session = self.sessions.get_or_connect(worker).await?;
        let capture = session.exec_capture(command).await?;
        Ok(ChannelCapture {
            capture,
            target: session.target(),
        })
    }
}
