// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ConnectorPort, ExecCapture, RemoteExecPort};

mod error;
mod session;

pub use error::AuthenticationFailure;
pub use session::{JumpHost, SessionManager, SshParams};

/// Connection settings shared by every login node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub username: String,
    pub port: u16,
    pub identity_path: Option<String>,
    /// `[user@]host[:port]` of a bastion in front of the login nodes.
    pub jump_host: Option<String>,
    pub keepalive_secs: u64,
    pub known_hosts_path: Option<PathBuf>,
}

/// Opens russh sessions to login nodes.
#[derive(Clone)]
pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    pub fn params_for(&self, host: &str) -> SshParams {
        let (username, host, port) =
            parse_target(host, &self.settings.username, self.settings.port);
        let jump = self.settings.jump_host.as_deref().map(|jump| {
            let (username, host, port) = parse_target(jump, &self.settings.username, 22);
            JumpHost {
                host,
                port,
                username,
            }
        });
        SshParams {
            host,
            port,
            username,
            identity_path: self.settings.identity_path.clone(),
            jump,
            keepalive_secs: self.settings.keepalive_secs,
            known_hosts_path: self.settings.known_hosts_path.clone(),
        }
    }
}

/// Splits `[user@]host[:port]`, falling back to the given defaults.
fn parse_target(target: &str, default_user: &str, default_port: u16) -> (String, String, u16) {
    let target = target.trim();
    let (user, rest) = match target.split_once('@') {
        Some((user, rest)) if !user.is_empty() => (user.to_string(), rest),
        Some((_, rest)) => (default_user.to_string(), rest),
        None => (default_user.to_string(), target),
    };
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (rest.to_string(), default_port),
        },
        None => (rest.to_string(), default_port),
    };
    (user, host, port)
}

fn ssh_error_code(err: &anyhow::Error) -> &'static str {
    if err
        .chain()
        .any(|cause| cause.is::<AuthenticationFailure>())
    {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    }
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::REMOTE_ERROR,
        format!("ssh exec failed: {err:#}"),
    )
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Aborted,
        ssh_error_code(&err),
        format!("ssh connect failed: {err:#}"),
    )
}

#[async_trait]
impl ConnectorPort for SshConnector {
    #[tracing::instrument(name = "ssh", level = "debug", skip(self), fields(op = "connect"))]
    async fn connect(&self, host: &str) -> AppResult<Arc<dyn RemoteExecPort>> {
        let session = SessionManager::new(self.params_for(host));
        session.ensure_connected().await.map_err(map_connect_error)?;
        Ok(Arc::new(SshSession { session }))
    }
}

/// One authenticated connection, owned by a single dispatcher worker.
pub struct SshSession {
    session: SessionManager,
}

#[async_trait]
impl RemoteExecPort for SshSession {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "exec_capture", host = %self.session.params().host, user = %self.session.params().username)
    )]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let (stdout, stderr, exit_code) = self
            .session
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        Ok(ExecCapture {
            stdout,
            stderr,
            exit_code,
        })
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected_nonblocking()
    }

    async fn shutdown(&self) {
        self.session.shutdown().await;
    }

    fn target(&self) -> String {
        let params = self.session.params();
        format!("{}@{}", params.username, params.host)
    }
}
