// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ConnectorPort, RemoteExecPort};
use crate::app::types::ExecCategory;

/// Identity of one pool worker. Each worker owns at most one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub category: ExecCategory,
    pub index: usize,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.category, self.index)
    }
}

/// Connections cached per worker, created lazily through the connector.
pub struct SessionCache {
    sessions: RwLock<HashMap<WorkerId, Arc<dyn RemoteExecPort>>>,
    connector: Arc<dyn ConnectorPort>,
    hosts: Vec<String>,
}

impl SessionCache {
    pub fn new(connector: Arc<dyn ConnectorPort>, hosts: Vec<String>) -> AppResult<Self> {
        if hosts.iter().all(|host| host.trim().is_empty()) {
            return Err(AppError::with_message(
                AppErrorKind::InvalidArgument,
                codes::INVALID_ARGUMENT,
                "at least one remote host is required",
            ));
        }
        let hosts = hosts
            .into_iter()
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .collect();
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            hosts,
        })
    }

    /// Workers are spread over the configured login hosts.
    pub fn host_for(&self, worker: WorkerId) -> &str {
        &self.hosts[worker.index % self.hosts.len()]
    }

    pub async fn get(&self, worker: WorkerId) -> Option<Arc<dyn RemoteExecPort>> {
        self.sessions.read().await.get(&worker).cloned()
    }

    pub async fn get_or_connect(&self, worker: WorkerId) -> AppResult<Arc<dyn RemoteExecPort>> {
        if let Some(existing) = self.get(worker).await {
            if existing.is_connected() {
                return Ok(existing);
            }
            self.remove_and_shutdown(worker).await;
        }

        let host = self.host_for(worker);
        tracing::debug!(worker = %worker, host, "opening connection");
        let session = self.connector.connect(host).await?;
        self.sessions
            .write()
            .await
            .insert(worker, Arc::clone(&session));
        Ok(session)
    }

    pub async fn remove_and_shutdown(&self, worker: WorkerId) -> bool {
        let session = self.sessions.write().await.remove(&worker);
        if let Some(session) = session {
            session.shutdown().await;
            return true;
        }
        false
    }

    pub async fn shutdown_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in sessions {
            session.shutdown().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
