// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

mod auth;
mod exec;


/// Minimal russh client handler that checks server keys against known_hosts.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
    /// Resolved address, when connecting directly. Tunnelled connections
    /// only know the name.
    addr: Option<SocketAddr>,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    fn new(
        host: String,
        port: u16,
        addr: Option<SocketAddr>,
        known_hosts_path: Option<PathBuf>,
    ) -> Self {
        Self {
            host,
            port,
            addr,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.port,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

/// Login node reached through another host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JumpHost {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// Parameters for establishing the SSH connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshParams {
    /// Hostname or IP, also used for the known_hosts lookup.
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key; the usual `~/.ssh/id_*` files are tried when unset.
    pub identity_path: Option<String>,
    pub jump: Option<JumpHost>,
    pub keepalive_secs: u64,
    /// Overrides `~/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

fn verify_server_key(
    host: &str,
    port: u16,
    addr: Option<SocketAddr>,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let rejected = |err: russh::keys::Error| {
        tracing::warn!("server key validation failed for {host}:{port}: {err}");
        anyhow!("server key validation failed for {host}:{port}: {err}")
    };
    if check_known_hosts_for(host, port, key, known_hosts_path).map_err(rejected)? {
        return Ok(true);
    }

    let ip_host = addr.map(|addr| addr.ip().to_string());
    if let Some(ip_host) = ip_host.as_deref().filter(|ip| *ip != host) {
        if check_known_hosts_for(ip_host, port, key, known_hosts_path).map_err(rejected)? {
            return Ok(true);
        }
    }

    tracing::info!("server key for {host}:{port} is not present in known_hosts; learning");
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        tracing::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

type Handle = russh::client::Handle<ClientHandler>;

/// Owns one SSH connection, optionally tunnelled through a jump host.
pub struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    handle: Mutex<Option<Handle>>,
    // Kept alive for as long as the tunnelled connection is in use.
    jump_handle: Mutex<Option<Handle>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let cfg = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(params.keepalive_secs.max(1))),
            channel_buffer_size: 64,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Mutex::new(None),
            jump_handle: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &SshParams {
        &self.params
    }

    pub async fn needs_connect(&self) -> bool {
        let handle_field = self.handle.lock().await;
        match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        }
    }

    pub fn is_connected_nonblocking(&self) -> bool {
        let Ok(handle_field) = self.handle.try_lock() else {
            // Busy running a command, so it was alive a moment ago.
            return true;
        };
        match handle_field.as_ref() {
            None => false,
            Some(h) if h.is_closed() => false,
            Some(_) => true,
        }
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        if let Some(jump) = self.jump_handle.lock().await.take() {
            let _ = jump
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
    }
}
