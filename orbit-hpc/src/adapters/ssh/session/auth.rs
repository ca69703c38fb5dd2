// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::AuthResult;
use russh::keys::PrivateKeyWithHashAlg;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::ssh::AuthenticationFailure;

use super::{ClientHandler, Handle, JumpHost, SessionManager};

const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

fn is_authenticated(result: &AuthResult) -> bool {
    matches!(result, AuthResult::Success)
}

/// Keys to offer, in order. An explicit identity is the only candidate.
fn identity_candidates(explicit: Option<&str>, home: Option<PathBuf>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![PathBuf::from(shellexpand::tilde(path).into_owned())];
    }
    let Some(home) = home else {
        return Vec::new();
    };
    DEFAULT_IDENTITIES
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|path| path.is_file())
        .collect()
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no address for {host}:{port}"))
}

impl SessionManager {
    /// Connects and authenticates unless a live handle already exists.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;
        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        };
        if !needs_connect {
            return Ok(());
        }
        let handle = match self.params.jump.clone() {
            Some(jump) => self.connect_via(&jump).await?,
            None => self.connect_direct().await?,
        };
        tracing::info!(
            "connected to {}@{}:{}",
            self.params.username,
            self.params.host,
            self.params.port
        );
        *handle_field = Some(handle);
        Ok(())
    }

    async fn connect_direct(&self) -> Result<Handle> {
        let params = &self.params;
        let addr = resolve(&params.host, params.port).await?;
        let handler = ClientHandler::new(
            params.host.clone(),
            params.port,
            Some(addr),
            params.known_hosts_path.clone(),
        );
        let mut handle = russh::client::connect(self.config.clone(), addr, handler)
            .await
            .context("SSH connect failed")?;
        self.authenticate(&mut handle, &params.username).await?;
        Ok(handle)
    }

    async fn connect_via(&self, jump: &JumpHost) -> Result<Handle> {
        let params = &self.params;
        let jump_addr = resolve(&jump.host, jump.port).await?;
        let jump_handler = ClientHandler::new(
            jump.host.clone(),
            jump.port,
            Some(jump_addr),
            params.known_hosts_path.clone(),
        );
        let mut jump_handle = russh::client::connect(self.config.clone(), jump_addr, jump_handler)
            .await
            .with_context(|| format!("SSH connect to jump host {} failed", jump.host))?;
        self.authenticate(&mut jump_handle, &jump.username).await?;
        tracing::debug!("jump host {} ready, opening tunnel", jump.host);

        let channel = jump_handle
            .channel_open_direct_tcpip(params.host.clone(), u32::from(params.port), "127.0.0.1", 0)
            .await
            .with_context(|| format!("tunnel to {}:{} failed", params.host, params.port))?;
        let handler = ClientHandler::new(
            params.host.clone(),
            params.port,
            None,
            params.known_hosts_path.clone(),
        );
        let mut handle =
            russh::client::connect_stream(self.config.clone(), channel.into_stream(), handler)
                .await
                .context("SSH connect through jump host failed")?;
        self.authenticate(&mut handle, &params.username).await?;
        *self.jump_handle.lock().await = Some(jump_handle);
        Ok(handle)
    }

    async fn authenticate(&self, handle: &mut Handle, username: &str) -> Result<()> {
        let candidates =
            identity_candidates(self.params.identity_path.as_deref(), dirs::home_dir());
        for path in candidates {
            let key = match russh::keys::load_secret_key(&path, None) {
                Ok(key) => Arc::new(key),
                Err(err) if self.params.identity_path.is_some() => {
                    return Err(err).with_context(|| {
                        format!("failed to load secret key at {}", path.display())
                    });
                }
                Err(err) => {
                    tracing::debug!("skipping key {}: {err}", path.display());
                    continue;
                }
            };
            // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
            let hash = handle.best_supported_rsa_hash().await?.flatten();
            let pk = PrivateKeyWithHashAlg::new(key, hash);
            let result = handle
                .authenticate_publickey(username.to_string(), pk)
                .await?;
            if is_authenticated(&result) {
                return Ok(());
            }
            tracing::debug!("key {} rejected for {username}", path.display());
        }
        Err(AuthenticationFailure.into())
    }
}
