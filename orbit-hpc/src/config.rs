// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::adapters::ssh::SshSettings;
use crate::app::dispatch::{PoolSizes, RetryPolicy};
use crate::app::overlay::OverlaySettings;
use crate::app::services::managers::WorkloadManager;
use crate::app::types::ContainerSpec;

const APP_DIR_NAME: &str = "orbit-hpc";
const CONFIG_FILE_NAME: &str = "orbit-hpc.toml";
const CONFIG_ENV_VAR: &str = "ORBIT_HPC_CONFIG_PATH";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_CONTAINER_RUNTIME: &str = "apptainer";
const LOCAL_HOST_LABEL: &str = "localhost";

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    backend: Option<String>,
    transport: Option<String>,
    hosts: Option<Vec<String>>,
    username: Option<String>,
    port: Option<u16>,
    identity_path: Option<String>,
    jump_host: Option<String>,
    keepalive_secs: Option<u64>,
    known_hosts_path: Option<String>,
    account: Option<String>,
    hold_on_submit: Option<bool>,
    poll_interval_secs: Option<u64>,
    status_batch_size: Option<usize>,
    result_wait_passes: Option<u32>,
    retry_delay_secs: Option<u64>,
    script_template: Option<String>,
    pools: Option<FilePools>,
    retries: Option<FileRetries>,
    container: Option<FileContainer>,
    verbose: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FilePools {
    submit: Option<usize>,
    release: Option<usize>,
    status: Option<usize>,
    cancel: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRetries {
    submit: Option<u32>,
    release: Option<u32>,
    status: Option<u32>,
    cancel: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FileContainer {
    runtime: Option<String>,
    image: String,
    #[serde(default)]
    binds: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
}

/// How scheduler commands reach the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ssh,
    /// Already on a login node: run through a local shell.
    Local,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "local" | "shell" => Ok(Self::Local),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ssh => f.write_str("ssh"),
            Transport::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// Probe the first login host for `sbatch`/`qsub`.
    Auto,
    Manager(WorkloadManager),
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        s.parse::<WorkloadManager>().map(Self::Manager)
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Auto => f.write_str("auto"),
            BackendChoice::Manager(WorkloadManager::Slurm) => f.write_str("slurm"),
            BackendChoice::Manager(WorkloadManager::PBS) => f.write_str("pbs"),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub backend: BackendChoice,
    pub transport: Transport,
    pub hosts: Vec<String>,
    pub ssh: SshSettings,
    pub pools: PoolSizes,
    pub retries: RetryPolicy,
    pub overlay: OverlaySettings,
    pub script_template_path: Option<PathBuf>,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Overlay settings with the custom script template, if any, read in.
    pub fn overlay_settings(&self) -> Result<OverlaySettings> {
        let mut settings = self.overlay.clone();
        if let Some(path) = self.script_template_path.as_deref() {
            let template = fs::read_to_string(path)
                .with_context(|| format!("failed to read script template {}", path.display()))?;
            settings.script_template = Some(template);
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub backend: ConfigValue<BackendChoice>,
    pub transport: ConfigValue<Transport>,
    pub hosts: ConfigValue<Vec<String>>,
    pub username: ConfigValue<String>,
    pub hold_on_submit: ConfigValue<bool>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub verbose: ConfigValue<bool>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub backend: Option<String>,
    pub transport: Option<String>,
    /// Empty means "not given".
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub identity_path: Option<PathBuf>,
    pub account: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub hold_on_submit: Option<bool>,
    pub verbose: Option<bool>,
}

/// Picks the override, then the file value, then the default.
fn layered<T>(over: Option<T>, file: Option<T>, default: impl FnOnce() -> T) -> (T, ConfigSource) {
    match over {
        Some(value) => (value, ConfigSource::Override),
        None => match file {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (default(), ConfigSource::Default),
        },
    }
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (backend_raw, backend_source) =
        layered(overrides.backend, file_config.backend, || "auto".to_string());
    let backend = backend_raw
        .parse::<BackendChoice>()
        .map_err(anyhow::Error::msg)
        .context("invalid backend")?;

    let (transport_raw, transport_source) =
        layered(overrides.transport, file_config.transport, || "ssh".to_string());
    let transport = transport_raw
        .parse::<Transport>()
        .map_err(anyhow::Error::msg)
        .context("invalid transport")?;

    let hosts_override = Some(overrides.hosts).filter(|hosts| !hosts.is_empty());
    let (hosts, hosts_source) = layered(hosts_override, file_config.hosts, Vec::new);
    let hosts: Vec<String> = hosts
        .into_iter()
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .collect();
    let hosts = match (hosts.is_empty(), transport) {
        (false, _) => hosts,
        (true, Transport::Local) => vec![LOCAL_HOST_LABEL.to_string()],
        (true, Transport::Ssh) => {
            anyhow::bail!(
                "at least one login host is required; pass --host or set hosts in the config file"
            )
        }
    };

    let (username, username_source) = layered(overrides.username, file_config.username, || {
        std::env::var("USER").unwrap_or_default()
    });
    if transport == Transport::Ssh && username.trim().is_empty() {
        anyhow::bail!(
            "ssh username is required; pass --username or set username in the config file"
        );
    }

    let identity_path = match overrides.identity_path {
        Some(path) => Some(expand_path(path).to_string_lossy().into_owned()),
        None => file_config
            .identity_path
            .map(|raw| resolve_path(&raw, base_dir).to_string_lossy().into_owned()),
    };
    let port = file_config.port.unwrap_or(DEFAULT_SSH_PORT);
    if port == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let ssh = SshSettings {
        username: username.clone(),
        port,
        identity_path,
        jump_host: file_config
            .jump_host
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty()),
        keepalive_secs: file_config.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
        known_hosts_path: file_config
            .known_hosts_path
            .map(|raw| resolve_path(&raw, base_dir)),
    };

    let pool_defaults = PoolSizes::default();
    let file_pools = file_config.pools.unwrap_or_default();
    let pools = PoolSizes {
        submit: file_pools.submit.unwrap_or(pool_defaults.submit),
        release: file_pools.release.unwrap_or(pool_defaults.release),
        status: file_pools.status.unwrap_or(pool_defaults.status),
        cancel: file_pools.cancel.unwrap_or(pool_defaults.cancel),
    };
    if [pools.submit, pools.release, pools.status, pools.cancel].contains(&0) {
        anyhow::bail!("pool sizes must be at least 1");
    }

    let retry_defaults = RetryPolicy::default();
    let file_retries = file_config.retries.unwrap_or_default();
    let retries = RetryPolicy {
        submit: file_retries.submit.unwrap_or(retry_defaults.submit),
        release: file_retries.release.unwrap_or(retry_defaults.release),
        status: file_retries.status.unwrap_or(retry_defaults.status),
        cancel: file_retries.cancel.unwrap_or(retry_defaults.cancel),
        delay: file_config
            .retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(retry_defaults.delay),
    };

    let overlay_defaults = OverlaySettings::default();
    let (hold_on_submit, hold_source) = layered(
        overrides.hold_on_submit,
        file_config.hold_on_submit,
        || overlay_defaults.hold_on_submit,
    );
    let (poll_interval_secs, poll_source) = layered(
        overrides.poll_interval_secs,
        file_config.poll_interval_secs,
        || overlay_defaults.poll_interval.as_secs(),
    );
    if poll_interval_secs == 0 {
        anyhow::bail!("poll_interval_secs must be at least 1");
    }
    let status_batch_size = file_config
        .status_batch_size
        .unwrap_or(overlay_defaults.status_batch_size);
    if status_batch_size == 0 {
        anyhow::bail!("status_batch_size must be at least 1");
    }
    let container = file_config.container.map(|container| ContainerSpec {
        runtime: container
            .runtime
            .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string()),
        image: container.image,
        binds: container.binds,
        args: container.args,
    });
    let overlay = OverlaySettings {
        hold_on_submit,
        poll_interval: Duration::from_secs(poll_interval_secs),
        status_batch_size,
        result_wait_passes: file_config
            .result_wait_passes
            .unwrap_or(overlay_defaults.result_wait_passes),
        account: overrides
            .account
            .or(file_config.account)
            .filter(|account| !account.trim().is_empty()),
        container,
        script_template: None,
    };

    let (verbose, verbose_source) = layered(overrides.verbose, file_config.verbose, || false);

    let config = Config {
        backend,
        transport,
        hosts,
        ssh,
        pools,
        retries,
        overlay,
        script_template_path: file_config
            .script_template
            .map(|raw| resolve_path(&raw, base_dir)),
        verbose,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        backend: ConfigValue {
            value: config.backend,
            source: backend_source,
        },
        transport: ConfigValue {
            value: config.transport,
            source: transport_source,
        },
        hosts: ConfigValue {
            value: config.hosts.clone(),
            source: hosts_source,
        },
        username: ConfigValue {
            value: username,
            source: username_source,
        },
        hold_on_submit: ConfigValue {
            value: hold_on_submit,
            source: hold_source,
        },
        poll_interval_secs: ConfigValue {
            value: poll_interval_secs,
            source: poll_source,
        },
        verbose: ConfigValue {
            value: verbose,
            source: verbose_source,
        },
    };

    Ok(LoadResult { config, report })
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                Some(value) => unsafe { std::env::set_var(self.key, value) },
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                None => unsafe { std::env::remove_var(self.key) },
            }
        }
    }

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("orbit-hpc.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    fn ssh_overrides() -> Overrides {
        Overrides {
            username: Some("alice".to_string()),
            ..Overrides::default()
        }
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let cfg = read_config_file(&dir.path().join("missing.toml"), false).unwrap();
        assert!(cfg.hosts.is_none());
        assert!(cfg.backend.is_none());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = read_config_file(&dir.path().join("missing.toml"), true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn full_file_is_mapped_onto_settings() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
backend = "slurm"
hosts = ["login1", "login2"]
username = "alice"
port = 2222
identity_path = "keys/cluster"
jump_host = "gate@bastion"
account = "proj42"
hold_on_submit = false
poll_interval_secs = 30
status_batch_size = 50
result_wait_passes = 5
retry_delay_secs = 2
script_template = "templates/submit.tera"

[pools]
submit = 8
status = 1

[retries]
submit = 6

[container]
image = "/images/tools.sif"
binds = ["/shared"]
"#,
        );
        let config = load(Some(path), Overrides::default()).unwrap();
        let config_dir = dir.path().join("config");

        assert_eq!(config.backend, BackendChoice::Manager(WorkloadManager::Slurm));
        assert_eq!(config.transport, Transport::Ssh);
        assert_eq!(config.hosts, vec!["login1", "login2"]);
        assert_eq!(config.ssh.port, 2222);
        assert_eq!(
            config.ssh.identity_path,
            Some(config_dir.join("keys/cluster").to_string_lossy().into_owned())
        );
        assert_eq!(config.ssh.jump_host.as_deref(), Some("gate@bastion"));
        assert_eq!(config.pools.submit, 8);
        assert_eq!(config.pools.status, 1);
        assert_eq!(config.pools.release, PoolSizes::default().release);
        assert_eq!(config.retries.submit, 6);
        assert_eq!(config.retries.delay, Duration::from_secs(2));
        assert!(!config.overlay.hold_on_submit);
        assert_eq!(config.overlay.poll_interval, Duration::from_secs(30));
        assert_eq!(config.overlay.status_batch_size, 50);
        assert_eq!(config.overlay.result_wait_passes, 5);
        assert_eq!(config.overlay.account.as_deref(), Some("proj42"));
        let container = config.overlay.container.as_ref().unwrap();
        assert_eq!(container.runtime, "apptainer");
        assert_eq!(container.binds, vec!["/shared"]);
        assert_eq!(
            config.script_template_path,
            Some(config_dir.join("templates/submit.tera"))
        );
    }

    #[test]
    fn overrides_apply_per_field() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "backend = \"slurm\"\nhosts = [\"login1\"]\nusername = \"alice\"\npoll_interval_secs = 30\n",
        );
        let LoadResult { config, report } = load_with_report(
            Some(path),
            Overrides {
                backend: Some("pbs".to_string()),
                hosts: vec!["login9".to_string()],
                hold_on_submit: Some(false),
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(config.backend, BackendChoice::Manager(WorkloadManager::PBS));
        assert_eq!(config.hosts, vec!["login9"]);
        assert_eq!(config.overlay.poll_interval, Duration::from_secs(30));
        assert!(!config.overlay.hold_on_submit);
        assert_eq!(report.backend.source, ConfigSource::Override);
        assert_eq!(report.poll_interval_secs.source, ConfigSource::ConfigFile);
        assert_eq!(report.username.source, ConfigSource::ConfigFile);
        assert_eq!(report.verbose.source, ConfigSource::Default);
    }

    #[test]
    fn defaults_without_file_values() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "hosts = [\"login1\"]\n");
        let config = load(Some(path), ssh_overrides()).unwrap();
        assert_eq!(config.backend, BackendChoice::Auto);
        assert_eq!(config.pools, PoolSizes::default());
        assert_eq!(config.retries, RetryPolicy::default());
        assert_eq!(config.overlay, OverlaySettings::default());
        assert_eq!(config.ssh.port, DEFAULT_SSH_PORT);
        assert!(!config.verbose);
    }

    #[test]
    fn ssh_requires_hosts_but_local_does_not() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "");
        let err = load(Some(path.clone()), ssh_overrides()).unwrap_err();
        assert!(err.to_string().contains("login host"));

        let config = load(
            Some(path),
            Overrides {
                transport: Some("local".to_string()),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.transport, Transport::Local);
        assert_eq!(config.hosts, vec![LOCAL_HOST_LABEL]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        for contents in [
            "hosts = [\"h\"]\nbackend = \"condor\"\n",
            "hosts = [\"h\"]\ntransport = \"telnet\"\n",
            "hosts = [\"h\"]\npoll_interval_secs = 0\n",
            "hosts = [\"h\"]\nstatus_batch_size = 0\n",
            "hosts = [\"h\"]\n[pools]\ncancel = 0\n",
        ] {
            let path = write_config(&dir, contents);
            assert!(load(Some(path), ssh_overrides()).is_err(), "{contents}");
        }
    }

    #[test]
    fn script_template_is_read_relative_to_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "hosts = [\"h\"]\nscript_template = \"submit.tera\"\n",
        );
        fs::write(dir.path().join("config/submit.tera"), "#!/bin/sh\n{{ command }}\n").unwrap();

        let config = load(Some(path), ssh_overrides()).unwrap();
        let settings = config.overlay_settings().unwrap();
        assert_eq!(
            settings.script_template.as_deref(),
            Some("#!/bin/sh\n{{ command }}\n")
        );
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "hosts = [\"from-env\"]\n");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, path.to_str().unwrap());

        let LoadResult { config, report } = load_with_report(None, ssh_overrides()).unwrap();
        assert_eq!(config.hosts, vec!["from-env"]);
        assert_eq!(config.config_path, Some(path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Env));
    }

    #[test]
    fn cli_config_path_takes_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("env.toml");
        let cli_path = dir.path().join("cli.toml");
        fs::write(&env_path, "hosts = [\"from-env\"]\n").unwrap();
        fs::write(&cli_path, "hosts = [\"from-cli\"]\n").unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, env_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(Some(cli_path.clone()), ssh_overrides()).unwrap();
        assert_eq!(config.hosts, vec!["from-cli"]);
        assert_eq!(report.config_path_source, Some(ConfigSource::Override));
    }

    #[test]
    fn empty_env_config_path_is_an_error() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, "");
        let err = load(None, ssh_overrides()).unwrap_err();
        assert!(err.to_string().contains("set but empty"));
    }
}
