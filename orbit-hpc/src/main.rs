// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal::unix::{SignalKind, signal};

use orbit_hpc::adapters::cli::{self, Command, RunArgs};
use orbit_hpc::adapters::fs::LocalFilesystem;
use orbit_hpc::adapters::shell::LocalShellConnector;
use orbit_hpc::adapters::ssh::SshConnector;
use orbit_hpc::adapters::time::SystemClock;
use orbit_hpc::app::dispatch::{CommandDispatcher, SessionCache};
use orbit_hpc::app::overlay::HpcOverlay;
use orbit_hpc::app::ports::ConnectorPort;
use orbit_hpc::app::services::managers;
use orbit_hpc::app::types::JobResources;
use orbit_hpc::config::{self, BackendChoice, Transport};
use orbit_hpc::{logging, runner};

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config backend: {} (source={})",
        report.backend.value,
        report.backend.source.as_str()
    );
    tracing::info!(
        "config transport: {} (source={})",
        report.transport.value,
        report.transport.source.as_str()
    );
    tracing::info!(
        "config hosts: {} (source={})",
        report.hosts.value.join(","),
        report.hosts.source.as_str()
    );
    tracing::debug!(
        "config username: {} (source={})",
        report.username.value,
        report.username.source.as_str()
    );
    tracing::info!(
        "config hold_on_submit: {} (source={})",
        report.hold_on_submit.value,
        report.hold_on_submit.source.as_str()
    );
    tracing::info!(
        "config poll_interval_secs: {} (source={})",
        report.poll_interval_secs.value,
        report.poll_interval_secs.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

/// Cancels the run on SIGINT or SIGTERM.
fn install_signal_handler(overlay: HpcOverlay) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::warn!("received SIGTERM, cancelling run"),
            _ = sigint.recv() => tracing::warn!("received SIGINT, cancelling run"),
        }
        overlay.cancel();
    });
    Ok(())
}

async fn run(config: config::Config, args: RunArgs) -> anyhow::Result<bool> {
    let commands = args.all_commands();
    if commands.is_empty() {
        anyhow::bail!("nothing to run; pass --command CMD or -- CMD...");
    }
    let working_dir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };

    let connector: Arc<dyn ConnectorPort> = match config.transport {
        Transport::Ssh => Arc::new(SshConnector::new(config.ssh.clone())),
        Transport::Local => Arc::new(LocalShellConnector::new()),
    };
    let manager = match config.backend {
        BackendChoice::Manager(manager) => manager,
        BackendChoice::Auto => managers::detect(connector.as_ref(), &config.hosts[0]).await?,
    };
    let sessions = Arc::new(SessionCache::new(connector, config.hosts.clone())?);
    let dispatcher =
        CommandDispatcher::new(sessions, manager.backend(), config.pools, config.retries);
    let overlay = HpcOverlay::new(
        dispatcher,
        Arc::new(LocalFilesystem::new()),
        Arc::new(SystemClock::new()),
        config.overlay_settings()?,
    );
    install_signal_handler(overlay.clone())?;

    let request = runner::RunRequest {
        name: args.name,
        commands,
        working_dir,
        resources: JobResources {
            walltime: args.walltime.map(Duration::from_secs),
            processes: args.processes.max(1),
            threads: args.threads.max(1),
            ..JobResources::default()
        },
    };
    let jobs = runner::build_jobs(&request);
    tracing::info!(count = jobs.len(), backend = overlay.backend().name(), "submitting jobs");
    let report = runner::run_jobs(&overlay, &jobs).await;

    for job in &report.jobs {
        match (&job.outcome, &job.error) {
            (Some(outcome), _) => println!("{}\t{}\t{}", job.key, outcome.exit_code, job.command),
            (None, Some(err)) => println!("{}\t-\t{}\t({err})", job.key, job.command),
            (None, None) => println!("{}\t-\t{}", job.key, job.command),
        }
    }
    let stats = &report.stats;
    tracing::info!(
        done = stats.done,
        failed = stats.failed,
        killed = stats.killed,
        resubmitted = stats.resubmitted,
        "run finished"
    );
    if let Some(fatal) = &report.fatal {
        tracing::error!("run aborted: {fatal}");
    }
    Ok(report.succeeded())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let parsed = cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            backend: opts.backend,
            transport: opts.transport,
            hosts: opts.hosts,
            username: opts.username,
            identity_path: opts.identity_path,
            account: opts.account,
            poll_interval_secs: opts.poll_interval_secs,
            hold_on_submit: parsed.hold_override,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let succeeded = match opts.command {
        Command::Run(args) => run(config, args).await?,
    };
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
