// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "orbit-hpc",
    version,
    about,
    long_about = None,
    after_help = "orbit-hpc runs commands on a Slurm or PBS cluster and waits for them.\n\
\n\
Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < ORBIT_HPC_CONFIG_PATH < command-line flags.\n\
If --config is omitted, orbit-hpc tries ORBIT_HPC_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory; paths passed as flags are resolved relative to the current working directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, orbit-hpc uses ORBIT_HPC_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "NAME",
        help = "Batch scheduler: slurm, pbs or auto. Overrides `backend` from the config file."
    )]
    pub backend: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "KIND",
        help = "How commands reach the cluster: ssh or local. Overrides `transport` from the config file."
    )]
    pub transport: Option<String>,
    #[arg(
        long = "host",
        global = true,
        value_name = "[USER@]HOST[:PORT]",
        help = "Login node to run scheduler commands on; repeat for several. Overrides `hosts` from the config file."
    )]
    pub hosts: Vec<String>,
    #[arg(
        long,
        global = true,
        value_name = "USER",
        help = "SSH username. Overrides `username` from the config file."
    )]
    pub username: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "SSH private key. Overrides `identity_path` from the config file."
    )]
    pub identity_path: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "NAME",
        help = "Scheduler account to charge. Overrides `account` from the config file."
    )]
    pub account: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Seconds between status passes. Overrides `poll_interval_secs` from the config file."
    )]
    pub poll_interval_secs: Option<u64>,
    #[arg(
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Submit jobs unheld. Overrides `hold_on_submit` from the config file."
    )]
    pub no_hold: bool,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run commands as batch jobs and wait for all of them.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, value_name = "NAME", help = "Job name; numbered when several commands are given.")]
    pub name: Option<String>,
    #[arg(long, value_name = "SECS", help = "Walltime limit per job.")]
    pub walltime: Option<u64>,
    #[arg(long, value_name = "N", default_value_t = 1, help = "Threads per process.")]
    pub threads: u32,
    #[arg(long, value_name = "N", default_value_t = 1, help = "Processes per job.")]
    pub processes: u32,
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory the jobs run in and write their files to. Must be shared with the cluster. Defaults to the current directory."
    )]
    pub workdir: Option<PathBuf>,
    #[arg(
        long = "command",
        value_name = "CMD",
        help = "Shell command to run; repeat for several jobs."
    )]
    pub commands: Vec<String>,
    #[arg(last = true, value_name = "COMMAND", help = "Command to run, after `--`.")]
    pub trailing: Vec<String>,
}

impl RunArgs {
    /// Every command to run: the repeated `--command` values, then the
    /// trailing words joined into one more.
    pub fn all_commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self
            .commands
            .iter()
            .map(|cmd| cmd.trim().to_string())
            .filter(|cmd| !cmd.is_empty())
            .collect();
        if !self.trailing.is_empty() {
            commands.push(self.trailing.join(" "));
        }
        commands
    }
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
    pub hold_override: Option<bool>,
}

const HELP_TEMPLATE: &str = r#"{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
"#;

fn apply_help_template_recursively(cmd: &mut clap::Command) {
    let mut owned = std::mem::take(cmd);
    owned = owned.help_template(HELP_TEMPLATE);
    for sub in owned.get_subcommands_mut() {
        apply_help_template_recursively(sub);
    }
    *cmd = owned;
}

pub fn cli_command() -> clap::Command {
    let mut cmd = Opts::command();
    apply_help_template_recursively(&mut cmd);
    cmd
}

fn parsed_from_matches(matches: &clap::ArgMatches) -> Result<ParsedOpts, clap::Error> {
    let opts = Opts::from_arg_matches(matches)?;
    let verbose_override = opts.verbose.then_some(true);
    let hold_override = opts.no_hold.then_some(false);
    Ok(ParsedOpts {
        opts,
        verbose_override,
        hold_override,
    })
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    parsed_from_matches(&matches).unwrap_or_else(|err| err.exit())
}
