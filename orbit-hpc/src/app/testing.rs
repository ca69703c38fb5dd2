// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Scripted fakes for the ports, shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::dispatch::{CommandDispatcher, PoolSizes, RetryPolicy, SessionCache};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::overlay::{HpcOverlay, OverlaySettings};
use crate::app::ports::{
    ClockPort, ConnectorPort, ExecCapture, JobTimer, LocalFilesystemPort, LocalJob,
    RemoteExecPort, SchedulerBackend,
};
use crate::app::timer::PhaseTimer;
use crate::app::types::{ExecCategory, JobOutcome, JobResources, RemoteStatus, SubmitContext};

pub fn capture(exit_code: i32, stdout: &str, stderr: &str) -> ExecCapture {
    ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        exit_code,
    }
}

type Responder = Box<dyn Fn(&str) -> AppResult<ExecCapture> + Send + Sync>;

#[derive(Default)]
struct Script {
    queued: Mutex<VecDeque<AppResult<ExecCapture>>>,
    responder: Mutex<Option<Responder>>,
    commands: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

/// Connector whose sessions answer from a queue, then from a responder,
/// then with an empty success.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_capture(&self, result: AppResult<ExecCapture>) {
        self.script.queued.lock().unwrap().push_back(result);
    }

    pub fn push_transport_error(&self) {
        self.push_capture(Err(AppError::with_message(
            AppErrorKind::Aborted,
            codes::CONNECTION_FAILURE,
            "connection reset by peer",
        )));
    }

    pub fn respond_with(
        &self,
        responder: impl Fn(&str) -> AppResult<ExecCapture> + Send + Sync + 'static,
    ) {
        *self.script.responder.lock().unwrap() = Some(Box::new(responder));
    }

    pub fn commands(&self) -> Vec<String> {
        self.script.commands.lock().unwrap().clone()
    }

    pub fn commands_containing(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|command| command.contains(needle))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorPort for ScriptedConnector {
    async fn connect(&self, host: &str) -> AppResult<Arc<dyn RemoteExecPort>> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            script: Arc::clone(&self.script),
            host: host.to_string(),
            connected: AtomicBool::new(true),
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    host: String,
    connected: AtomicBool,
}

#[async_trait]
impl RemoteExecPort for ScriptedSession {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        self.script
            .commands
            .lock()
            .unwrap()
            .push(command.to_string());
        let queued = self.script.queued.lock().unwrap().pop_front();
        let result = match queued {
            Some(result) => result,
            None => match self.script.responder.lock().unwrap().as_ref() {
                Some(responder) => responder(command),
                None => Ok(capture(0, "", "")),
            },
        };
        if result.is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn target(&self) -> String {
        format!("tester@{}", self.host)
    }
}

/// Minimal line-oriented backend: `<id> <STATE>` status lines.
pub struct TestBackend {
    retry_marker: Option<&'static str>,
}

impl TestBackend {
    pub fn transient() -> Self {
        Self {
            retry_marker: Some("timed out"),
        }
    }

    pub fn never_retry() -> Self {
        Self { retry_marker: None }
    }
}

impl SchedulerBackend for TestBackend {
    fn name(&self) -> &'static str {
        "test"
    }

    fn script_directives(&self, ctx: &SubmitContext) -> Vec<String> {
        vec![format!("#TEST name={}", ctx.job_name)]
    }

    fn submit_command(&self, script_path: &str, hold: bool) -> String {
        if hold {
            format!("submit --hold {script_path}")
        } else {
            format!("submit {script_path}")
        }
    }

    fn release_command(&self, job_id: &str) -> String {
        format!("release {job_id}")
    }

    fn cancel_command(&self, job_ids: &[String]) -> String {
        format!("cancel {}", job_ids.join(" "))
    }

    fn status_command(&self, job_ids: &[String]) -> String {
        format!("status {}", job_ids.join(","))
    }

    fn parse_status(&self, output: &str) -> HashMap<String, RemoteStatus> {
        output
            .lines()
            .filter_map(|line| {
                let (id, state) = line.trim().split_once(' ')?;
                let status = match state.trim() {
                    "Q" => RemoteStatus::Queued,
                    "R" => RemoteStatus::Running,
                    _ => RemoteStatus::Finished { exit_code: None },
                };
                Some((id.to_string(), status))
            })
            .collect()
    }

    fn job_id_var(&self) -> &'static str {
        "TEST_JOB_ID"
    }

    fn parse_job_id(&self, submit_output: &str) -> Option<String> {
        submit_output.split_whitespace().next().map(str::to_string)
    }

    fn should_retry(&self, _category: ExecCategory, failure_text: &str) -> bool {
        self.retry_marker
            .map(|marker| failure_text.contains(marker))
            .unwrap_or(false)
    }
}

/// In-memory shared filesystem.
#[derive(Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<PathBuf, String>>,
    dirs: Mutex<HashSet<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: impl Into<PathBuf>, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), contents.to_string());
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn has_dir(&self, path: &Path) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalFilesystemPort for MemoryFs {
    async fn create_dir_all(&self, path: &Path) -> AppResult<()> {
        self.dirs.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> AppResult<()> {
        self.files.lock().unwrap().remove(path);
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn write(&self, path: &Path, contents: &str) -> AppResult<()> {
        self.put(path, contents);
        Ok(())
    }

    async fn read_to_string(&self, path: &Path) -> AppResult<Option<String>> {
        Ok(self.get(path))
    }
}

pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn at(secs: i64) -> Self {
        Self {
            now: Mutex::new(OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs)),
        }
    }

    pub fn set(&self, secs: i64) {
        *self.now.lock().unwrap() = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs);
    }
}

impl ClockPort for ManualClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

pub fn epoch(secs: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs)
}

pub struct FakeJob {
    key: String,
    command: String,
    prefix: PathBuf,
    skipped: AtomicBool,
    caveats: Mutex<Vec<String>>,
    timer: PhaseTimer,
    outcomes: Mutex<Vec<JobOutcome>>,
}

impl FakeJob {
    pub fn new(key: &str, command: &str) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            command: command.to_string(),
            prefix: PathBuf::from(format!("/shared/out/{key}")),
            skipped: AtomicBool::new(false),
            caveats: Mutex::new(Vec::new()),
            timer: PhaseTimer::new(),
            outcomes: Mutex::new(Vec::new()),
        })
    }

    pub fn skip(&self) {
        self.skipped.store(true, Ordering::SeqCst);
    }

    pub fn caveats(&self) -> Vec<String> {
        self.caveats.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn phase_timer(&self) -> &PhaseTimer {
        &self.timer
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl LocalJob for FakeJob {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.key
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn output_prefix(&self) -> PathBuf {
        self.prefix.clone()
    }

    fn working_dir(&self) -> PathBuf {
        PathBuf::from("/shared/work")
    }

    fn resources(&self) -> JobResources {
        JobResources {
            walltime: Some(std::time::Duration::from_secs(3600)),
            threads: 4,
            ..JobResources::default()
        }
    }

    fn expected_outputs(&self) -> Vec<PathBuf> {
        vec![PathBuf::from(format!("/shared/out/{}.bam", self.key))]
    }

    fn is_skipped(&self) -> bool {
        self.skipped.load(Ordering::SeqCst)
    }

    fn add_caveat(&self, caveat: String) {
        self.caveats.lock().unwrap().push(caveat);
    }

    fn remove_caveat(&self, caveat: &str) {
        self.caveats.lock().unwrap().retain(|existing| existing != caveat);
    }

    fn timer(&self) -> &dyn JobTimer {
        &self.timer
    }

    fn finished(&self, outcome: JobOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

type RemoteTable = Arc<Mutex<HashMap<String, String>>>;
type Failures = Arc<Mutex<Vec<(&'static str, String)>>>;

/// Overlay wired to scripted fakes. The fake scheduler hands out ids from
/// 101 upwards, lists every submitted job as `Q` until told otherwise, and
/// forgets nothing unless asked.
pub struct Harness {
    pub overlay: HpcOverlay,
    pub connector: Arc<ScriptedConnector>,
    pub fs: Arc<MemoryFs>,
    pub clock: Arc<ManualClock>,
    remote: RemoteTable,
    failures: Failures,
}

impl Harness {
    pub fn new(settings: OverlaySettings) -> Self {
        let connector = Arc::new(ScriptedConnector::new());
        let remote: RemoteTable = Arc::default();
        let failures: Failures = Arc::default();
        let next_id = Arc::new(AtomicUsize::new(101));
        {
            let remote = Arc::clone(&remote);
            let failures = Arc::clone(&failures);
            connector.respond_with(move |command| {
                {
                    let mut failures = failures.lock().unwrap();
                    if let Some(pos) = failures
                        .iter()
                        .position(|(needle, _)| command.contains(needle))
                    {
                        let (_, stderr) = failures.remove(pos);
                        return Ok(capture(1, "", &stderr));
                    }
                }
                let mut remote = remote.lock().unwrap();
                if let Some(ids) = command.strip_prefix("status ") {
                    let listing: String = ids
                        .split(',')
                        .filter_map(|id| remote.get(id).map(|state| format!("{id} {state}\n")))
                        .collect();
                    return Ok(capture(0, &listing, ""));
                }
                if let Some(id) = command.strip_prefix("release ") {
                    remote.insert(id.to_string(), "Q".to_string());
                    return Ok(capture(0, "", ""));
                }
                if let Some(ids) = command.strip_prefix("cancel ") {
                    for id in ids.split_whitespace() {
                        remote.insert(id.to_string(), "F".to_string());
                    }
                    return Ok(capture(0, "", ""));
                }
                if command.contains("submit ") {
                    let id = next_id.fetch_add(1, Ordering::SeqCst).to_string();
                    remote.insert(id.clone(), "Q".to_string());
                    return Ok(capture(0, &format!("{id}\n"), ""));
                }
                Ok(capture(0, "", ""))
            });
        }

        let sessions = Arc::new(
            SessionCache::new(connector.clone(), vec!["login1".to_string()]).unwrap(),
        );
        let dispatcher = CommandDispatcher::new(
            sessions,
            Arc::new(TestBackend::never_retry()),
            PoolSizes::default(),
            RetryPolicy::default(),
        );
        let fs = Arc::new(MemoryFs::new());
        let clock = Arc::new(ManualClock::at(1_000));
        let overlay = HpcOverlay::new(dispatcher, fs.clone(), clock.clone(), settings);
        Self {
            overlay,
            connector,
            fs,
            clock,
            remote,
            failures,
        }
    }

    pub fn local(&self, job: &Arc<FakeJob>) -> Arc<dyn LocalJob> {
        job.clone()
    }

    /// Sets what the fake scheduler reports for `id`.
    pub fn set_remote(&self, id: &str, state: &str) {
        self.remote
            .lock()
            .unwrap()
            .insert(id.to_string(), state.to_string());
    }

    /// Drops `id` from status listings, as Slurm does with old jobs.
    pub fn forget_remote(&self, id: &str) {
        self.remote.lock().unwrap().remove(id);
    }

    /// The next command containing `needle` exits 1 with `stderr`.
    pub fn fail_next(&self, needle: &'static str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((needle, stderr.to_string()));
    }
}
