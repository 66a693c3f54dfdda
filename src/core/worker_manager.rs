// Worker process manager - locates, spawns and supervises the pose worker
//
// File-drop sessions own exactly one worker process. WebSocket sessions talk to
// a long-lived server, which this manager launches only when nobody is
// listening.

use crate::core::config::{Config, TransportKind, WS_PORT_ENV};
use crate::core::response_dispatcher::BridgeState;
use crate::models::pose::{PoseError, PoseResult, WorkerState};
use crate::models::protocol::Command;
use crate::platform::pose::file_drop::clear_json_files;
use crate::platform::pose::{PoseTransport, ServerBootstrap};
use crate::platform::{get_platform, Platform};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tracing::{debug, info, warn};

/// Worker script, relative to a search root, most preferred first
const WORKER_SCRIPTS: [&str; 3] = [
    "mediapipe_pose_detector.py",
    "src/desktopMain/resources/mediapipe_pose_detector.py",
    "resources/mediapipe_pose_detector.py",
];

/// Script serving the WebSocket protocol
pub const SERVER_SCRIPT: &str = "ws_pose_server.py";

/// Restarts allowed per tracking session
pub const MAX_RESTARTS: u32 = 1;

// Environment handed to the file-drop worker
pub const COMMAND_DIR_ENV: &str = "POSE_COMMAND_DIR";
pub const RESPONSE_DIR_ENV: &str = "POSE_RESPONSE_DIR";
pub const PID_FILE_ENV: &str = "POSE_PID_FILE";

/// Reports whether the process behind the channel is still running
pub trait LivenessProbe: Send + Sync {
    /// `None` when no local process is owned (an external server)
    fn process_alive(&self) -> Option<bool>;
}

/// A resolved way to start a worker or server
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    /// Root of the virtualenv the interpreter came from
    pub venv: Option<PathBuf>,
}

impl WorkerLaunch {
    fn command(&self, path_separator: char) -> ProcessCommand {
        let mut command = ProcessCommand::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let (Some(venv), Some(bin)) = (&self.venv, self.program.parent()) {
            let mut path = OsString::from(bin.as_os_str());
            if let Some(existing) = std::env::var_os("PATH") {
                path.push(path_separator.to_string());
                path.push(existing);
            }
            command.env("VIRTUAL_ENV", venv).env("PATH", path);
        }
        command
    }
}

/// Searches a list of roots for the worker binary or script
pub struct WorkerLocator {
    roots: Vec<PathBuf>,
    platform: Box<dyn Platform>,
}

impl WorkerLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            platform: get_platform(),
        }
    }

    /// Configured resource directories, then the working directory and its `resources/`
    pub fn from_config(config: &Config) -> Self {
        let mut roots = config.resource_dirs.clone();
        if let Ok(cwd) = std::env::current_dir() {
            let resources = cwd.join("resources");
            roots.push(cwd);
            roots.push(resources);
        }
        Self::new(roots)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Bundled binaries under every root, then scripts under every root
    pub fn candidates(&self) -> Vec<PathBuf> {
        let binaries = self.platform.worker_binary_candidates();
        let mut candidates: Vec<PathBuf> = self
            .roots
            .iter()
            .flat_map(|root| binaries.iter().map(move |b| root.join(b)))
            .collect();
        candidates.extend(
            self.roots
                .iter()
                .flat_map(|root| WORKER_SCRIPTS.iter().map(move |s| root.join(s))),
        );
        candidates
    }

    pub async fn locate_worker(&self) -> PoseResult<WorkerLaunch> {
        let candidates = self.candidates();
        for candidate in &candidates {
            if !candidate.is_file() {
                continue;
            }
            let working_dir = parent_dir(candidate);
            if is_script(candidate) {
                let Some((program, venv)) = self.resolve_python(&working_dir).await else {
                    warn!("Found {} but no Python interpreter", candidate.display());
                    continue;
                };
                return Ok(WorkerLaunch {
                    program,
                    args: vec![candidate.clone().into_os_string()],
                    working_dir,
                    venv,
                });
            }
            return Ok(WorkerLaunch {
                program: candidate.clone(),
                args: Vec::new(),
                working_dir,
                venv: None,
            });
        }
        Err(PoseError::WorkerNotFound { searched: candidates })
    }

    pub async fn locate_server(&self) -> PoseResult<WorkerLaunch> {
        let candidates: Vec<PathBuf> = self.roots.iter().map(|root| root.join(SERVER_SCRIPT)).collect();
        for script in &candidates {
            if !script.is_file() {
                continue;
            }
            let working_dir = parent_dir(script);
            if let Some((program, venv)) = self.resolve_python(&working_dir).await {
                return Ok(WorkerLaunch {
                    program,
                    args: vec![script.clone().into_os_string()],
                    working_dir,
                    venv,
                });
            }
        }
        Err(PoseError::WorkerNotFound { searched: candidates })
    }

    /// A virtualenv next to the script wins over interpreters on PATH
    async fn resolve_python(&self, dir: &Path) -> Option<(PathBuf, Option<PathBuf>)> {
        for candidate in self.platform.venv_python_candidates() {
            let python = dir.join(&candidate);
            if python.is_file() {
                let venv = candidate
                    .components()
                    .next()
                    .map(|first| dir.join(first.as_os_str()));
                return Some((python, venv));
            }
        }

        for name in self.platform.system_python_candidates() {
            let probe = ProcessCommand::new(name)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if probe.is_ok_and(|status| status.success()) {
                debug!("Using system interpreter {}", name);
                return Some((PathBuf::from(name), None));
            }
        }
        None
    }
}

fn is_script(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("py")
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
}

/// Forwards a child's output lines into the log
fn pipe_to_log<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "worker", "[{}] {}", stream, line);
        }
    });
}

fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        pipe_to_log(stdout, "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        pipe_to_log(stderr, "stderr");
    }
}

fn child_alive(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

pub struct WorkerManager {
    config: Config,
    locator: WorkerLocator,
    state: Arc<BridgeState>,
    worker: Mutex<Option<Child>>,
    server: Mutex<Option<Child>>,
    restarts_used: AtomicU32,
}

impl WorkerManager {
    pub fn new(config: Config, state: Arc<BridgeState>) -> Self {
        let locator = WorkerLocator::from_config(&config);
        Self::with_locator(config, state, locator)
    }

    pub fn with_locator(config: Config, state: Arc<BridgeState>, locator: WorkerLocator) -> Self {
        Self {
            config,
            locator,
            state,
            worker: Mutex::new(None),
            server: Mutex::new(None),
            restarts_used: AtomicU32::new(0),
        }
    }

    /// Process id of the running file-drop worker
    pub fn pid(&self) -> Option<u32> {
        self.worker.lock().as_ref().and_then(|child| child.id())
    }

    pub fn restarts_used(&self) -> u32 {
        self.restarts_used.load(Ordering::SeqCst)
    }

    /// Starts the worker for a new session and refills the restart budget.
    ///
    /// WebSocket sessions spawn nothing here; the transport bootstraps the
    /// server on its first failed connect.
    pub async fn start(&self) -> PoseResult<()> {
        self.restarts_used.store(0, Ordering::SeqCst);
        match self.config.transport {
            TransportKind::FileDrop => self.spawn_worker().await,
            TransportKind::Websocket => {
                self.state.set_worker_state(WorkerState::Starting);
                Ok(())
            }
        }
    }

    /// Creates the message directories and drops leftovers from a previous run,
    /// so nothing stale is replayed as a fresh response
    async fn prepare_dirs(&self) -> PoseResult<()> {
        tokio::fs::create_dir_all(&self.config.command_dir).await?;
        tokio::fs::create_dir_all(&self.config.response_dir).await?;
        let stale = clear_json_files(&self.config.response_dir).await + clear_json_files(&self.config.command_dir).await;
        if stale > 0 {
            debug!("Removed {} stale message files", stale);
        }
        Ok(())
    }

    async fn spawn_worker(&self) -> PoseResult<()> {
        let launch = self.locator.locate_worker().await?;
        info!(
            "Starting pose worker: {} {:?} (cwd {})",
            launch.program.display(),
            launch.args,
            launch.working_dir.display()
        );

        self.prepare_dirs().await?;

        let mut command = launch.command(self.locator.platform().path_separator());
        command
            .env(COMMAND_DIR_ENV, &self.config.command_dir)
            .env(RESPONSE_DIR_ENV, &self.config.response_dir)
            .env(PID_FILE_ENV, &self.config.pid_file);

        let mut child = command
            .spawn()
            .map_err(|e| PoseError::WorkerStartupFailure(format!("{}: {}", launch.program.display(), e)))?;
        forward_output(&mut child);
        self.state.set_worker_state(WorkerState::Starting);

        tokio::time::sleep(self.config.startup_grace()).await;

        if let Ok(Some(status)) = child.try_wait() {
            self.state.set_worker_state(WorkerState::Dead);
            return Err(PoseError::WorkerStartupFailure(format!(
                "worker exited during startup ({})",
                status
            )));
        }

        if !self.config.pid_file.exists() {
            warn!("Worker did not write PID file {}", self.config.pid_file.display());
        }

        info!("Pose worker running (pid {:?})", child.id());
        *self.worker.lock() = Some(child);
        Ok(())
    }

    /// Handles a liveness loss reported by the heartbeat.
    ///
    /// Restarts once per session; after that the death is returned as fatal.
    pub async fn detect_death(&self, reason: &str) -> PoseResult<()> {
        warn!("Pose worker lost: {}", reason);
        self.state.set_worker_state(WorkerState::Dead);
        self.state.reset_init();
        self.kill_processes().await;

        if self.restarts_used.fetch_add(1, Ordering::SeqCst) >= MAX_RESTARTS {
            return Err(PoseError::WorkerDied(format!(
                "{} (restart already attempted this session)",
                reason
            )));
        }

        info!("Restarting pose worker");
        match self.config.transport {
            TransportKind::FileDrop => self.spawn_worker().await,
            // reconnecting through the transport relaunches the server
            TransportKind::Websocket => {
                self.state.set_worker_state(WorkerState::Starting);
                Ok(())
            }
        }
    }

    /// Graceful shutdown: close command, bounded wait, then force kill
    pub async fn stop(&self, transport: &dyn PoseTransport) {
        if transport.is_alive() {
            if let Err(e) = transport.send(Command::Close).await {
                debug!("Close command not delivered: {}", e);
            }
        }

        let worker = self.worker.lock().take();
        if let Some(mut child) = worker {
            let exited = tokio::time::timeout(self.config.shutdown_grace(), child.wait()).await;
            match exited {
                Ok(Ok(status)) => info!("Pose worker exited ({})", status),
                _ => {
                    warn!("Pose worker did not exit in time, killing");
                    if let Err(e) = child.kill().await {
                        debug!("Kill failed: {}", e);
                    }
                }
            }
        }

        let server = self.server.lock().take();
        if let Some(mut child) = server {
            let _ = child.kill().await;
        }

        self.remove_pid_file();
        self.state.set_worker_state(WorkerState::NotStarted);
    }

    async fn kill_processes(&self) {
        let worker = self.worker.lock().take();
        let server = self.server.lock().take();
        for mut child in worker.into_iter().chain(server) {
            let _ = child.kill().await;
        }
        self.remove_pid_file();
    }

    fn remove_pid_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.config.pid_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove PID file {}: {}", self.config.pid_file.display(), e);
            }
        }
    }
}

impl LivenessProbe for WorkerManager {
    fn process_alive(&self) -> Option<bool> {
        if let Some(child) = self.worker.lock().as_mut() {
            return Some(child_alive(child));
        }
        self.server.lock().as_mut().map(child_alive)
    }
}

#[async_trait]
impl ServerBootstrap for WorkerManager {
    async fn ensure_server(&self) -> PoseResult<()> {
        if self.server.lock().as_mut().is_some_and(child_alive) {
            debug!("Pose server already running");
            return Ok(());
        }

        let launch = self.locator.locate_server().await?;
        info!("Launching pose server {:?} on port {}", launch.args, self.config.ws_port);

        let mut command = launch.command(self.locator.platform().path_separator());
        command.env(WS_PORT_ENV, self.config.ws_port.to_string());
        let mut child = command
            .spawn()
            .map_err(|e| PoseError::ConnectionFailure(format!("could not launch pose server: {}", e)))?;
        forward_output(&mut child);

        *self.server.lock() = Some(child);
        Ok(())
    }
}
