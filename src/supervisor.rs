//! File-signal driven process supervisor.
//!
//! The supervisor polls a signal directory and owns at most one pipeline
//! process:
//!
//! - `trigger.txt` present: reload and validate config, terminate any running
//!   pipeline, spawn a new one. An invalid config leaves the current state alone.
//! - `quit.txt` present: terminate the running pipeline.
//! - A pipeline that exits on its own is reaped and not restarted.
//!
//! Signal files are deleted as soon as they are seen. When both are present in
//! one poll they are handled stop-then-start. Termination is SIGTERM, a grace
//! period, then SIGKILL.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::{ConfigLoader, RunConfig};

pub const TRIGGER_FILE: &str = "trigger.txt";
pub const QUIT_FILE: &str = "quit.txt";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SIGNAL_SETTLE: Duration = Duration::from_secs(3);
const DEFAULT_RESPAWN_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(3);
const EXIT_POLL: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// Signals
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Stop,
    Start,
}

impl Signal {
    fn file_name(self) -> &'static str {
        match self {
            Signal::Stop => QUIT_FILE,
            Signal::Start => TRIGGER_FILE,
        }
    }
}

/// Watches a directory for signal files and consumes them.
#[derive(Clone, Debug)]
pub struct SignalWatcher {
    dir: PathBuf,
}

impl SignalWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Signals present in this poll, in handling order (stop before start).
    /// Each returned signal's file has been removed.
    pub fn poll(&self) -> Vec<Signal> {
        [Signal::Stop, Signal::Start]
            .into_iter()
            .filter(|signal| self.consume(*signal))
            .collect()
    }

    /// Create the signal file, as an operator or the startup probe would.
    pub fn raise(&self, signal: Signal) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create signal directory {}", self.dir.display()))?;
        let path = self.dir.join(signal.file_name());
        std::fs::write(&path, b"").with_context(|| format!("write {}", path.display()))
    }

    fn consume(&self, signal: Signal) -> bool {
        let path = self.dir.join(signal.file_name());
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                // Acting on a file we cannot remove would repeat every poll.
                log::error!("cannot consume {}: {}", path.display(), e);
                false
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Process control seams
// ----------------------------------------------------------------------------

/// How a pipeline process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// A running pipeline process.
pub trait PipelineChild {
    fn id(&self) -> u32;

    /// Non-blocking liveness check. `Some` once the process has exited and been reaped.
    fn try_exit(&mut self) -> Result<Option<ChildExit>>;

    /// Ask the process to stop, wait up to `grace`, then force it. Always reaps.
    fn terminate(&mut self, grace: Duration) -> Result<ChildExit>;
}

/// Spawns pipeline processes for a validated config.
pub trait PipelineLauncher {
    type Child: PipelineChild;

    fn launch(&mut self, config: &RunConfig) -> Result<Self::Child>;
}

/// Launches `<program> [args..] <config-json>`.
#[derive(Clone, Debug)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Arguments placed before the config argument.
    pub fn with_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl PipelineLauncher for CommandLauncher {
    type Child = ProcessChild;

    fn launch(&mut self, config: &RunConfig) -> Result<ProcessChild> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(config.to_arg()?)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn pipeline {}", self.program.display()))?;
        Ok(ProcessChild { child })
    }
}

/// OS process handle.
pub struct ProcessChild {
    child: Child,
}

impl ProcessChild {
    #[cfg(target_os = "linux")]
    fn request_stop(&self) {
        // SAFETY: kill(2) with a pid we spawned and have not yet reaped.
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            log::warn!(
                "SIGTERM to pipeline {} failed: {}",
                self.child.id(),
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn request_stop(&self) {}
}

impl PipelineChild for ProcessChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_exit(&mut self) -> Result<Option<ChildExit>> {
        let status = self
            .child
            .try_wait()
            .with_context(|| format!("poll pipeline {}", self.child.id()))?;
        Ok(status.map(ChildExit::from))
    }

    fn terminate(&mut self, grace: Duration) -> Result<ChildExit> {
        if let Some(exit) = self.try_exit()? {
            return Ok(exit);
        }
        self.request_stop();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(exit) = self.try_exit()? {
                return Ok(exit);
            }
            std::thread::sleep(EXIT_POLL);
        }
        log::warn!(
            "pipeline {} still alive after {:?}; killing",
            self.child.id(),
            grace
        );
        if let Err(e) = self.child.kill() {
            // InvalidInput means it exited between the last poll and now.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(e).with_context(|| format!("kill pipeline {}", self.child.id()));
            }
        }
        let status = self
            .child
            .wait()
            .with_context(|| format!("reap pipeline {}", self.child.id()))?;
        Ok(status.into())
    }
}

// ----------------------------------------------------------------------------
// Supervisor
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    pub signal_dir: PathBuf,
    pub config: ConfigLoader,
    /// Sleep between iterations of `run`.
    pub poll_interval: Duration,
    /// Delay after a signal file is detected, before acting on it.
    pub signal_settle: Duration,
    /// Delay between terminating a pipeline and spawning its replacement.
    pub respawn_delay: Duration,
    /// SIGTERM-to-SIGKILL grace period.
    pub terminate_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            signal_dir: PathBuf::from("check"),
            config: ConfigLoader::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            signal_settle: DEFAULT_SIGNAL_SETTLE,
            respawn_delay: DEFAULT_RESPAWN_DELAY,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running { pid: u32 },
}

pub struct Supervisor<L: PipelineLauncher> {
    settings: SupervisorSettings,
    watcher: SignalWatcher,
    launcher: L,
    current: Option<L::Child>,
}

impl<L: PipelineLauncher> Supervisor<L> {
    pub fn new(settings: SupervisorSettings, launcher: L) -> Self {
        let watcher = SignalWatcher::new(settings.signal_dir.clone());
        Self {
            settings,
            watcher,
            launcher,
            current: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        match &self.current {
            Some(child) => SupervisorState::Running { pid: child.id() },
            None => SupervisorState::Idle,
        }
    }

    pub fn watcher(&self) -> &SignalWatcher {
        &self.watcher
    }

    /// One poll: handle signals (stop, then start), then check liveness.
    pub fn step(&mut self) -> SupervisorState {
        for signal in self.watcher.poll() {
            match signal {
                Signal::Stop => self.handle_stop(),
                Signal::Start => self.handle_start(),
            }
        }
        self.reap_exited();
        self.state()
    }

    /// Poll until `shutdown` is set, then terminate the pipeline.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        log::info!(
            "supervisor watching {} (config {})",
            self.watcher.dir().display(),
            self.settings.config.path.display()
        );
        while !shutdown.load(Ordering::SeqCst) {
            let state = self.step();
            log::debug!("supervisor state: {:?}", state);
            std::thread::sleep(self.settings.poll_interval);
        }
        log::info!("supervisor shutting down");
        self.stop_current();
    }

    /// Terminate the running pipeline, if any. Returns false when the child
    /// could not be terminated; it is then kept as the current pipeline.
    pub fn stop_current(&mut self) -> bool {
        let Some(mut child) = self.current.take() else {
            return true;
        };
        let pid = child.id();
        log::info!("terminating pipeline {}", pid);
        match child.terminate(self.settings.terminate_grace) {
            Ok(exit) => {
                log::info!("pipeline {} stopped ({})", pid, exit);
                true
            }
            Err(e) => {
                log::error!("failed to terminate pipeline {}: {:#}", pid, e);
                self.current = Some(child);
                false
            }
        }
    }

    fn handle_stop(&mut self) {
        log::info!("quit signal found");
        std::thread::sleep(self.settings.signal_settle);
        self.stop_current();
    }

    fn handle_start(&mut self) {
        log::info!("trigger signal found");
        std::thread::sleep(self.settings.signal_settle);

        let config = match self.settings.config.load() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("trigger ignored: {:#}", e);
                return;
            }
        };

        if self.current.is_some() {
            if !self.stop_current() {
                log::warn!("trigger ignored: previous pipeline is still running");
                return;
            }
            std::thread::sleep(self.settings.respawn_delay);
        }

        match self.launcher.launch(&config) {
            Ok(child) => {
                log::info!(
                    "pipeline {} started: {:?} with {} source(s)",
                    child.id(),
                    config.source_type,
                    config.number_sources()
                );
                self.current = Some(child);
            }
            Err(e) => log::error!("failed to start pipeline: {:#}", e),
        }
    }

    fn reap_exited(&mut self) {
        let Some(child) = self.current.as_mut() else {
            return;
        };
        match child.try_exit() {
            Ok(Some(exit)) => {
                log::warn!("pipeline {} exited on its own ({})", child.id(), exit);
                self.current = None;
            }
            Ok(None) => {}
            Err(e) => log::error!("pipeline liveness check failed: {:#}", e),
        }
    }
}
