//! Child process ownership and the plugin lifecycle state machine.
//!
//! [`PluginProcess`] spawns the plugin with piped stdio, writes to its stdin
//! on request, and runs one reader thread per output stream. Readers hand
//! each complete line to a [`ProcessEvents`] sink before reading the next.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use thiserror::Error;

/// Errors from controlling the plugin process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn plugin process: {0}")]
    SpawnFailed(io::Error),
    #[error("plugin process has no stdin")]
    NoStdin,
    #[error("plugin process has no stdout")]
    NoStdout,
    #[error("plugin process has no stderr")]
    NoStderr,
    #[error("failed to start reader thread: {0}")]
    ReaderSpawn(io::Error),
    #[error("plugin was already started (currently {state})")]
    AlreadyStarted { state: LifecycleState },
    #[error("plugin is {state}")]
    Inactive { state: LifecycleState },
    #[error("failed to write to plugin: {0}")]
    WriteFailed(io::Error),
}

/// Where the plugin is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Not started yet, or stopped by [`PluginProcess::terminate`].
    #[default]
    Stopped,
    Running,
    /// stdout reached end of stream, or stdin refused a write.
    Disconnected,
    /// A read hit a broken pipe or reset.
    Terminated,
    /// The stdout reader failed for another reason.
    Crashed,
    /// The process could not be created.
    Failed,
}

impl LifecycleState {
    pub fn accepts_sends(self) -> bool {
        self == LifecycleState::Running
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Running => "running",
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Crashed => "crashed",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to launch a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCommand {
    /// Program name or path, resolved through `PATH` like a shell would.
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the plugin.
    pub env: Vec<(String, String)>,
}

impl PluginCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Split a full command line such as `["cargo", "run", "-p", "echo"]`.
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
            working_dir: None,
            env: Vec::new(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for PluginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Receives everything the reader threads and state transitions produce.
///
/// Called from the reader threads as well as the caller's thread, never while
/// any controller lock is held.
pub trait ProcessEvents: Send + Sync + 'static {
    /// One stdout line, terminator and surrounding whitespace removed, never empty.
    fn on_stdout_line(&self, line: &[u8]);
    /// One stderr line, lossily decoded and trimmed.
    fn on_stderr_line(&self, text: &str);
    fn on_state_changed(&self, state: LifecycleState);
    /// The stdout reader stopped on an unexpected I/O error.
    fn on_read_failed(&self, _error: &io::Error) {}
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle state shared between the controller and its readers.
#[derive(Clone, Default)]
struct Lifecycle {
    state: Arc<Mutex<LifecycleState>>,
}

impl Lifecycle {
    fn get(&self) -> LifecycleState {
        *lock(&self.state)
    }

    fn set(&self, next: LifecycleState) -> LifecycleState {
        std::mem::replace(&mut *lock(&self.state), next)
    }

    /// Move out of `Running`. Returns false if some other transition got
    /// there first, so a late stream closure never overrides `Stopped`.
    fn leave_running(&self, next: LifecycleState) -> bool {
        let mut state = lock(&self.state);
        if *state != LifecycleState::Running {
            return false;
        }
        *state = next;
        true
    }
}

/// Owner of a plugin child process and its three pipes.
pub struct PluginProcess {
    lifecycle: Lifecycle,
    started: AtomicBool,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    /// Held from `start` until `terminate`; the sink may own this controller.
    events: Mutex<Option<Arc<dyn ProcessEvents>>>,
}

impl Default for PluginProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginProcess {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            started: AtomicBool::new(false),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Process id while a child is attached.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.child).as_ref().map(Child::id)
    }

    /// Spawn the plugin and start both reader threads. Returns the child pid.
    ///
    /// A controller can be started once; later calls fail with
    /// [`ProcessError::AlreadyStarted`].
    pub fn start(
        &self,
        command: &PluginCommand,
        events: Arc<dyn ProcessEvents>,
    ) -> Result<u32, ProcessError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyStarted {
                state: self.state(),
            });
        }
        *lock(&self.events) = Some(Arc::clone(&events));

        let mut child = match command.to_command().spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(command = %command, error = %err, "Failed to spawn plugin");
                self.fail(&events);
                return Err(ProcessError::SpawnFailed(err));
            }
        };
        let pid = child.id();

        let pipes = (|| {
            let stdin = child.stdin.take().ok_or(ProcessError::NoStdin)?;
            let stdout = child.stdout.take().ok_or(ProcessError::NoStdout)?;
            let stderr = child.stderr.take().ok_or(ProcessError::NoStderr)?;
            Ok::<_, ProcessError>((stdin, stdout, stderr))
        })();
        let (stdin, stdout, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(err) => {
                reap(child);
                self.fail(&events);
                return Err(err);
            }
        };

        *lock(&self.stdin) = Some(stdin);
        *lock(&self.child) = Some(child);
        // Running must be visible before a reader can observe end of stream.
        self.lifecycle.set(LifecycleState::Running);
        tracing::info!(pid, command = %command, "Plugin started");
        events.on_state_changed(LifecycleState::Running);

        let spawned = spawn_reader("plugprobe-stdout", {
            let lifecycle = self.lifecycle.clone();
            let events = Arc::clone(&events);
            move || read_stdout(stdout, lifecycle, events)
        })
        .and_then(|_| {
            spawn_reader("plugprobe-stderr", {
                let events = Arc::clone(&events);
                move || read_stderr(stderr, events)
            })
        });

        if let Err(err) = spawned {
            tracing::error!(pid, error = %err, "Failed to start plugin reader threads");
            lock(&self.stdin).take();
            if let Some(child) = lock(&self.child).take() {
                reap(child);
            }
            self.lifecycle.set(LifecycleState::Failed);
            events.on_state_changed(LifecycleState::Failed);
            return Err(ProcessError::ReaderSpawn(err));
        }

        Ok(pid)
    }

    /// Write raw bytes to the plugin's stdin.
    pub fn send(&self, bytes: &[u8]) -> Result<(), ProcessError> {
        let mut stdin = lock(&self.stdin);
        let state = self.state();
        let writer = match stdin.as_mut() {
            Some(writer) if state.accepts_sends() => writer,
            _ => return Err(ProcessError::Inactive { state }),
        };

        if let Err(err) = writer.write_all(bytes).and_then(|_| writer.flush()) {
            stdin.take();
            drop(stdin);
            tracing::warn!(error = %err, "Plugin stdin closed while sending");
            self.transition(LifecycleState::Disconnected);
            return Err(ProcessError::WriteFailed(err));
        }
        Ok(())
    }

    /// Kill the plugin and mark the session stopped. Safe to call in any
    /// state and more than once.
    ///
    /// Releases the event sink. Reader threads keep their own handle until
    /// they notice the closed pipes and exit.
    pub fn terminate(&self) {
        let events = lock(&self.events).take();
        lock(&self.stdin).take();
        if let Some(child) = lock(&self.child).take() {
            reap(child);
        }

        let previous = self.lifecycle.set(LifecycleState::Stopped);
        if previous != LifecycleState::Stopped {
            tracing::info!(from = %previous, "Plugin stopped");
            if let Some(events) = events {
                events.on_state_changed(LifecycleState::Stopped);
            }
        }
    }

    fn events(&self) -> Option<Arc<dyn ProcessEvents>> {
        lock(&self.events).clone()
    }

    fn transition(&self, next: LifecycleState) {
        if self.lifecycle.leave_running(next) {
            if let Some(events) = self.events() {
                events.on_state_changed(next);
            }
        }
    }

    fn fail(&self, events: &Arc<dyn ProcessEvents>) {
        self.lifecycle.set(LifecycleState::Failed);
        events.on_state_changed(LifecycleState::Failed);
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        if let Some(child) = lock(&self.child).take() {
            reap(child);
        }
    }
}

fn reap(mut child: Child) {
    let pid = child.id();
    // Fails with InvalidInput when the child already exited; wait() still reaps it.
    if let Err(err) = child.kill() {
        tracing::debug!(pid, error = %err, "Plugin kill failed");
    }
    match child.wait() {
        Ok(status) => tracing::info!(pid, %status, "Plugin exited"),
        Err(err) => tracing::warn!(pid, error = %err, "Failed to reap plugin"),
    }
}

fn spawn_reader<F>(name: &str, body: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map(|_| ())
}

fn read_stdout(stdout: ChildStdout, lifecycle: Lifecycle, events: Arc<dyn ProcessEvents>) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    let outcome = loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break LifecycleState::Disconnected,
            Ok(_) => {
                let trimmed = line.trim_ascii();
                if !trimmed.is_empty() {
                    events.on_stdout_line(trimmed);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_broken_stream(&err) => {
                tracing::warn!(error = %err, "Plugin stdout broke");
                break LifecycleState::Terminated;
            }
            Err(err) => {
                tracing::error!(error = %err, "Error reading plugin output");
                events.on_read_failed(&err);
                break LifecycleState::Crashed;
            }
        }
    };

    if lifecycle.leave_running(outcome) {
        tracing::info!(state = %outcome, "Plugin stdout closed");
        events.on_state_changed(outcome);
    }
}

fn read_stderr<R: Read>(stderr: R, events: Arc<dyn ProcessEvents>) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_ascii();
                if !trimmed.is_empty() {
                    events.on_stderr_line(&String::from_utf8_lossy(trimmed));
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "Stopped reading plugin stderr");
                break;
            }
        }
    }
}

fn is_broken_stream(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
