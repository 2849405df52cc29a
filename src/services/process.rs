//! Supervisor for recorder subprocesses, keyed by shop and camera.
//!
//! The registry lock guards only map mutation; every wait on a child happens
//! after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::models::recording::ActiveRecording;

const KILL_GRACE: Duration = Duration::from_secs(5);

/// Identity of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub shop_id: String,
    pub camera_name: String,
}

impl ProcessKey {
    pub fn new(shop_id: impl Into<String>, camera_name: impl Into<String>) -> Self {
        Self {
            shop_id: shop_id.into(),
            camera_name: camera_name.into(),
        }
    }
}

impl fmt::Display for ProcessKey {
    /// `<shop_id>_<camera name lower-cased, spaces as underscores>`, for logs.
    /// Distinct keys may render the same; the registry keys on the fields.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.shop_id,
            self.camera_name.to_lowercase().replace(' ', "_")
        )
    }
}

/// What to run for a key.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Human-readable meaning of a recorder exit code.
    pub fn description(&self) -> String {
        match self.code {
            Some(0) => "Recorder exited cleanly".to_string(),
            Some(1) => "General recorder error".to_string(),
            Some(2) => "Camera not found or authentication failed".to_string(),
            Some(3) => "Recorder configuration error".to_string(),
            Some(code) => format!("Unexpected exit code {code}"),
            None => "Terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running for the key.
    NotRunning,
    Graceful,
    Killed,
}

struct Entry {
    key: ProcessKey,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    exit: watch::Receiver<Option<ProcessExit>>,
    kill: Option<oneshot::Sender<()>>,
}

impl Entry {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

pub struct ProcessRegistry {
    entries: Mutex<HashMap<ProcessKey, Entry>>,
    validation_window: Duration,
    stop_timeout: Duration,
}

impl ProcessRegistry {
    pub fn new(validation_window: Duration, stop_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            validation_window,
            stop_timeout,
        }
    }

    /// Spawn `spec` for `key` in its own process group and wait out the
    /// validation window. Returns the child pid.
    pub async fn start(&self, key: &ProcessKey, spec: &ProcessSpec) -> Result<Option<u32>, ProcessError> {
        let id = key.to_string();
        let (pid, mut exit) = {
            let mut entries = self.lock();
            if let Some(existing) = entries.get(key) {
                if !existing.has_exited() {
                    return Err(ProcessError::AlreadyActive(id));
                }
                entries.remove(key);
            }

            // Spawning is a quick syscall, so it happens under the lock and no
            // second start for the same key can slip in between.
            let child = spawn(spec)?;
            let entry = supervise(key, child);
            let handle = (entry.pid, entry.exit.clone());
            entries.insert(key.clone(), entry);
            handle
        };

        info!(process = %id, pid, program = %spec.program.display(), "Started process");

        let early = tokio::time::timeout(self.validation_window, exit.wait_for(Option::is_some))
            .await
            .ok()
            .and_then(|result| result.ok().and_then(|seen| *seen));

        if let Some(exit) = early {
            self.remove_if(key, pid);
            error!(process = %id, code = exit.code, reason = %exit.description(), "Process died during validation");
            return Err(ProcessError::EarlyExit {
                key: id,
                code: exit.code,
                description: exit.description(),
            });
        }

        Ok(pid)
    }

    /// Stop the process for `key`. Stopping something that is not running is
    /// not an error. The entry is always removed, whatever the outcome.
    pub async fn stop(&self, key: &ProcessKey) -> Result<StopOutcome, ProcessError> {
        let id = key.to_string();
        let removed = self.lock().remove(key);
        let Some(mut entry) = removed else {
            info!(process = %id, "No active process to stop");
            return Ok(StopOutcome::NotRunning);
        };
        if entry.has_exited() {
            return Ok(StopOutcome::NotRunning);
        }

        if let Some(pid) = entry.pid {
            if let Err(e) = signal_group(pid, GroupSignal::Interrupt) {
                warn!(process = %id, pid, error = %e, "Failed to interrupt process group");
            }
        }

        if wait_exit(&mut entry.exit, self.stop_timeout).await {
            info!(process = %id, "Process stopped gracefully");
            return Ok(StopOutcome::Graceful);
        }

        warn!(process = %id, timeout = ?self.stop_timeout, "Process ignored interrupt, killing");
        if let Some(pid) = entry.pid {
            if let Err(e) = signal_group(pid, GroupSignal::Kill) {
                warn!(process = %id, pid, error = %e, "Failed to kill process group");
            }
        }
        if let Some(kill) = entry.kill.take() {
            let _ = kill.send(());
        }

        if wait_exit(&mut entry.exit, KILL_GRACE).await {
            Ok(StopOutcome::Killed)
        } else {
            Err(ProcessError::Unkillable(id))
        }
    }

    pub fn is_running(&self, key: &ProcessKey) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|entry| !entry.has_exited())
    }

    /// Running processes. Entries whose process already exited are dropped.
    pub fn list(&self) -> Vec<ActiveRecording> {
        let mut entries = self.lock();
        entries.retain(|_, entry| !entry.has_exited());
        entries
            .values()
            .map(|entry| ActiveRecording {
                shop_id: entry.key.shop_id.clone(),
                camera_name: entry.key.camera_name.clone(),
                pid: entry.pid,
                started_at: entry.started_at,
            })
            .collect()
    }

    /// Stop everything, e.g. on server shutdown.
    pub async fn stop_all(&self) {
        let keys: Vec<ProcessKey> = self.lock().values().map(|e| e.key.clone()).collect();
        for key in keys {
            if let Err(e) = self.stop(&key).await {
                error!(process = %key, error = %e, "Failed to stop process");
            }
        }
    }

    fn remove_if(&self, key: &ProcessKey, pid: Option<u32>) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|entry| entry.pid == pid) {
            entries.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProcessKey, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn(spec: &ProcessSpec) -> Result<Child, ProcessError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    command.process_group(0);

    command.spawn().map_err(|source| ProcessError::Spawn {
        program: spec.program.display().to_string(),
        source,
    })
}

/// Start the output forwarders and the exit watcher for a fresh child.
fn supervise(key: &ProcessKey, mut child: Child) -> Entry {
    let id = key.to_string();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(id.clone(), stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(id.clone(), stderr));
    }

    let pid = child.id();
    let (exit_tx, exit_rx) = watch::channel(None);
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = &mut kill_rx => {
                let _ = child.start_kill();
                child.wait().await
            }
        };
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(process = %id, error = %e, "Failed to wait on process");
                None
            }
        };
        let _ = exit_tx.send(Some(ProcessExit { code }));
    });

    Entry {
        key: key.clone(),
        pid,
        started_at: Utc::now(),
        exit: exit_rx,
        kill: Some(kill_tx),
    }
}

async fn forward_output<R: AsyncRead + Unpin>(process: String, stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(process = %process, "{}", line);
    }
}

async fn wait_exit(exit: &mut watch::Receiver<Option<ProcessExit>>, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, exit.wait_for(Option::is_some))
        .await
        .is_ok_and(|result| result.is_ok())
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: GroupSignal) -> Result<(), ProcessError> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        GroupSignal::Interrupt => Signal::SIGINT,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    let pgid = i32::try_from(pid).map_err(|_| ProcessError::Signal(format!("pid {pid} out of range")))?;
    killpg(Pid::from_raw(pgid), signal).map_err(|e| ProcessError::Signal(e.to_string()))
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: GroupSignal) -> Result<(), ProcessError> {
    // No process groups; the kill channel handles termination.
    Err(ProcessError::Signal("process group signals are not supported".into()))
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process {0} is already active")]
    AlreadyActive(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {key} exited during startup: {description}")]
    EarlyExit {
        key: String,
        code: Option<i32>,
        description: String,
    },

    #[error("Failed to signal process group: {0}")]
    Signal(String),

    #[error("Process {0} did not exit after kill")]
    Unkillable(String),
}
