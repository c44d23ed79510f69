use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::tasks::{TaskMode, TaskSnapshot, TaskStatus};


/// Upper bound on waiting for output readers after the process is gone. A
/// grandchild that inherited the pipes can keep them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);


#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub timeout: Option<Duration>,
    pub grace: Duration,
}


/// One tracked task and the process behind it.
///
/// The supervisor spawned by [`Process::start`] owns the child exclusively;
/// everyone else observes it through snapshots and reaches it only through
/// the stop channel. State locks are never held across an await, so
/// snapshots never block on a running command.
#[derive(Debug)]
pub struct Process {
    id: Uuid,
    command: String,
    mode: TaskMode,
    inner: Mutex<ProcessState>,
    exited: Notify,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}


#[derive(Debug)]
struct ProcessState {
    status: TaskStatus,
    output: String,
    exit_code: Option<i32>,
    error: Option<String>,
    message: Option<String>,
}


enum Event {
    Exited(std::io::Result<ExitStatus>),
    StopRequested,
    TimedOut,
}


enum Exit {
    Exited(std::io::Result<ExitStatus>),
    Stopped(std::io::Result<ExitStatus>),
    TimedOut(Duration),
}


impl Process {
    pub fn new(id: Uuid, command: String, mode: TaskMode) -> Self {
        Self {
            id,
            command,
            mode,
            inner: Mutex::new(ProcessState {
                status: TaskStatus::Running,
                output: String::new(),
                exit_code: None,
                error: None,
                message: None,
            }),
            exited: Notify::new(),
            stop: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawns the child and its supervisor. Nothing here awaits, so a
    /// caller that gets cancelled never leaves a half-started task behind.
    pub fn start(
        self: &Arc<Self>,
        mut command: tokio::process::Command,
        limits: Limits
    ) -> Result<(), Error> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so stop and timeout also reach whatever the
        // command spawns.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;

        let stdout = child.stdout.take().map(|stdout| {
            tokio::spawn(self.clone().stream_stdout(stdout))
        });
        let stderr = child.stderr.take().map(|stderr| {
            tokio::spawn(read_all(stderr))
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        *lock(&self.stop) = Some(stop_tx);

        debug!(task_id = %self.id, pid = ?child.id(), "Spawned {:?}", self.command);

        tokio::spawn(self.clone().supervise(child, stop_rx, stdout, stderr, limits));
        Ok(())
    }

    /// Records a task whose process never started.
    pub fn fail(&self, error: &Error) {
        {
            let mut inner = lock(&self.inner);
            inner.status = TaskStatus::Errored;
            inner.exit_code = Some(-1);
            inner.error = Some(error.to_string());
        }
        self.exited.notify_waiters();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = lock(&self.inner);
        TaskSnapshot {
            task_id: self.id,
            status: inner.status,
            output: Some(inner.output.clone()),
            exit_code: inner.exit_code,
            error: inner.error.clone(),
            message: inner.message.clone(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        lock(&self.inner).status
    }

    /// Waits until the task reaches a terminal status.
    pub async fn wait(&self) -> TaskSnapshot {
        let exited = self.exited.notified();
        if self.status().is_terminal() {
            return self.snapshot();
        }

        exited.await;
        self.snapshot()
    }

    pub async fn stop(&self) -> Result<TaskSnapshot, Error> {
        if self.status() != TaskStatus::Running {
            return Err(Error::TaskAlreadyTerminal(self.id));
        }

        // A concurrent stop may already hold the sender; both just wait.
        let stop = lock(&self.stop).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }

        Ok(self.wait().await)
    }

    async fn stream_stdout(self: Arc<Self>, stdout: impl AsyncRead + Unpin) {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    debug!(task_id = %self.id, "{}", text.trim_end());
                    lock(&self.inner).output.push_str(&text);
                }
                Err(err) => {
                    warn!(task_id = %self.id, "Failed to read stdout: {}", err);
                    break;
                }
            }
        }
    }

    async fn supervise(
        self: Arc<Self>,
        mut child: Child,
        stop: oneshot::Receiver<()>,
        stdout: Option<JoinHandle<()>>,
        stderr: Option<JoinHandle<String>>,
        limits: Limits
    ) {
        let event = tokio::select! {
            status = child.wait() => Event::Exited(status),
            _ = stop => Event::StopRequested,
            _ = deadline(limits.timeout) => Event::TimedOut,
        };

        let exit = match event {
            Event::Exited(status) => Exit::Exited(status),
            Event::StopRequested => {
                info!(task_id = %self.id, "Stopping task");
                Exit::Stopped(terminate(&mut child, limits.grace).await)
            }
            Event::TimedOut => {
                warn!(task_id = %self.id, "Command timed out, killing");
                if let Err(err) = kill(&mut child).await {
                    warn!(task_id = %self.id, "Failed to kill timed out process: {}", err);
                }
                Exit::TimedOut(limits.timeout.unwrap_or_default())
            }
        };

        if let Some(stdout) = stdout {
            drain(stdout).await;
        }
        let stderr = match stderr {
            Some(stderr) => drain(stderr).await.unwrap_or_default(),
            None => String::new(),
        };

        self.finish(exit, stderr);
        self.exited.notify_waiters();
    }

    fn finish(&self, exit: Exit, stderr: String) {
        let mut inner = lock(&self.inner);

        match exit {
            Exit::Exited(Ok(status)) => {
                inner.exit_code = Some(status.code().unwrap_or(-1));
                if status.success() {
                    inner.status = TaskStatus::Completed;
                } else {
                    inner.status = TaskStatus::Errored;
                    inner.error = Some(if stderr.trim().is_empty() {
                        inner.output.clone()
                    } else {
                        stderr.clone()
                    });
                }
            }
            Exit::Exited(Err(err)) => {
                inner.status = TaskStatus::Errored;
                inner.exit_code = Some(-1);
                inner.error = Some(Error::from(err).to_string());
            }
            Exit::Stopped(status) => {
                inner.status = TaskStatus::Stopped;
                inner.exit_code = Some(status.ok().and_then(|s| s.code()).unwrap_or(-1));
                inner.message = Some("Task stopped".to_string());
            }
            Exit::TimedOut(timeout) => {
                inner.status = TaskStatus::Errored;
                inner.exit_code = Some(-1);
                inner.error = Some(Error::ExecutionTimeout(timeout).to_string());
            }
        }

        // Background output is append-only, so late stderr goes on the end.
        if self.mode == TaskMode::Background && !stderr.is_empty() {
            inner.output.push_str(&stderr);
        }

        info!(
            task_id = %self.id,
            status = ?inner.status,
            exit_code = ?inner.exit_code,
            "Task finished"
        );
    }
}


fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}


async fn read_all(stream: impl AsyncRead + Unpin) -> String {
    let mut buffer = Vec::new();
    let mut reader = BufReader::new(stream);
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        warn!("Failed to read stderr: {}", err);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}


async fn drain<T>(mut reader: JoinHandle<T>) -> Option<T> {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(_)) => None,
        Err(_) => {
            reader.abort();
            None
        }
    }
}


async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}


/// SIGTERM first, SIGKILL once the grace period runs out.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    signal_group(child, libc::SIGTERM);
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            debug!(pid = ?child.id(), "Process ignored SIGTERM, killing");
            kill(child).await?;
            child.wait().await
        }
    }
}


async fn kill(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    signal_group(child, libc::SIGKILL);
    child.kill().await
}


/// Signals the whole process group led by `child`.
#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    }
}
