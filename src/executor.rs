use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::devices::{parse_devices, DeviceReport, DeviceStatus};
use crate::error::Error;
use crate::process::{Limits, Process};
use crate::tasks::{TaskMode, TaskSnapshot};


/// Runs device tool commands and tracks each one as a task.
#[derive(Debug)]
pub struct CommandExecutor {
    tool: Tool,
    default_serial: Option<String>,
    background_tasks: bool,
    grace: Duration,
    tasks: Mutex<HashMap<Uuid, Arc<Process>>>,
}


/// Invocations that are not tracked as tasks: the version probe, device
/// enumeration and reconnects.
#[derive(Clone, Debug)]
struct Tool {
    path: PathBuf,
    timeout: Duration,
}

impl Tool {
    fn command<I, S>(&self, args: I) -> tokio::process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = tokio::process::Command::new(&self.path);
        command.args(args);
        command
    }

    async fn run(&self, args: &[&str]) -> Result<Output, Error> {
        let mut command = self.command(args);
        command
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        let output = command.output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => Ok(output),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let message = if stderr.trim().is_empty() {
                    String::from_utf8_lossy(&output.stdout).into_owned()
                } else {
                    stderr.into_owned()
                };
                Err(Error::ExecutionFailure {
                    code: output.status.code().unwrap_or(-1),
                    message: message.trim().to_string(),
                })
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(Error::ExecutionTimeout(self.timeout)),
        }
    }
}


impl CommandExecutor {
    /// Probes `<tool> version`; the agent is useless without the tool, so
    /// failure here is fatal to the caller.
    pub async fn new(config: &Config) -> Result<Self, Error> {
        let tool = Tool {
            path: config.adb_path.clone(),
            timeout: config.command_timeout(),
        };

        match tool.run(&["version"]).await {
            Ok(output) => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!(
                    "Device tool verified: {}",
                    version.lines().next().unwrap_or_default().trim()
                );
            }
            Err(err) => {
                return Err(Error::ToolUnavailable {
                    path: tool.path.clone(),
                    reason: err.to_string(),
                });
            }
        }

        Ok(Self {
            tool,
            default_serial: config.default_serial.clone(),
            background_tasks: config.background_tasks,
            grace: config.stop_grace(),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool.path
    }

    pub async fn execute(
        &self,
        command: &str,
        device: Option<&str>,
        mode: TaskMode
    ) -> Result<TaskSnapshot, Error> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(Error::InvalidCommand("empty command".to_string()));
        }

        let mode = match mode {
            TaskMode::Background if !self.background_tasks => {
                debug!("Background tasks disabled, running in foreground");
                TaskMode::Foreground
            }
            mode => mode,
        };

        let mut invocation = tokio::process::Command::new(&self.tool.path);
        if let Some(device) = device.or(self.default_serial.as_deref()) {
            invocation.arg("-s").arg(device);
        }
        invocation.args(&tokens);

        let limits = Limits {
            timeout: match mode {
                TaskMode::Foreground => Some(self.tool.timeout),
                TaskMode::Background => None,
            },
            grace: self.grace,
        };

        let process = Arc::new(Process::new(Uuid::new_v4(), tokens.join(" "), mode));
        self.tasks.lock().await.insert(process.id(), process.clone());

        info!(
            task_id = %process.id(),
            device = ?device,
            mode = ?mode,
            "Executing {:?}",
            process.command()
        );

        if let Err(err) = process.start(invocation, limits) {
            warn!(task_id = %process.id(), "Failed to start command: {}", err);
            process.fail(&err);
            return Ok(process.snapshot());
        }

        match mode {
            TaskMode::Foreground => Ok(process.wait().await),
            TaskMode::Background => Ok(TaskSnapshot::started(process.id())),
        }
    }

    pub async fn get_status(&self, task_id: Uuid) -> Result<TaskSnapshot, Error> {
        Ok(self.task(task_id).await?.snapshot())
    }

    pub async fn stop(&self, task_id: Uuid) -> Result<TaskSnapshot, Error> {
        self.task(task_id).await?.stop().await
    }

    /// Forgets a task. Returns false if it was not tracked.
    pub async fn cleanup(&self, task_id: Uuid) -> bool {
        self.tasks.lock().await.remove(&task_id).is_some()
    }

    pub async fn task_ids(&self) -> Vec<Uuid> {
        self.tasks.lock().await.keys().copied().collect()
    }

    /// Stops every running task; failures are logged and otherwise ignored.
    pub async fn stop_all(&self) {
        let tasks: Vec<Arc<Process>> = self.tasks.lock().await.values().cloned().collect();

        let stops = tasks.iter().map(|task| async move {
            match task.stop().await {
                Ok(snapshot) => {
                    info!(task_id = %task.id(), status = ?snapshot.status, "Stopped task");
                }
                Err(Error::TaskAlreadyTerminal(_)) => {}
                Err(err) => {
                    warn!(task_id = %task.id(), "Failed to stop task: {}", err);
                }
            }
        });
        join_all(stops).await;
    }

    pub async fn check_device_status(&self, device: Option<&str>) -> Result<DeviceReport, Error> {
        let output = self.tool.run(&["devices"]).await?;
        let devices = parse_devices(&String::from_utf8_lossy(&output.stdout));

        let requested = device.map(|serial| {
            devices.get(serial).cloned().unwrap_or(DeviceStatus::NotFound)
        });

        Ok(DeviceReport { requested, devices })
    }

    /// Fire-and-forget `connect <serial>`; the next device check shows
    /// whether it worked.
    pub fn reconnect(&self, serial: &str) {
        let tool = self.tool.clone();
        let serial = serial.to_string();

        tokio::spawn(async move {
            match tool.run(&["connect", &serial]).await {
                Ok(output) => {
                    info!(
                        device = %serial,
                        "Reconnect issued: {}",
                        String::from_utf8_lossy(&output.stdout).trim()
                    );
                }
                Err(err) => {
                    warn!(device = %serial, "Reconnect failed: {}", err);
                }
            }
        });
    }

    async fn task(&self, task_id: Uuid) -> Result<Arc<Process>, Error> {
        self.tasks.lock().await
            .get(&task_id)
            .cloned()
            .ok_or(Error::TaskNotFound(task_id))
    }
}
