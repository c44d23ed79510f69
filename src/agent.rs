use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::ControlPlaneClient;
use crate::config::Config;
use crate::devices::DeviceStatus;
use crate::error::Error;
use crate::executor::CommandExecutor;
use crate::shutdown::Shutdown;
use crate::tasks::{TaskDescriptor, TaskSnapshot};


/// Polls the control plane for work, runs it, and reports back.
///
/// One tick runs to completion (fetch, dispatch, monitor, device check)
/// before the loop sleeps. Nothing that goes wrong inside a tick ends the
/// loop; only a failed start-up health check or a shutdown does.
pub struct AgentLoop {
    executor: CommandExecutor,
    client: ControlPlaneClient,
    poll_interval: Duration,
    task_monitoring: bool,
    auto_reconnect: bool,
    error_reporting: bool,
    devices: Mutex<BTreeMap<String, DeviceStatus>>,
}

impl AgentLoop {
    pub fn new(executor: CommandExecutor, client: ControlPlaneClient, config: &Config) -> Self {
        Self {
            executor,
            client,
            poll_interval: config.poll_interval(),
            task_monitoring: config.task_monitoring,
            auto_reconnect: config.auto_reconnect,
            error_reporting: config.error_reporting,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub async fn run(&self, mut shutdown: Shutdown) -> Result<(), Error> {
        if !self.client.health_check().await {
            error!("Control plane is not accessible");
            return Err(Error::ControlPlaneUnavailable("health check failed".to_string()));
        }

        info!(poll_interval = ?self.poll_interval, "Starting agent loop");

        while !shutdown.is_triggered() {
            let tick = AssertUnwindSafe(self.tick()).catch_unwind();
            tokio::select! {
                _ = shutdown.wait() => break,
                result = tick => {
                    if let Err(panic) = result {
                        error!("Agent loop iteration panicked: {}", panic_message(&*panic));
                    }
                }
            }

            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Shutting down agent loop");
        self.shutdown().await;
        info!("Shutdown complete");
        Ok(())
    }

    pub async fn tick(&self) {
        match self.client.fetch_pending_tasks().await {
            Ok(descriptors) => {
                for descriptor in descriptors.iter() {
                    self.dispatch(descriptor).await;
                }
            }
            Err(err) => {
                warn!("Failed to fetch pending tasks: {}", err);
            }
        }

        if self.task_monitoring {
            self.monitor().await;
        }

        if self.auto_reconnect {
            self.check_devices().await;
        }
    }

    pub async fn dispatch(&self, descriptor: &TaskDescriptor) {
        let command = match descriptor.command() {
            Some(command) => command,
            None => {
                let err = Error::DescriptorInvalid(format!("no command in {:?}", descriptor));
                warn!("Dropping task: {}", err);
                return;
            }
        };

        let result = match self.executor.execute(command, descriptor.device(), descriptor.mode()).await {
            Ok(result) => result,
            Err(err) => {
                error!(remote_id = ?descriptor.task_id, "Error handling task: {}", err);
                self.report(&err, descriptor).await;
                return;
            }
        };

        match self.client.push_task_result(result.task_id, &result).await {
            Ok(_) => {
                info!(
                    task_id = %result.task_id,
                    remote_id = ?descriptor.task_id,
                    status = ?result.status,
                    "Task handled"
                );
            }
            Err(err) => {
                warn!(task_id = %result.task_id, "Failed to push task result: {}", err);
                self.report(&err, descriptor).await;
            }
        }
    }

    /// Pushes the status of every tracked task and forgets the finished
    /// ones. Cleanup happens even when the push failed: delivery is at
    /// least once per attempt, not guaranteed.
    pub async fn monitor(&self) {
        for task_id in self.executor.task_ids().await {
            let snapshot = self.executor.get_status(task_id).await
                .unwrap_or_else(|_| TaskSnapshot::not_found(task_id));

            if let Err(err) = self.client.push_task_status(task_id, &snapshot).await {
                warn!(task_id = %task_id, "Failed to push task status: {}", err);
            }

            if snapshot.is_terminal() {
                self.executor.cleanup(task_id).await;
                debug!(task_id = %task_id, status = ?snapshot.status, "Cleaned up task");
            }
        }
    }

    pub async fn check_devices(&self) {
        let report = match self.executor.check_device_status(None).await {
            Ok(report) => report,
            Err(err) => {
                warn!("Error checking device connections: {}", err);
                return;
            }
        };

        let changed = {
            let mut known = self.devices.lock().await;
            let mut changed = Vec::new();
            for (serial, status) in report.devices.iter() {
                if known.get(serial) != Some(status) {
                    changed.push((serial.clone(), status.clone()));
                }
            }
            for serial in known.keys() {
                if !report.devices.contains_key(serial) {
                    changed.push((serial.clone(), DeviceStatus::NotFound));
                }
            }
            *known = report.devices.clone();
            changed
        };

        for (serial, status) in changed.iter() {
            debug!(device = %serial, status = %status, "Device status changed");
            let _ = self.client.push_device_status(serial, status).await;
        }

        for (serial, status) in report.devices.iter() {
            if *status == DeviceStatus::Offline {
                warn!(device = %serial, "Device is offline, attempting reconnect");
                self.executor.reconnect(serial);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.executor.stop_all().await;
    }

    async fn report(&self, err: &Error, descriptor: &TaskDescriptor) {
        if !self.error_reporting {
            return;
        }

        let context = serde_json::to_value(descriptor).ok();
        let _ = self.client.report_error(&err.to_string(), context).await;
    }
}


fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
