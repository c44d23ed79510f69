use clap::{ArgAction, Args};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;


const DEFAULT_API_HOST: &str = "http://127.0.0.1";
const DEFAULT_API_PORT: u16 = 3000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_ADB_PATH: &str = "/usr/bin/adb";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STOP_GRACE_MS: u64 = 5000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;


/// Runtime settings. Every field can come from a flag or its environment
/// variable.
#[derive(Args, Clone, Debug)]
pub struct Config {
    #[arg(long, env = "API_HOST", default_value = DEFAULT_API_HOST)]
    pub api_host: String,

    #[arg(long, env = "API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// YAML file overriding the control plane endpoint templates
    #[arg(long, env = "ADB_PROXY_ENDPOINTS")]
    pub endpoints: Option<PathBuf>,

    #[arg(long, env = "SSL_VERIFY", default_value_t = true, action = ArgAction::Set)]
    pub ssl_verify: bool,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,

    /// Total attempts per control plane request
    #[arg(long, env = "MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "ADB_PATH", default_value = DEFAULT_ADB_PATH)]
    pub adb_path: PathBuf,

    #[arg(long, env = "ADB_DEFAULT_SERIAL")]
    pub default_serial: Option<String>,

    #[arg(long, env = "ADB_TIMEOUT", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout_secs: u64,

    /// How long a stopped task gets between SIGTERM and SIGKILL
    #[arg(long, env = "STOP_GRACE_MS", default_value_t = DEFAULT_STOP_GRACE_MS)]
    pub stop_grace_ms: u64,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "ENABLE_BACKGROUND_TASKS", default_value_t = true, action = ArgAction::Set)]
    pub background_tasks: bool,

    #[arg(long, env = "ENABLE_TASK_MONITORING", default_value_t = true, action = ArgAction::Set)]
    pub task_monitoring: bool,

    #[arg(long, env = "ENABLE_AUTO_RECONNECT", default_value_t = true, action = ArgAction::Set)]
    pub auto_reconnect: bool,

    #[arg(long, env = "ENABLE_ERROR_REPORTING", default_value_t = true, action = ArgAction::Set)]
    pub error_reporting: bool,
}

impl Config {
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.api_host.trim_end_matches('/'), self.api_port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn load_endpoints(&self) -> Result<Endpoints, Error> {
        match &self.endpoints {
            Some(path) => Endpoints::from_file(path),
            None => Ok(Endpoints::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            endpoints: None,
            ssl_verify: true,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            adb_path: PathBuf::from(DEFAULT_ADB_PATH),
            default_serial: None,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            background_tasks: true,
            task_monitoring: true,
            auto_reconnect: true,
            error_reporting: true,
        }
    }
}


/// Control plane path templates. `:taskId` and `:serial` are substituted
/// before each call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Endpoints {
    pub health: String,
    pub pending_tasks: String,
    pub task_result: String,
    pub task_status: String,
    pub device_status: String,
    pub errors: String,
}

impl Endpoints {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        serde_yaml::from_str(&contents)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            health: "/health".to_string(),
            pending_tasks: "/api/terminal/execute".to_string(),
            task_result: "/api/emulator/logs/:taskId".to_string(),
            task_status: "/api/emulator/status/:taskId".to_string(),
            device_status: "/api/emulator/device/:serial".to_string(),
            errors: "/api/errors".to_string(),
        }
    }
}
