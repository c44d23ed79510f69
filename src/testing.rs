//! Fixtures shared by the unit tests: a shell script standing in for `adb`
//! and an in-process control plane that records every call.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;


pub struct StubTool {
    _dir: tempfile::TempDir,
    path: PathBuf,
    log: PathBuf,
}

impl StubTool {
    /// Script that logs its arguments and then runs `body` unconditionally.
    pub fn raw(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adb");
        let log = dir.path().join("invocations.log");

        let script = format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\n{}\n",
            log.display(),
            body
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self { _dir: dir, path, log }
    }

    /// Answers `version` and `devices` like adb with no devices attached,
    /// and runs `body` for everything else.
    pub fn new(body: &str) -> Self {
        Self::with_listing("", body)
    }

    /// Prints its arguments back on stdout.
    pub fn echo() -> Self {
        Self::new(r#"printf '%s\n' "$*""#)
    }

    /// Echo tool whose `devices` output lists `listing` under the header.
    pub fn with_devices(listing: &str) -> Self {
        Self::with_listing(listing, r#"printf '%s\n' "$*""#)
    }

    fn with_listing(listing: &str, body: &str) -> Self {
        Self::raw(&format!(
            "case \"$1\" in\n\
             version) echo 'Android Debug Bridge version 1.0.41'; exit 0 ;;\n\
             devices) printf 'List of devices attached\\n{}'; exit 0 ;;\n\
             esac\n\
             {}",
            listing.replace('\n', "\\n").replace('\t', "\\t"),
            body
        ))
    }

    pub fn config(&self) -> Config {
        Config {
            adb_path: self.path.clone(),
            command_timeout_secs: 10,
            stop_grace_ms: 300,
            ..Config::default()
        }
    }

    /// Argument lists the tool has been called with, in order.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}


/// Polls `check` until it holds, giving up after five seconds.
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}


#[derive(Debug, Default)]
pub struct Recorded {
    pub healthy: bool,
    pub pending: Vec<Value>,
    pub pending_status: Option<StatusCode>,
    pub pending_hits: usize,
    pub results: Vec<(String, Value)>,
    pub statuses: Vec<(String, Value)>,
    pub devices: Vec<(String, Value)>,
    pub errors: Vec<Value>,
}


#[derive(Clone)]
pub struct ControlPlane {
    pub state: Arc<Mutex<Recorded>>,
    port: u16,
}

impl ControlPlane {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(Recorded {
            healthy: true,
            ..Recorded::default()
        }));

        let app = Router::new()
            .route("/health", get(health))
            .route("/api/terminal/execute", get(pending))
            .route("/api/emulator/logs/:task_id", post(task_result))
            .route("/api/emulator/status/:task_id", post(task_status))
            .route("/api/emulator/device/:serial", post(device_status))
            .route("/api/errors", post(report_error))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, port }
    }

    pub fn configure(&self, config: Config) -> Config {
        Config {
            api_host: "http://127.0.0.1".to_string(),
            api_port: self.port,
            retry_delay_ms: 10,
            http_timeout_secs: 5,
            poll_interval_ms: 50,
            ..config
        }
    }

    pub fn queue(&self, descriptor: Value) {
        self.state.lock().unwrap().pending.push(descriptor);
    }

    pub fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.state.lock().unwrap()
    }
}


type Shared = State<Arc<Mutex<Recorded>>>;


async fn health(State(state): Shared) -> Json<Value> {
    if state.lock().unwrap().healthy {
        Json(json!({ "status": "healthy" }))
    } else {
        Json(json!({ "status": "degraded" }))
    }
}


async fn pending(State(state): Shared) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    state.pending_hits += 1;
    if let Some(status) = state.pending_status {
        return Err(status);
    }
    let tasks: Vec<Value> = state.pending.drain(..).collect();
    Ok(Json(json!({ "status": "success", "tasks": tasks })))
}


async fn task_result(
    State(state): Shared,
    Path(task_id): Path<String>,
    Json(body): Json<Value>
) -> Json<Value> {
    state.lock().unwrap().results.push((task_id, body));
    Json(json!({ "status": "success" }))
}


async fn task_status(
    State(state): Shared,
    Path(task_id): Path<String>,
    Json(body): Json<Value>
) -> Json<Value> {
    state.lock().unwrap().statuses.push((task_id, body));
    Json(json!({ "status": "success" }))
}


async fn device_status(
    State(state): Shared,
    Path(serial): Path<String>,
    Json(body): Json<Value>
) -> Json<Value> {
    state.lock().unwrap().devices.push((serial, body));
    Json(json!({ "status": "success" }))
}


async fn report_error(State(state): Shared, Json(body): Json<Value>) -> Json<Value> {
    state.lock().unwrap().errors.push(body);
    Json(json!({ "status": "success" }))
}
