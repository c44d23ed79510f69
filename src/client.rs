use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, Endpoints};
use crate::devices::DeviceStatus;
use crate::error::Error;
use crate::tasks::{TaskDescriptor, TaskSnapshot};


const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];


/// HTTP access to the control plane.
///
/// Every call is total: failures come back as
/// [`Error::ControlPlaneUnavailable`] after the retry budget is spent.
#[derive(Clone, Debug)]
pub struct ControlPlaneClient {
    reqwest: reqwest::Client,
    server: String,
    endpoints: Endpoints,
    attempts: u32,
    retry_delay: Duration,
}

impl ControlPlaneClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let reqwest = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .danger_accept_invalid_certs(!config.ssl_verify)
            .build()
            .map_err(|err| Error::Config(format!("HTTP client: {}", err)))?;

        Ok(Self {
            reqwest,
            server: config.base_url(),
            endpoints: config.load_endpoints()?,
            attempts: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
        })
    }

    pub async fn health_check(&self) -> bool {
        match self.request(Method::GET, &self.endpoints.health, None::<&()>).await {
            Ok(body) => body.get("status").and_then(Value::as_str) == Some("healthy"),
            Err(_) => false,
        }
    }

    /// Lists pending work. Items that do not parse as descriptors are
    /// dropped here so one bad entry cannot hide the rest.
    pub async fn fetch_pending_tasks(&self) -> Result<Vec<TaskDescriptor>, Error> {
        let body = self.request(Method::GET, &self.endpoints.pending_tasks, None::<&()>).await?;

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut body) => {
                if body.get("status").and_then(Value::as_str) == Some("error") {
                    let message = body.get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string();
                    return Err(Error::ControlPlaneUnavailable(message));
                }
                match body.remove("tasks") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        };

        let mut descriptors = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<TaskDescriptor>(item.clone()) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(err) => {
                    let err = Error::DescriptorInvalid(format!("{}: {}", err, item));
                    warn!("Dropping task: {}", err);
                }
            }
        }

        Ok(descriptors)
    }

    pub async fn push_task_result(&self, task_id: Uuid, result: &TaskSnapshot) -> Result<Value, Error> {
        let path = self.endpoints.task_result.replace(":taskId", &task_id.to_string());
        self.request(Method::POST, &path, Some(result)).await
    }

    pub async fn push_task_status(&self, task_id: Uuid, status: &TaskSnapshot) -> Result<Value, Error> {
        let path = self.endpoints.task_status.replace(":taskId", &task_id.to_string());
        self.request(Method::POST, &path, Some(status)).await
    }

    pub async fn push_device_status(&self, serial: &str, status: &DeviceStatus) -> Result<Value, Error> {
        let path = self.endpoints.device_status.replace(":serial", serial);
        let body = json!({ "serial": serial, "status": status });
        let result = self.request(Method::POST, &path, Some(&body)).await;
        if let Err(err) = &result {
            warn!(device = %serial, "Failed to push device status: {}", err);
        }
        result
    }

    pub async fn report_error(&self, error: &str, context: Option<Value>) -> Result<Value, Error> {
        let body = json!({
            "error": error,
            "context": context.unwrap_or_else(|| json!({})),
        });
        let result = self.request(Method::POST, &self.endpoints.errors, Some(&body)).await;
        if let Err(err) = &result {
            warn!("Failed to report error: {}", err);
        }
        result
    }

    async fn request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>
    ) -> Result<Value, Error> {
        let url = format!("{}{}", self.server, path);
        let mut attempt = 1;

        loop {
            let mut request = self.reqwest.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let failure = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return decode(response).await;
                }
                Ok(response) if RETRY_STATUSES.contains(&response.status()) => {
                    format!("{} {} returned {}", method, url, response.status())
                }
                Ok(response) => {
                    return Err(Error::ControlPlaneUnavailable(
                        format!("{} {} returned {}", method, url, response.status())
                    ));
                }
                Err(err) => format!("{} {} failed: {}", method, url, err),
            };

            if attempt >= self.attempts {
                warn!("Giving up after {} attempts: {}", attempt, failure);
                return Err(Error::ControlPlaneUnavailable(failure));
            }

            let delay = self.retry_delay * 2u32.saturating_pow(attempt - 1);
            debug!("Attempt {} failed, retrying in {:?}: {}", attempt, delay, failure);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}


async fn decode(response: reqwest::Response) -> Result<Value, Error> {
    let url = response.url().clone();
    let text = response.text().await
        .map_err(|err| Error::ControlPlaneUnavailable(format!("{}: {}", url, err)))?;

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&text)
        .map_err(|err| Error::ControlPlaneUnavailable(format!("{}: invalid JSON: {}", url, err)))
}
