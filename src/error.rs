use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;


#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Device tool unavailable at {path:?}: {reason}")]
    ToolUnavailable { path: PathBuf, reason: String },
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("Task already terminal: {0}")]
    TaskAlreadyTerminal(Uuid),
    #[error("Command timed out after {}s", .0.as_secs_f64())]
    ExecutionTimeout(Duration),
    #[error("Command failed with exit code {code}: {message}")]
    ExecutionFailure { code: i32, message: String },
    #[error("Command failed: {0}")]
    CommandFailed(Arc<std::io::Error>),
    #[error("Control plane unavailable: {0}")]
    ControlPlaneUnavailable(String),
    #[error("Invalid task descriptor: {0}")]
    DescriptorInvalid(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::CommandFailed(Arc::new(err))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timed_out() {
        let err = Error::ExecutionTimeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "Command timed out after 60s");
    }

    #[test]
    fn test_io_error_is_wrapped() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "no adb").into();
        assert!(matches!(err, Error::CommandFailed(_)));
        assert!(err.to_string().contains("no adb"));
    }
}
