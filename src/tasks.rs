use serde::{Deserialize, Serialize};
use uuid::Uuid;


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskMode {
    Foreground,
    Background,
}

impl TaskMode {
    pub fn from_background(background: bool) -> Self {
        if background {
            TaskMode::Background
        } else {
            TaskMode::Foreground
        }
    }
}


#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    Running,
    Completed,
    #[serde(rename = "error")]
    Errored,
    Stopped,
    NotFound,
}

impl TaskStatus {
    /// Terminal statuses are the only ones that carry an exit code.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Errored | TaskStatus::Stopped)
    }
}


/// Point-in-time view of a task, also the body pushed to the control plane.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskSnapshot {
    pub fn started(task_id: Uuid) -> Self {
        Self {
            task_id,
            status: TaskStatus::Started,
            output: None,
            exit_code: None,
            error: None,
            message: Some("Command started in background".to_string()),
        }
    }

    pub fn not_found(task_id: Uuid) -> Self {
        Self {
            task_id,
            status: TaskStatus::NotFound,
            output: None,
            exit_code: None,
            error: Some("Task not found".to_string()),
            message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}


/// Work item as listed by the control plane. Fields are optional so that a
/// partially filled descriptor still parses and can be rejected with context.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator_serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
}

impl TaskDescriptor {
    pub fn command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
    }

    pub fn device(&self) -> Option<&str> {
        self.emulator_serial
            .as_deref()
            .filter(|serial| !serial.is_empty())
    }

    pub fn mode(&self) -> TaskMode {
        TaskMode::from_background(self.background.unwrap_or(false))
    }
}
