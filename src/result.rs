//! Task status, result, and error taxonomy shared by every task and group.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task. Once a task leaves `Pending` it never returns
/// to it; every variant but `Pending`/`Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    TimedOut,
    ConditionNotMet,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// Error tag carried on a failed [`ResultValue`]. Mirrors the taxonomy a
/// task body can surface to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    User,
    Timeout,
    Dependency,
    Path,
    Internal,
}

/// An error value attached to a failed result: a tag plus a human-readable
/// message. Kept separate from `snafu`'s per-module error enums since it
/// has to cross the task/scheduler boundary as plain data (cloned into
/// result maps, not propagated with `?`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, message)
    }

    #[must_use]
    pub fn path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Path, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A progress snapshot a task may publish during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

impl TaskProgress {
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64) * 100.0
        }
    }
}

/// The structured result of running a task to completion (or failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultValue {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<TaskError>,
    pub execution_time: f64,
    pub retries: u32,
    pub progress: Option<TaskProgress>,
    /// Whether this result was served from cache rather than freshly
    /// computed. Defaulted on deserialize so results serialized before this
    /// field existed (e.g. cache entries already on disk) still load.
    #[serde(default)]
    pub cache_hit: bool,
}

impl ResultValue {
    #[must_use]
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            execution_time: 0.0,
            retries: 1,
            progress: None,
            cache_hit: false,
        }
    }

    #[must_use]
    pub fn failure(error: TaskError) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Object(serde_json::Map::new()),
            error: Some(error),
            execution_time: 0.0,
            retries: 1,
            progress: None,
            cache_hit: false,
        }
    }

    #[must_use]
    pub fn skipped_condition_not_met() -> Self {
        let mut output = serde_json::Map::new();
        output.insert("skipped".into(), serde_json::Value::Bool(true));
        output.insert(
            "reason".into(),
            serde_json::Value::String("condition_not_met".into()),
        );
        Self {
            success: true,
            output: serde_json::Value::Object(output),
            error: None,
            execution_time: 0.0,
            retries: 0,
            progress: None,
            cache_hit: false,
        }
    }
}

/// Enforce the engine's invariant that a successful result's output is a
/// JSON object, rewriting violations into an internal failure as the spec
/// requires rather than propagating a type error into the scheduler.
#[must_use]
pub fn enforce_map_output(mut result: ResultValue) -> ResultValue {
    if result.success && !result.output.is_object() {
        let shape = match &result.output {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "bool",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => unreachable!(),
        };
        result.success = false;
        result.error = Some(TaskError::internal(format!(
            "non-map output (found {shape})"
        )));
    }
    result
}
