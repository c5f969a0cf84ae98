//! Maps task-type names to constructors. Used by `Workflow::create_task`
//! and, per spec.md's prescribed fix to the original's `_execute_task_group`
//! (which materialized children via the *workflow's* task table, violating
//! name uniqueness — see SPEC_FULL.md §4/Open Questions), by `TaskGroup`
//! and `StreamingTaskGroup` to materialize children registry-side instead.

use crate::result::ResultValue;
use crate::task::{FunctionTask, TaskContext, TaskHandler, TaskSpec};
use serde_json::Value as Json;
use snafu::prelude::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("task type '{task_type}' is not registered"))]
    UnknownTaskType { task_type: String },

    #[snafu(display("task type '{task_type}' is already registered"))]
    AlreadyRegistered { task_type: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A task materialized by the registry: its policy/identity plus the
/// handler that will run it. `Workflow::create_task` and every
/// `TaskGroup`'s child materialization both go through this.
pub struct RegisteredTask {
    pub spec: TaskSpec,
    pub handler: Arc<dyn TaskHandler>,
}

type Constructor = Arc<dyn Fn(&str, &Json) -> Arc<dyn TaskHandler> + Send + Sync>;

/// A string→constructor map. Registration is idempotent-forbidden: a
/// second `register` for the same type name is an error, matching
/// spec.md §4.8.
#[derive(Clone, Default)]
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type under `type_name`. `make` is called once per
    /// `create_task`, given the new task's name and config, and must
    /// return a fresh handler instance.
    pub fn register<F>(&mut self, type_name: impl Into<String>, make: F) -> Result<()>
    where
        F: Fn(&str, &Json) -> Arc<dyn TaskHandler> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.constructors.contains_key(&type_name) {
            return AlreadyRegisteredSnafu { task_type: type_name }.fail();
        }
        self.constructors.insert(type_name, Arc::new(make));
        Ok(())
    }

    /// Register a plain async closure as a task type, the idiomatic
    /// equivalent of the original's `create_function_task` — a function
    /// registered once, wrapped in a [`FunctionTask`] on every
    /// materialization.
    pub fn register_function<F, Fut>(&mut self, type_name: impl Into<String>, func: F) -> Result<()>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ResultValue> + Send + 'static,
    {
        let type_name = type_name.into();
        let owned_type_name = type_name.clone();
        self.register(type_name, move |_name, _config| {
            let handler: Arc<dyn TaskHandler> =
                Arc::new(FunctionTask::new(owned_type_name.clone(), func.clone()));
            handler
        })
    }

    /// Construct a new task instance of `task_type`. The returned
    /// [`TaskSpec`] carries no dependencies, timeout, or cache policy yet —
    /// callers (`Workflow::create_task`, `TaskGroup` child materialization)
    /// layer those on afterward.
    pub fn create_task(&self, task_type: &str, name: &str, config: Json) -> Result<RegisteredTask> {
        let make = self
            .constructors
            .get(task_type)
            .with_context(|| UnknownTaskTypeSnafu {
                task_type: task_type.to_string(),
            })?;
        let handler = make(name, &config);
        Ok(RegisteredTask {
            spec: TaskSpec::new(name, task_type, config),
            handler,
        })
    }

    #[must_use]
    pub fn is_registered(&self, task_type: &str) -> bool {
        self.constructors.contains_key(task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl TaskHandler for Echo {
        fn type_name(&self) -> &str {
            "echo"
        }

        async fn run(&self, ctx: &TaskContext) -> ResultValue {
            ResultValue::success(ctx.config.clone())
        }
    }

    #[test]
    fn double_registration_is_an_error() {
        let mut registry = Registry::new();
        registry.register("echo", |_, _| Arc::new(Echo) as Arc<dyn TaskHandler>).unwrap();
        let result = registry.register("echo", |_, _| Arc::new(Echo) as Arc<dyn TaskHandler>);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = Registry::new();
        assert!(registry.create_task("nope", "n", json!({})).is_err());
    }

    #[tokio::test]
    async fn registered_type_constructs_a_working_task() {
        let mut registry = Registry::new();
        registry
            .register("echo", |_, _| Arc::new(Echo) as Arc<dyn TaskHandler>)
            .unwrap();
        let task = registry.create_task("echo", "e1", json!({"n": 1})).unwrap();
        let ctx = TaskContext {
            config: json!({"n": 1}),
            dependency_outputs: HashMap::new(),
            dependency_order: Vec::new(),
        };
        let result = task.handler.run(&ctx).await;
        assert_eq!(result.output, json!({"n": 1}));
    }

    #[tokio::test]
    async fn function_registration_wraps_a_closure() {
        let mut registry = Registry::new();
        registry
            .register_function("double", |ctx: TaskContext| async move {
                let n = ctx.config.get("n").and_then(Json::as_i64).unwrap_or(0);
                ResultValue::success(json!({"n": n * 2}))
            })
            .unwrap();
        let task = registry
            .create_task("double", "d1", json!({"n": 21}))
            .unwrap();
        let ctx = TaskContext {
            config: json!({"n": 21}),
            dependency_outputs: HashMap::new(),
            dependency_order: Vec::new(),
        };
        let result = task.handler.run(&ctx).await;
        assert_eq!(result.output, json!({"n": 42}));
    }
}
