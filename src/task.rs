//! The task node: policy (timeout, retries, condition, cache), lifecycle
//! state, and the condition → cache-get → attempt-loop → cache-put
//! execution algorithm from spec.md §4.4. Grounded in the original's
//! `Task.execute_with_timeout` (`examples/original_source/omniTask/core/task.py`).

use crate::cache::{self, Cache};
use crate::condition::{self, Condition};
use crate::path;
use crate::result::{ErrorKind, ResultValue, TaskError, TaskStatus};
use crate::yielder::Yielder;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, instrument};

/// A task's identity, dependency list, and policy — everything known at
/// construction time, before any dependency output is available.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub task_type: String,
    pub config: Json,
    pub dependencies: Vec<String>,
    pub timeout: Option<Duration>,
    pub max_retry: u32,
    pub condition: Option<Condition>,
    pub cache_enabled: bool,
    pub cache_ttl: Option<i64>,
}

impl TaskSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, task_type: impl Into<String>, config: Json) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            config,
            dependencies: Vec::new(),
            timeout: None,
            max_retry: 0,
            condition: None,
            cache_enabled: false,
            cache_ttl: None,
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, ttl: Option<i64>) -> Self {
        self.cache_enabled = true;
        self.cache_ttl = ttl;
        self
    }
}

/// What a task body sees when it runs: its resolved configuration and a
/// read-only view of every dependency's published output.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub config: Json,
    pub dependency_outputs: HashMap<String, Json>,
    pub dependency_order: Vec<String>,
}

impl TaskContext {
    /// Convenience mirroring `Task.get_output` in the original: resolve a
    /// dotted path (defaulting to `"prev"`) against the populated
    /// dependencies.
    pub fn get_output(&self, path: Option<&str>) -> path::Result<Json> {
        path::resolve(
            path.unwrap_or("prev"),
            &self.dependency_outputs,
            &self.dependency_order,
        )
    }
}

/// The capability every task type implements: a type name for the
/// registry and cache fingerprint, and `run`. Streaming task types
/// additionally override `run_streaming`; the scheduler decides whether to
/// invoke it based on whether the task has a streaming consumer, not on
/// any flag the handler itself carries.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn type_name(&self) -> &str;

    async fn run(&self, ctx: &TaskContext) -> ResultValue;

    /// Run in streaming mode, emitting intermediate chunks via `yielder`.
    /// The default delegates to `run` and emits nothing incrementally —
    /// the scheduler still observes a well-formed single terminal item
    /// because it calls `yielder.complete` itself once this returns.
    async fn run_streaming(&self, ctx: &TaskContext, yielder: &Yielder) -> ResultValue {
        let _ = yielder;
        self.run(ctx).await
    }
}

/// Wraps a plain async closure as a [`TaskHandler`], the idiomatic
/// equivalent of the original's `create_function_task`.
pub struct FunctionTask<F> {
    type_name: String,
    func: F,
}

impl<F> FunctionTask<F> {
    pub fn new(type_name: impl Into<String>, func: F) -> Self {
        Self {
            type_name: type_name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FunctionTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ResultValue> + Send,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    async fn run(&self, ctx: &TaskContext) -> ResultValue {
        (self.func)(ctx.clone()).await
    }
}

/// Recursively substitute `${...}` tokens in every string found in
/// `config`, the way the original's `_resolve_config` does for top-level
/// values — generalized to nested maps/arrays since the engine's config
/// values are arbitrary JSON, not flat dicts.
#[must_use]
pub fn resolve_config(config: &Json, outputs: &HashMap<String, Json>, order: &[String]) -> Json {
    match config {
        Json::String(s) => Json::String(path::substitute(s, outputs, order)),
        Json::Array(items) => {
            Json::Array(items.iter().map(|v| resolve_config(v, outputs, order)).collect())
        }
        Json::Object(map) => {
            let resolved: serde_json::Map<String, Json> = map
                .iter()
                .map(|(k, v)| (k.clone(), resolve_config(v, outputs, order)))
                .collect();
            Json::Object(resolved)
        }
        other => other.clone(),
    }
}

/// Outcome of running a task node to a terminal state, paired with the
/// status the scheduler should record.
pub struct Execution {
    pub status: TaskStatus,
    pub result: ResultValue,
}

/// Execute one task node per spec.md §4.4: condition, cache lookup,
/// timed attempt loop with retries, cache store. `yielder` is `Some` only
/// when the scheduler has identified this task as a streaming producer
/// with at least one `StreamingTaskGroup` consumer.
#[instrument(skip(spec, handler, dependency_outputs, cache, yielder), fields(task = %spec.name, task_type = %spec.task_type))]
pub async fn execute_with_timeout(
    spec: &TaskSpec,
    handler: &dyn TaskHandler,
    dependency_outputs: &HashMap<String, Json>,
    dependency_order: &[String],
    cache: Option<Arc<dyn Cache>>,
    yielder: Option<&Yielder>,
) -> Execution {
    if let Some(condition) = &spec.condition {
        if !condition::evaluate(condition, dependency_outputs, dependency_order) {
            tracing::info!("condition not met, skipping");
            let result = ResultValue::skipped_condition_not_met();
            if let Some(yielder) = yielder {
                yielder.complete(result.clone());
            }
            return Execution {
                status: TaskStatus::ConditionNotMet,
                result,
            };
        }
    }

    let cache_key = cache.as_ref().map(|_| {
        cache::fingerprint(
            &spec.task_type,
            &spec.name,
            &spec.config,
            Some(dependency_outputs),
        )
    });

    if let (Some(cache), Some(key)) = (cache.as_ref(), cache_key.as_ref()) {
        if spec.cache_enabled {
            match cache.get(key).await {
                Ok(Some(entry)) if entry.is_valid() => {
                    tracing::info!(key = %key, "cache hit");
                    let mut result = entry.result;
                    result.cache_hit = true;
                    if let Some(yielder) = yielder {
                        yielder.complete(result.clone());
                    }
                    return Execution {
                        status: TaskStatus::Completed,
                        result,
                    };
                }
                Ok(_) => tracing::debug!(key = %key, "cache miss"),
                Err(error) => tracing::warn!(key = %key, %error, "cache read failed, treating as miss"),
            }
        }
    }

    let ctx = TaskContext {
        config: resolve_config(&spec.config, dependency_outputs, dependency_order),
        dependency_outputs: dependency_outputs.clone(),
        dependency_order: dependency_order.to_vec(),
    };

    let started = std::time::Instant::now();
    let max_attempts = 1 + spec.max_retry;
    let mut last = None;
    let mut status = TaskStatus::Failed;

    for attempt in 1..=max_attempts {
        let span = tracing::info_span!("attempt", attempt, max_attempts);
        let run_future = async {
            if let Some(yielder) = yielder {
                handler.run_streaming(&ctx, yielder).await
            } else {
                handler.run(&ctx).await
            }
        }
        .instrument(span);

        let outcome = match spec.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, run_future).await {
                Ok(result) => Some(result),
                None => None,
            },
            None => Some(run_future.await),
        };

        let Some(mut result) = outcome else {
            tracing::warn!(attempt, ?spec.timeout, "task timed out");
            status = TaskStatus::TimedOut;
            last = Some(ResultValue {
                success: false,
                output: Json::Object(serde_json::Map::new()),
                error: Some(TaskError::timeout(format!(
                    "task execution timed out after {:?}",
                    spec.timeout.unwrap_or_default()
                ))),
                execution_time: started.elapsed().as_secs_f64(),
                retries: attempt,
                progress: None,
                cache_hit: false,
            });
            break;
        };

        result.execution_time = started.elapsed().as_secs_f64();
        result.retries = attempt;
        result = crate::result::enforce_map_output(result);

        let success = result.success;
        last = Some(result);

        if success {
            status = TaskStatus::Completed;
            break;
        }
        if attempt == max_attempts {
            status = TaskStatus::Failed;
        } else {
            tracing::debug!(attempt, "task failed, retrying");
        }
    }

    let result = last.unwrap_or_else(|| {
        ResultValue::failure(TaskError::internal("task produced no result"))
    });

    if result.success {
        if let (Some(cache), Some(key)) = (cache.as_ref(), cache_key.as_ref()) {
            if spec.cache_enabled {
                if let Err(error) = cache.put(key, result.clone(), spec.cache_ttl).await {
                    tracing::warn!(key = %key, %error, "cache store failed");
                }
            }
        }
    }

    if let Some(yielder) = yielder {
        yielder.complete(result.clone());
    }

    Execution { status, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Always(bool);

    #[async_trait]
    impl TaskHandler for Always {
        fn type_name(&self) -> &str {
            "always"
        }

        async fn run(&self, _ctx: &TaskContext) -> ResultValue {
            if self.0 {
                ResultValue::success(json!({"ok": true}))
            } else {
                ResultValue::failure(TaskError::user("nope"))
            }
        }
    }

    struct FailNTimes {
        remaining: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for FailNTimes {
        fn type_name(&self) -> &str {
            "fail_n"
        }

        async fn run(&self, _ctx: &TaskContext) -> ResultValue {
            let remaining = self
                .remaining
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |v| Some(v.saturating_sub(1)),
                )
                .unwrap_or(0);
            if remaining > 0 {
                ResultValue::failure(TaskError::user("not yet"))
            } else {
                ResultValue::success(json!({"ok": true}))
            }
        }
    }

    struct Sleeper(Duration);

    #[async_trait]
    impl TaskHandler for Sleeper {
        fn type_name(&self) -> &str {
            "sleeper"
        }

        async fn run(&self, _ctx: &TaskContext) -> ResultValue {
            tokio::time::sleep(self.0).await;
            ResultValue::success(json!({}))
        }
    }

    #[tokio::test]
    async fn linear_success_completes() {
        let spec = TaskSpec::new("a", "always", json!({}));
        let handler = Always(true);
        let outcome =
            execute_with_timeout(&spec, &handler, &HashMap::new(), &[], None, None).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert!(outcome.result.success);
    }

    #[tokio::test]
    async fn retry_then_succeed_records_retry_count() {
        let spec = TaskSpec::new("r", "fail_n", json!({})).with_max_retry(2);
        let handler = FailNTimes {
            remaining: std::sync::atomic::AtomicU32::new(2),
        };
        let outcome =
            execute_with_timeout(&spec, &handler, &HashMap::new(), &[], None, None).await;
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.result.retries, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail() {
        let spec = TaskSpec::new("r", "always", json!({})).with_max_retry(1);
        let handler = Always(false);
        let outcome =
            execute_with_timeout(&spec, &handler, &HashMap::new(), &[], None, None).await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(!outcome.result.success);
    }

    #[tokio::test]
    async fn timeout_fires_before_completion() {
        let spec = TaskSpec::new("t", "sleeper", json!({}))
            .with_timeout(Duration::from_millis(20));
        let handler = Sleeper(Duration::from_millis(200));
        let outcome =
            execute_with_timeout(&spec, &handler, &HashMap::new(), &[], None, None).await;
        assert_eq!(outcome.status, TaskStatus::TimedOut);
        assert_eq!(
            outcome.result.error.map(|e| e.kind),
            Some(ErrorKind::Timeout)
        );
    }

    #[tokio::test]
    async fn condition_not_met_skips_without_running() {
        let spec = TaskSpec::new("c", "always", json!({})).with_condition(Condition::Structured {
            path: "upstream.ready".to_string(),
            operator: crate::condition::Operator::Eq,
            value: json!(true),
        });
        let handler = Always(false);
        let mut outputs = HashMap::new();
        outputs.insert("upstream".to_string(), json!({"ready": false}));
        let outcome = execute_with_timeout(
            &spec,
            &handler,
            &outputs,
            &["upstream".to_string()],
            None,
            None,
        )
        .await;
        assert_eq!(outcome.status, TaskStatus::ConditionNotMet);
        assert!(outcome.result.success);
    }

    #[tokio::test]
    async fn non_map_output_is_rewritten_to_internal_error() {
        struct BadOutput;
        #[async_trait]
        impl TaskHandler for BadOutput {
            fn type_name(&self) -> &str {
                "bad"
            }
            async fn run(&self, _ctx: &TaskContext) -> ResultValue {
                ResultValue {
                    success: true,
                    output: json!([1, 2, 3]),
                    error: None,
                    execution_time: 0.0,
                    retries: 1,
                    progress: None,
                    cache_hit: false,
                }
            }
        }
        let spec = TaskSpec::new("b", "bad", json!({}));
        let handler = BadOutput;
        let outcome =
            execute_with_timeout(&spec, &handler, &HashMap::new(), &[], None, None).await;
        assert!(!outcome.result.success);
        assert_eq!(
            outcome.result.error.map(|e| e.kind),
            Some(ErrorKind::Internal)
        );
    }
}
