//! Dynamic fan-out groups: `TaskGroup` materializes one child task per
//! element of a parent's output list and runs them bounded-concurrent;
//! `StreamingTaskGroup` does the same but reads items off a producer's
//! `Yielder` as they arrive. Grounded in the original's `TaskGroup` /
//! `StreamingTaskGroup` (`examples/original_source/omniTask/models/task_group.py`),
//! corrected per SPEC_FULL.md to materialize children through the
//! `Registry` rather than a workflow's task table.

use crate::cache::Cache;
use crate::path;
use crate::registry::Registry;
use crate::result::{ResultValue, TaskError};
use crate::task::{self, TaskContext};
use crate::yielder::YielderStream;
use serde_json::Value as Json;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("for_each path '{path}' is absent or not a list in parent output"))]
    NotAList { path: String },

    #[snafu(display("registry error materializing group child: {source}"))]
    Registry { source: crate::registry::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Static configuration for a dynamic fan-out group, mirroring the
/// template-file contract's group block (spec.md §6).
#[derive(Debug, Clone)]
pub struct TaskGroupConfig {
    pub task_type: String,
    pub for_each: String,
    pub config_template: Json,
    pub max_concurrent: usize,
    pub streaming_enabled: bool,
}

impl TaskGroupConfig {
    #[must_use]
    pub fn new(task_type: impl Into<String>, for_each: impl Into<String>, config_template: Json) -> Self {
        Self {
            task_type: task_type.into(),
            for_each: for_each.into(),
            config_template,
            max_concurrent: 10,
            streaming_enabled: false,
        }
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.streaming_enabled = true;
        self
    }

    /// The task name the group's synthetic scheduling dependency roots at
    /// — the first dotted segment of `for_each`.
    #[must_use]
    pub fn parent_name(&self) -> &str {
        self.for_each.split('.').next().unwrap_or(&self.for_each)
    }

    /// The portion of `for_each` after the parent's name, used to extract
    /// items from a streamed chunk that's already scoped to the parent.
    #[must_use]
    fn suffix(&self) -> Option<&str> {
        self.for_each.split_once('.').map(|(_, rest)| rest)
    }
}

/// Substitute `${item}` / `${item.x.y}` in every string of `template`
/// with `item` (whole) or a sub-path into it, per spec.md §4.7.
#[must_use]
fn render_config_template(template: &Json, item: &Json) -> Json {
    match template {
        Json::String(s) if s == "${item}" => item.clone(),
        Json::String(s) => {
            let mut outputs = HashMap::new();
            outputs.insert("item".to_string(), item.clone());
            let order = vec!["item".to_string()];
            Json::String(path::substitute(s, &outputs, &order))
        }
        Json::Array(items) => Json::Array(
            items
                .iter()
                .map(|v| render_config_template(v, item))
                .collect(),
        ),
        Json::Object(map) => {
            let rendered: serde_json::Map<String, Json> = map
                .iter()
                .map(|(k, v)| (k.clone(), render_config_template(v, item)))
                .collect();
            Json::Object(rendered)
        }
        other => other.clone(),
    }
}

/// Result of running one group to completion: successes only, per
/// spec.md §4.7's permissive-aggregation default — failed children are
/// recorded in `failures` for logging but never surface in `output`.
pub struct GroupExecution {
    pub result: ResultValue,
    pub failures: Vec<(String, TaskError)>,
}

/// Run a non-streaming group: read `for_each` from the parent's output,
/// materialize one child per item, execute bounded by `max_concurrent`.
pub async fn execute(
    group_name: &str,
    config: &TaskGroupConfig,
    parent_output: &Json,
    registry: &Registry,
    cache: Option<Arc<dyn Cache>>,
) -> GroupExecution {
    let items = match extract_items(parent_output, config.suffix()) {
        Some(items) => items,
        None => {
            return GroupExecution {
                result: ResultValue::failure(TaskError::dependency(format!(
                    "for_each '{}' not a list in parent output",
                    config.for_each
                ))),
                failures: Vec::new(),
            };
        }
    };

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut joins = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let child_name = format!("{group_name}_{index}");
        let child_config = render_config_template(&config.config_template, &item);
        let registered = match registry.create_task(&config.task_type, &child_name, child_config) {
            Ok(registered) => registered,
            Err(source) => {
                tracing::warn!(child_name, %source, "failed to materialize group child");
                continue;
            }
        };
        let semaphore = Arc::clone(&semaphore);
        let cache = cache.clone();
        joins.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome = task::execute_with_timeout(
                &registered.spec,
                registered.handler.as_ref(),
                &HashMap::new(),
                &[],
                cache,
                None,
            )
            .await;
            (registered.spec.name, outcome.result)
        });
    }

    collect(joins).await
}

/// Run a streaming group: consume items off `stream` as chunks arrive,
/// materializing and dispatching one child per extracted item, bounded
/// the same way, until the terminal item is observed.
///
/// `stream` must already be subscribed before the producer starts running
/// — a broadcast receiver only observes items sent after it subscribes, so
/// subscribing here (after the caller has already launched the producer)
/// could silently drop its earliest chunks. Callers obtain `stream` via
/// `Yielder::subscribe` before spawning the producer task.
pub async fn execute_streaming(
    group_name: &str,
    config: &TaskGroupConfig,
    mut stream: YielderStream,
    registry: &Registry,
    cache: Option<Arc<dyn Cache>>,
) -> GroupExecution {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut joins = JoinSet::new();
    let mut item_index = 0usize;
    let mut producer_failed = false;

    while let Some(item) = stream.next().await {
        match item {
            crate::yielder::StreamItem::Chunk(chunk) => {
                let Some(items) = extract_items(&chunk, config.suffix()) else {
                    continue;
                };
                for item in items {
                    let child_name = format!("{group_name}_streaming_{item_index}");
                    item_index += 1;
                    let child_config = render_config_template(&config.config_template, &item);
                    let registered =
                        match registry.create_task(&config.task_type, &child_name, child_config) {
                            Ok(registered) => registered,
                            Err(source) => {
                                tracing::warn!(child_name, %source, "failed to materialize streamed child");
                                continue;
                            }
                        };
                    let semaphore = Arc::clone(&semaphore);
                    let cache = cache.clone();
                    joins.spawn(async move {
                        let _permit =
                            semaphore.acquire_owned().await.expect("semaphore closed");
                        let outcome = task::execute_with_timeout(
                            &registered.spec,
                            registered.handler.as_ref(),
                            &HashMap::new(),
                            &[],
                            cache,
                            None,
                        )
                        .await;
                        (registered.spec.name, outcome.result)
                    });
                }
            }
            crate::yielder::StreamItem::Done(final_result) => {
                producer_failed = !final_result.success;
                break;
            }
        }
    }

    let execution = collect(joins).await;
    if producer_failed {
        // The producer itself failed; the group still reports whatever
        // children it managed to dispatch, per spec.md §4.6's "consumers
        // stop extracting new items and await only in-flight children".
        tracing::warn!(group_name, "producer failed; group stops extracting new items");
    }
    execution
}

async fn collect(mut joins: JoinSet<(String, ResultValue)>) -> GroupExecution {
    let mut results = Vec::new();
    let mut failures = Vec::new();

    while let Some(outcome) = joins.join_next().await {
        match outcome {
            Ok((name, result)) => {
                if result.success {
                    results.push(result.output);
                } else {
                    let error = result
                        .error
                        .unwrap_or_else(|| TaskError::internal("child failed with no error"));
                    failures.push((name, error));
                }
            }
            Err(join_error) => {
                failures.push(("<unknown>".to_string(), TaskError::internal(join_error.to_string())));
            }
        }
    }

    GroupExecution {
        result: ResultValue::success(serde_json::json!({ "results": results })),
        failures,
    }
}

/// Extract the list to fan out over: the whole value if `suffix` is
/// `None` (the producer already emits the list directly), otherwise the
/// value found by walking `suffix`'s dotted segments.
fn extract_items(value: &Json, suffix: Option<&str>) -> Option<Vec<Json>> {
    let target = match suffix {
        None => value.clone(),
        Some(suffix) => {
            let mut current = value.clone();
            for part in suffix.split('.') {
                current = current.as_object()?.get(part)?.clone();
            }
            current
        }
    };
    match target {
        Json::Array(items) => Some(items),
        Json::Null => None,
        other => Some(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskHandler;
    use crate::yielder::Yielder;
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

    fn registry_with_echo() -> Registry {
        let mut registry = Registry::new();
        registry
            .register("echo", |_, _| Arc::new(Echo) as Arc<dyn TaskHandler>)
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn fan_out_materializes_one_child_per_item() {
        let registry = registry_with_echo();
        let config = TaskGroupConfig::new("echo", "p.ids", json!({"n": "${item}"}))
            .with_max_concurrent(2);
        let parent_output = json!({"ids": [7, 8, 9]});

        let execution = execute("g", &config, &parent_output, &registry, None).await;
        assert!(execution.result.success);
        let results = execution.result.output["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn non_list_for_each_is_a_dependency_error() {
        let registry = registry_with_echo();
        let config = TaskGroupConfig::new("echo", "p.ids", json!({}));
        let parent_output = json!({"ids": "not a list"});

        let execution = execute("g", &config, &parent_output, &registry, None).await;
        assert!(!execution.result.success);
        assert_eq!(
            execution.result.error.map(|e| e.kind),
            Some(crate::result::ErrorKind::Dependency)
        );
    }

    #[tokio::test]
    async fn config_template_substitutes_item_paths() {
        let registry = registry_with_echo();
        let config = TaskGroupConfig::new("echo", "p.items", json!({"tag": "item-${item.name}"}));
        let parent_output = json!({"items": [{"name": "a"}, {"name": "b"}]});

        let execution = execute("g", &config, &parent_output, &registry, None).await;
        let results = execution.result.output["results"].as_array().unwrap();
        let tags: Vec<_> = results
            .iter()
            .map(|r| r["tag"].as_str().unwrap().to_string())
            .collect();
        assert!(tags.contains(&"item-a".to_string()));
        assert!(tags.contains(&"item-b".to_string()));
    }

    #[tokio::test]
    async fn streaming_group_consumes_chunks_until_terminal() {
        let registry = registry_with_echo();
        let config = TaskGroupConfig::new("echo", "p.urls", json!({"url": "${item}"}))
            .with_max_concurrent(3)
            .streaming();
        let yielder = Yielder::new(16);
        // Subscribe before the producer is spawned, matching the contract
        // `execute_streaming` now requires of its caller.
        let stream = yielder.subscribe();

        let producer = {
            let yielder = yielder.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    yielder.yield_chunk(json!({"urls": [format!("http://{i}")]}));
                }
                yielder.complete(ResultValue::success(json!({"urls": []})));
            })
        };

        let execution = execute_streaming("c", &config, stream, &registry, None).await;
        producer.await.unwrap();

        assert!(execution.result.success);
        let results = execution.result.output["results"].as_array().unwrap();
        assert_eq!(results.len(), 5);
    }
}
