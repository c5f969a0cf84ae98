//! The scheduler: builds the dependency graph, validates it at construction
//! time, and drives the wave-based execution loop from spec.md §4.5–4.6.
//! Grounded in the original's `Workflow` (`examples/original_source/omniTask/core/workflow.py`)
//! for the run loop and streaming-producer coupling, and in the teacher's
//! `durableengine::graph::build_graph` / `DurableEngine::validate_workflow_graph`
//! (`examples/arminhammer-jackdaw/src/durableengine/graph.rs`) for the
//! petgraph-based construction-time validation.

use crate::cache::Cache;
use crate::group::{self, TaskGroupConfig};
use crate::registry::Registry;
use crate::result::{ResultValue, TaskStatus};
use crate::task::{self, TaskHandler, TaskSpec};
use crate::yielder::{Yielder, YielderStream};
use petgraph::graph::DiGraph;
use serde_json::Value as Json;
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("task '{name}' is already defined in this workflow"))]
    DuplicateName { name: String },

    #[snafu(display("task '{name}' depends on unknown task '{dependency}'"))]
    UnknownDependency { name: String, dependency: String },

    #[snafu(display("task '{name}' depends on itself"))]
    SelfDependency { name: String },

    #[snafu(display("dependency graph contains a cycle"))]
    Cycle,

    #[snafu(display(
        "streaming task group '{group}' consumes producer '{producer}', which itself \
         depends on streaming producer '{upstream}' — collect it with a regular task first"
    ))]
    StreamingProducerChain {
        group: String,
        producer: String,
        upstream: String,
    },

    #[snafu(display("workflow has already been run"))]
    AlreadyRun,

    #[snafu(display("registry error materializing task group: {source}"))]
    Registry { source: crate::registry::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

struct TaskEntry {
    spec: TaskSpec,
    handler: Arc<dyn TaskHandler>,
}

/// A workflow under construction: tasks and groups keyed by name, with
/// cache wiring available to every node per spec.md §4.2's workflow-level
/// cache convenience methods. Holds its own [`Registry`] so every
/// [`TaskGroup`](crate::group) fanned out at run time can materialize
/// children without threading a registry reference through `run`.
pub struct Workflow {
    tasks: HashMap<String, TaskEntry>,
    groups: HashMap<String, TaskGroupConfig>,
    insertion_order: Vec<String>,
    registry: Registry,
    cache: Option<Arc<dyn Cache>>,
    ran: bool,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("ran", &self.ran)
            .finish()
    }
}

impl Workflow {
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            tasks: HashMap::new(),
            groups: HashMap::new(),
            insertion_order: Vec::new(),
            registry,
            cache: None,
            ran: false,
        }
    }

    /// Materialize a task from the workflow's registry and add it under
    /// `spec`'s name. `spec.dependencies` must name tasks or groups already
    /// (or not yet — dependency existence is checked at `run`) present.
    pub fn create_task(&mut self, task_type: &str, spec: TaskSpec) -> Result<()> {
        if self.tasks.contains_key(&spec.name) || self.groups.contains_key(&spec.name) {
            return DuplicateNameSnafu { name: spec.name }.fail();
        }
        let registered = self
            .registry
            .create_task(task_type, &spec.name, spec.config.clone())
            .context(RegistrySnafu)?;
        let name = spec.name.clone();
        self.insertion_order.push(name.clone());
        self.tasks.insert(
            name,
            TaskEntry {
                spec,
                handler: registered.handler,
            },
        );
        Ok(())
    }

    /// Register a task whose handler is already constructed, bypassing the
    /// registry — the path used internally and available for embedding an
    /// ad hoc handler without naming a registry type.
    pub fn add_task(&mut self, spec: TaskSpec, handler: Arc<dyn TaskHandler>) -> Result<()> {
        if self.tasks.contains_key(&spec.name) || self.groups.contains_key(&spec.name) {
            return DuplicateNameSnafu { name: spec.name }.fail();
        }
        let name = spec.name.clone();
        self.insertion_order.push(name.clone());
        self.tasks.insert(name, TaskEntry { spec, handler });
        Ok(())
    }

    /// Add a dynamic fan-out group under `group_name`, scheduled once its
    /// `for_each` parent task completes (or, for a streaming group,
    /// alongside it — see [`run`](Self::run)).
    pub fn add_task_group(&mut self, group_name: impl Into<String>, config: TaskGroupConfig) -> Result<()> {
        let group_name = group_name.into();
        if self.tasks.contains_key(&group_name) || self.groups.contains_key(&group_name) {
            return DuplicateNameSnafu { name: group_name }.fail();
        }
        self.insertion_order.push(group_name.clone());
        self.groups.insert(group_name, config);
        Ok(())
    }

    pub fn set_cache(&mut self, cache: Arc<dyn Cache>) {
        self.cache = Some(cache);
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.cache = None;
        }
    }

    /// Install the in-memory backend with sensible defaults, the
    /// convenience the original exposes as `enable_memory_cache`.
    pub fn enable_memory_cache(&mut self, max_size: usize, default_ttl_seconds: Option<i64>) {
        self.cache = Some(Arc::new(crate::providers::cache::mem::MemoryCache::new(
            max_size,
            default_ttl_seconds,
        )));
    }

    pub async fn clear_cache(&self) -> crate::cache::Result<()> {
        match &self.cache {
            Some(cache) => cache.clear().await,
            None => Ok(()),
        }
    }

    pub async fn cache_stats(&self) -> Option<crate::cache::Result<crate::cache::CacheStats>> {
        let cache = self.cache.as_ref()?;
        Some(cache.stats().await)
    }

    pub async fn cleanup_expired_cache(&self) -> Option<crate::cache::Result<usize>> {
        let cache = self.cache.as_ref()?;
        Some(cache.cleanup_expired().await)
    }

    fn all_names(&self) -> impl Iterator<Item = &String> {
        self.tasks.keys().chain(self.groups.keys())
    }

    fn dependencies_of(&self, name: &str) -> Vec<String> {
        if let Some(entry) = self.tasks.get(name) {
            entry.spec.dependencies.clone()
        } else if let Some(group) = self.groups.get(name) {
            vec![group.parent_name().to_string()]
        } else {
            Vec::new()
        }
    }

    /// Producers: task names with at least one streaming group rooted at
    /// them. Computed once and reused for both validation and scheduling.
    fn streaming_producers(&self) -> HashSet<String> {
        self.groups
            .values()
            .filter(|g| g.streaming_enabled)
            .map(|g| g.parent_name().to_string())
            .collect()
    }

    /// Construction-time validation per spec.md §4.5: unknown dependency
    /// names, self-dependencies, cycles, and a streaming producer that
    /// itself depends on another streaming producer all abort before
    /// `run` is ever entered.
    fn validate(&self) -> Result<()> {
        let known: HashSet<&str> = self.all_names().map(String::as_str).collect();

        for name in self.all_names() {
            for dep in self.dependencies_of(name) {
                if dep == *name {
                    return SelfDependencySnafu { name: name.clone() }.fail();
                }
                if !known.contains(dep.as_str()) {
                    return UnknownDependencySnafu {
                        name: name.clone(),
                        dependency: dep,
                    }
                    .fail();
                }
            }
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for name in self.all_names() {
            indices.insert(name.as_str(), graph.add_node(name.as_str()));
        }
        for name in self.all_names() {
            let dst = indices[name.as_str()];
            for dep in self.dependencies_of(name) {
                let src = indices[dep.as_str()];
                graph.add_edge(src, dst, ());
            }
        }
        if petgraph::algo::toposort(&graph, None).is_err() {
            return CycleSnafu.fail();
        }

        let producers = self.streaming_producers();
        for group in self.groups.values().filter(|g| g.streaming_enabled) {
            let producer = group.parent_name();
            if let Some(entry) = self.tasks.get(producer) {
                for dep in &entry.spec.dependencies {
                    if producers.contains(dep) {
                        return StreamingProducerChainSnafu {
                            group: group.for_each.clone(),
                            producer: producer.to_string(),
                            upstream: dep.clone(),
                        }
                        .fail();
                    }
                }
            }
        }

        Ok(())
    }

    /// Run every task and group to completion, per spec.md §4.5's
    /// wave-based scheduler: each iteration launches everything whose
    /// dependencies are now satisfied, streaming producers launch
    /// concurrently with their dependent streaming groups rather than
    /// waiting for a following wave, and the first unsuccessful result in
    /// a wave stops further waves from launching (in-flight work in the
    /// current wave still runs to completion). May be called at most once.
    pub async fn run(&mut self) -> Result<HashMap<String, ResultValue>> {
        if self.ran {
            return AlreadyRunSnafu.fail();
        }
        self.validate()?;
        self.ran = true;

        let producers = self.streaming_producers();
        let mut completed: HashSet<String> = HashSet::new();
        let mut outputs: HashMap<String, Json> = HashMap::new();
        let mut results: HashMap<String, ResultValue> = HashMap::new();
        let mut aborted = false;

        loop {
            if aborted {
                break;
            }

            let ready: Vec<String> = self
                .all_names()
                .filter(|name| {
                    !completed.contains(name.as_str())
                        && self
                            .dependencies_of(name)
                            .iter()
                            .all(|d| completed.contains(d))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                break;
            }

            let ready_tasks: Vec<String> = ready
                .iter()
                .filter(|n| self.tasks.contains_key(n.as_str()))
                .cloned()
                .collect();
            let ready_groups: HashSet<String> = ready
                .iter()
                .filter(|n| self.groups.contains_key(n.as_str()))
                .cloned()
                .collect();

            let (regular_tasks, streaming_producers_ready): (Vec<String>, Vec<String>) =
                ready_tasks.into_iter().partition(|n| !producers.contains(n));

            // Regular, non-streaming-producer tasks: launch concurrently.
            let mut joins: JoinSet<(String, ResultValue)> = JoinSet::new();
            for name in &regular_tasks {
                let entry = &self.tasks[name];
                let spec = entry.spec.clone();
                let handler = Arc::clone(&entry.handler);
                let cache = self.cache.clone();
                let dep_outputs: HashMap<String, Json> = spec
                    .dependencies
                    .iter()
                    .filter_map(|d| outputs.get(d).map(|v| (d.clone(), v.clone())))
                    .collect();
                let dep_order = spec.dependencies.clone();
                joins.spawn(async move {
                    let outcome = task::execute_with_timeout(
                        &spec,
                        handler.as_ref(),
                        &dep_outputs,
                        &dep_order,
                        cache,
                        None,
                    )
                    .await;
                    (spec.name, outcome.result)
                });
            }

            let mut wave_failed = false;
            while let Some(outcome) = joins.join_next().await {
                let (name, result) = match outcome {
                    Ok(v) => v,
                    Err(join_error) => {
                        tracing::error!(%join_error, "task panicked");
                        continue;
                    }
                };
                if result.success {
                    outputs.insert(name.clone(), result.output.clone());
                } else {
                    wave_failed = true;
                }
                completed.insert(name.clone());
                results.insert(name, result);
            }

            // Streaming producers, launched concurrently with every
            // streaming group rooted at them — the coupling from spec.md §4.6.
            for producer_name in &streaming_producers_ready {
                let dependent_groups: Vec<String> = self
                    .groups
                    .iter()
                    .filter(|(_, g)| g.streaming_enabled && g.parent_name() == producer_name)
                    .map(|(name, _)| name.clone())
                    .collect();

                let yielder = Yielder::new(64);

                // Every dependent group subscribes before the producer is
                // spawned. A broadcast receiver only observes items sent
                // after it subscribes, so subscribing here — ahead of the
                // producer task even starting to run — is what guarantees
                // no chunk is lost to the race between producer and
                // consumer startup.
                let group_streams: Vec<(String, YielderStream)> = dependent_groups
                    .iter()
                    .map(|name| (name.clone(), yielder.subscribe()))
                    .collect();

                let entry = &self.tasks[producer_name];
                let spec = entry.spec.clone();
                let handler = Arc::clone(&entry.handler);
                let cache = self.cache.clone();
                let dep_outputs: HashMap<String, Json> = spec
                    .dependencies
                    .iter()
                    .filter_map(|d| outputs.get(d).map(|v| (d.clone(), v.clone())))
                    .collect();
                let dep_order = spec.dependencies.clone();

                let mut bundle: JoinSet<(String, ResultValue)> = JoinSet::new();
                for (group_name, stream) in group_streams {
                    let config = self.groups[&group_name].clone();
                    let cache = self.cache.clone();
                    let group_registry = self.registry.clone();
                    bundle.spawn(async move {
                        let execution = group::execute_streaming(
                            &group_name,
                            &config,
                            stream,
                            &group_registry,
                            cache,
                        )
                        .await;
                        if !execution.failures.is_empty() {
                            tracing::warn!(
                                group = %group_name,
                                failed_children = execution.failures.len(),
                                "streaming group children failed"
                            );
                        }
                        (group_name, execution.result)
                    });
                }
                {
                    let yielder = yielder.clone();
                    bundle.spawn(async move {
                        let outcome = task::execute_with_timeout(
                            &spec,
                            handler.as_ref(),
                            &dep_outputs,
                            &dep_order,
                            cache,
                            Some(&yielder),
                        )
                        .await;
                        (spec.name, outcome.result)
                    });
                }

                while let Some(outcome) = bundle.join_next().await {
                    let (name, result) = match outcome {
                        Ok(v) => v,
                        Err(join_error) => {
                            tracing::error!(%join_error, "streaming task/group panicked");
                            continue;
                        }
                    };
                    if result.success {
                        outputs.insert(name.clone(), result.output.clone());
                    } else {
                        wave_failed = true;
                    }
                    completed.insert(name.clone());
                    results.insert(name, result);
                }
            }

            // Non-streaming groups ready now that their parent has just
            // completed in this same wave.
            let mut group_joins: JoinSet<(String, ResultValue)> = JoinSet::new();
            for group_name in &ready_groups {
                let config = self.groups[group_name].clone();
                if config.streaming_enabled {
                    continue;
                }
                let Some(parent_output) = outputs.get(config.parent_name()).cloned() else {
                    // Parent completed without a success (or never published
                    // an output) — the group can't resolve its for_each path.
                    completed.insert(group_name.clone());
                    let result = ResultValue::failure(crate::result::TaskError::dependency(
                        format!("parent '{}' produced no output", config.parent_name()),
                    ));
                    wave_failed = true;
                    results.insert(group_name.clone(), result);
                    continue;
                };
                let cache = self.cache.clone();
                let group_name = group_name.clone();
                let group_registry = self.registry.clone();
                group_joins.spawn(async move {
                    let execution =
                        group::execute(&group_name, &config, &parent_output, &group_registry, cache)
                            .await;
                    if !execution.failures.is_empty() {
                        tracing::warn!(
                            group = %group_name,
                            failed_children = execution.failures.len(),
                            "group children failed"
                        );
                    }
                    (group_name, execution.result)
                });
            }
            while let Some(outcome) = group_joins.join_next().await {
                let (name, result) = match outcome {
                    Ok(v) => v,
                    Err(join_error) => {
                        tracing::error!(%join_error, "group panicked");
                        continue;
                    }
                };
                if result.success {
                    outputs.insert(name.clone(), result.output.clone());
                } else {
                    wave_failed = true;
                }
                completed.insert(name.clone());
                results.insert(name, result);
            }

            if wave_failed {
                aborted = true;
            }
        }

        Ok(results)
    }
}
