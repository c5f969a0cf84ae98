//! # Corvid — a cached, graph-based concurrent task execution engine
//!
//! Corvid resolves a directed acyclic graph of named tasks, runs
//! independent tasks concurrently, passes structured outputs between tasks
//! through a dotted-path resolver, and caches successful results behind a
//! deterministic fingerprint of task identity, configuration, and
//! dependency outputs. A producer task may also stream incremental items
//! to a dynamic fan-out group while it is still running.
//!
//! ## Core modules
//!
//! - [`workflow`] — the scheduler: dependency graph construction,
//!   construction-time validation, wave-based concurrent execution.
//! - [`task`] — the per-task lifecycle: condition, cache lookup, timed
//!   attempt loop with retries, cache store.
//! - [`group`] — dynamic fan-out groups, both parent-output-driven and
//!   streaming.
//! - [`cache`] — the pluggable cache contract and its SHA-256 fingerprint;
//!   concrete backends live under [`providers::cache`].
//! - [`path`] — the `prev`/`prevN`/`task.key.sub` path DSL.
//! - [`condition`] — the structured and string condition languages.
//! - [`registry`] — task-type name to constructor map.
//! - [`yielder`] — the streaming producer's bounded broadcast FIFO.
//! - [`result`] — `TaskStatus`, `ResultValue`, and the error taxonomy.
//!
//! ## Example
//!
//! ```
//! use corvid::registry::Registry;
//! use corvid::task::{TaskContext, TaskHandler, TaskSpec};
//! use corvid::result::ResultValue;
//! use corvid::workflow::Workflow;
//! use async_trait::async_trait;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Increment;
//!
//! #[async_trait]
//! impl TaskHandler for Increment {
//!     fn type_name(&self) -> &str {
//!         "increment"
//!     }
//!
//!     async fn run(&self, ctx: &TaskContext) -> ResultValue {
//!         let v = ctx.config.get("v").and_then(serde_json::Value::as_i64).unwrap_or(0);
//!         ResultValue::success(json!({ "v": v + 1 }))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::new();
//! registry.register("increment", |_, _| Arc::new(Increment) as Arc<dyn TaskHandler>)?;
//!
//! let mut workflow = Workflow::new(registry);
//! workflow.create_task("increment", TaskSpec::new("a", "increment", json!({"v": 0})))?;
//! workflow.create_task(
//!     "increment",
//!     TaskSpec::new("b", "increment", json!({})).with_dependency("a"),
//! )?;
//!
//! let results = workflow.run().await?;
//! assert_eq!(results["a"].output, json!({"v": 1}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Corvid's CLI binary is configured via [`config::EngineConfig`]: a file
//! (`corvid.yaml`), `CORVID__`-prefixed environment variables, and CLI
//! flags, in that order of increasing precedence.

pub mod builder;
pub mod cache;
pub mod condition;
pub mod config;
pub mod group;
pub mod output;
pub mod path;
pub mod providers;
pub mod registry;
pub mod result;
pub mod task;
pub mod value;
pub mod workflow;
pub mod yielder;

pub use builder::WorkflowBuilder;
pub use registry::Registry;
pub use result::{ErrorKind, ResultValue, TaskError, TaskProgress, TaskStatus};
pub use task::{TaskContext, TaskHandler, TaskSpec};
pub use workflow::Workflow;
