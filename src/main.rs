//! Corvid's CLI: a thin demonstration binary, not a template loader (the
//! YAML/JSON workflow-file contract in spec.md §6 is a collaborator
//! contract, out of this crate's core). `corvid run` builds one of a
//! handful of built-in demo workflows in code — the engine's own test
//! scenarios S1–S6 — and drives them through [`corvid::Workflow::run`],
//! mirroring the teacher's `cmd::run` texture (clap subcommand, tracing
//! init, `console`/`indicatif`-styled output) without its template
//! loader, listeners, or visualization surface.

use clap::{Parser, ValueEnum};
use corvid::builder::WorkflowBuilder;
use corvid::config::EngineConfig;
use corvid::group::TaskGroupConfig;
use corvid::registry::Registry;
use corvid::result::ResultValue;
use corvid::task::{TaskContext, TaskHandler, TaskSpec};
use corvid::yielder::Yielder;
use corvid::{output, Workflow};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to build workflow: {source}"))]
    Builder { source: corvid::builder::Error },

    #[snafu(display("failed to register demo task type: {source}"))]
    Registry { source: corvid::registry::Error },

    #[snafu(display("failed to add task to workflow: {source}"))]
    Workflow { source: corvid::workflow::Error },

    #[snafu(display("workflow execution failed: {source}"))]
    Run { source: corvid::workflow::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
#[command(name = "corvid")]
#[command(author = "Armin Graf")]
#[command(version = "0.1.0")]
#[command(about = "A cached, graph-based concurrent task execution engine", long_about = None)]
struct Cli {
    /// Which built-in demo workflow to run.
    #[arg(value_enum, default_value_t = Scenario::LinearSuccess)]
    scenario: Scenario,

    /// Enable debug-level tracing.
    #[arg(short, long, env = "CORVID_VERBOSE")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// S1: A -> B -> C, each task's output feeding the next.
    LinearSuccess,
    /// S2: one cached task, run twice to show the second run hit.
    CacheHit,
    /// S3: a task that fails twice then succeeds on the third attempt.
    RetryThenSucceed,
    /// S4: a task whose timeout fires before it finishes sleeping.
    Timeout,
    /// S5: a producer task fanned out over by a dynamic task group.
    DynamicFanOut,
    /// S6: a streaming producer consumed by a streaming fan-out group.
    StreamingFanOut,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

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

struct Increment;

#[async_trait::async_trait]
impl TaskHandler for Increment {
    fn type_name(&self) -> &str {
        "increment"
    }

    async fn run(&self, ctx: &TaskContext) -> ResultValue {
        let prev = ctx.get_output(None).ok().and_then(|v| v["v"].as_i64());
        let base = ctx.config.get("v").and_then(serde_json::Value::as_i64);
        let v = prev.or(base).unwrap_or(0) + 1;
        ResultValue::success(serde_json::json!({ "v": v }))
    }
}

struct Multiply(i64);

#[async_trait::async_trait]
impl TaskHandler for Multiply {
    fn type_name(&self) -> &str {
        "multiply"
    }

    async fn run(&self, ctx: &TaskContext) -> ResultValue {
        let prev = ctx.get_output(None).ok().and_then(|v| v["v"].as_i64()).unwrap_or(0);
        ResultValue::success(serde_json::json!({ "v": prev * self.0 }))
    }
}

struct Sleeper(Duration);

#[async_trait::async_trait]
impl TaskHandler for Sleeper {
    fn type_name(&self) -> &str {
        "sleeper"
    }

    async fn run(&self, _ctx: &TaskContext) -> ResultValue {
        tokio::time::sleep(self.0).await;
        ResultValue::success(serde_json::json!({ "slept": true }))
    }
}

struct FailNTimes(std::sync::atomic::AtomicU32);

#[async_trait::async_trait]
impl TaskHandler for FailNTimes {
    fn type_name(&self) -> &str {
        "fail_n"
    }

    async fn run(&self, _ctx: &TaskContext) -> ResultValue {
        let remaining = self.0.fetch_update(
            std::sync::atomic::Ordering::SeqCst,
            std::sync::atomic::Ordering::SeqCst,
            |v| Some(v.saturating_sub(1)),
        );
        if remaining.unwrap_or(0) > 0 {
            ResultValue::failure(corvid::TaskError::user("not yet"))
        } else {
            ResultValue::success(serde_json::json!({ "ok": true }))
        }
    }
}

struct Producer;

#[async_trait::async_trait]
impl TaskHandler for Producer {
    fn type_name(&self) -> &str {
        "producer"
    }

    async fn run(&self, _ctx: &TaskContext) -> ResultValue {
        ResultValue::success(serde_json::json!({ "urls": [] }))
    }

    async fn run_streaming(&self, _ctx: &TaskContext, yielder: &Yielder) -> ResultValue {
        for i in 0..5 {
            yielder.yield_chunk(serde_json::json!({ "urls": [format!("http://example.invalid/{i}")] }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        ResultValue::success(serde_json::json!({ "urls": [] }))
    }
}

fn build_registry() -> std::result::Result<Registry, Error> {
    let mut registry = Registry::new();
    registry
        .register("echo", |_, _| Arc::new(Echo) as Arc<dyn TaskHandler>)
        .context(RegistrySnafu)?;
    registry
        .register("increment", |_, _| Arc::new(Increment) as Arc<dyn TaskHandler>)
        .context(RegistrySnafu)?;
    registry
        .register("multiply_10", |_, _| Arc::new(Multiply(10)) as Arc<dyn TaskHandler>)
        .context(RegistrySnafu)?;
    registry
        .register("sleeper_2s", |_, _| Arc::new(Sleeper(Duration::from_secs(2))) as Arc<dyn TaskHandler>)
        .context(RegistrySnafu)?;
    registry
        .register("fail_twice_then_succeed", |_, _| {
            Arc::new(FailNTimes(std::sync::atomic::AtomicU32::new(2))) as Arc<dyn TaskHandler>
        })
        .context(RegistrySnafu)?;
    registry
        .register("producer", |_, _| Arc::new(Producer) as Arc<dyn TaskHandler>)
        .context(RegistrySnafu)?;
    Ok(registry)
}

fn build_workflow(scenario: Scenario) -> std::result::Result<Workflow, Error> {
    let registry = build_registry()?;
    let mut workflow = WorkflowBuilder::new(registry)
        .with_memory_cache_defaults(1000, Some(60))
        .build();

    match scenario {
        Scenario::LinearSuccess => {
            workflow
                .create_task("increment", TaskSpec::new("a", "increment", serde_json::json!({ "v": 0 })))
                .context(WorkflowSnafu)?;
            workflow
                .create_task(
                    "increment",
                    TaskSpec::new("b", "increment", serde_json::json!({})).with_dependency("a"),
                )
                .context(WorkflowSnafu)?;
            workflow
                .create_task(
                    "multiply_10",
                    TaskSpec::new("c", "multiply_10", serde_json::json!({})).with_dependency("b"),
                )
                .context(WorkflowSnafu)?;
        }
        Scenario::CacheHit => {
            workflow
                .create_task(
                    "sleeper_2s",
                    TaskSpec::new("x", "sleeper_2s", serde_json::json!({})).with_cache(Some(60)),
                )
                .context(WorkflowSnafu)?;
        }
        Scenario::RetryThenSucceed => {
            workflow
                .create_task(
                    "fail_twice_then_succeed",
                    TaskSpec::new("r", "fail_twice_then_succeed", serde_json::json!({})).with_max_retry(2),
                )
                .context(WorkflowSnafu)?;
        }
        Scenario::Timeout => {
            workflow
                .create_task(
                    "sleeper_2s",
                    TaskSpec::new("t", "sleeper_2s", serde_json::json!({}))
                        .with_timeout(Duration::from_millis(500)),
                )
                .context(WorkflowSnafu)?;
        }
        Scenario::DynamicFanOut => {
            workflow
                .create_task("echo", TaskSpec::new("p", "echo", serde_json::json!({ "ids": [7, 8, 9] })))
                .context(WorkflowSnafu)?;
            workflow
                .add_task_group(
                    "g",
                    TaskGroupConfig::new("echo", "p.ids", serde_json::json!({ "n": "${item}" }))
                        .with_max_concurrent(2),
                )
                .context(WorkflowSnafu)?;
        }
        Scenario::StreamingFanOut => {
            workflow
                .create_task("producer", TaskSpec::new("s", "producer", serde_json::json!({})))
                .context(WorkflowSnafu)?;
            workflow
                .add_task_group(
                    "c",
                    TaskGroupConfig::new("echo", "s.urls", serde_json::json!({ "url": "${item}" }))
                        .with_max_concurrent(3)
                        .streaming(),
                )
                .context(WorkflowSnafu)?;
        }
    }

    Ok(workflow)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load().unwrap_or_default();
    init_tracing(cli.verbose || config.verbose);

    let instance_id = uuid::Uuid::new_v4().to_string();
    output::format_workflow_start(&format!("{:?}", cli.scenario), &instance_id);

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("static template is valid"),
    );
    spinner.set_message("running workflow...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let mut workflow = build_workflow(cli.scenario)?;
    let results = workflow.run().await.context(RunSnafu)?;
    spinner.finish_and_clear();

    let mut published = serde_json::Map::new();
    for (name, result) in &results {
        output::format_task_start(name, "");
        let skipped = result
            .output
            .get("skipped")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if skipped {
            output::format_task_skipped(name);
        } else if result.success {
            if result.cache_hit {
                output::format_cache_hit(name);
            }
            output::format_task_complete(name, result.retries, result.execution_time);
        } else if let Some(error) = &result.error {
            output::format_task_error(name, &error.to_string());
        }
        published.insert(name.clone(), result.output.clone());
    }
    output::format_workflow_output(&published);

    Ok(())
}
