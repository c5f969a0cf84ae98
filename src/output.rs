//! Pretty terminal output for workflow execution, grounded in the
//! teacher's `output.rs` formatting helpers, trimmed to the events this
//! engine actually emits (task/group lifecycle, cache hits) and
//! shorn of the teacher's script-runner-specific framing
//! (stdout/stderr/exit-code, fork branches).

use console::style;
use serde_json::Value;
use std::sync::{Arc, Mutex};

lazy_static::lazy_static! {
    /// Serializes terminal writes across concurrently running tasks in a
    /// wave so two tasks' output blocks never interleave line-by-line.
    /// Scoped strictly to CLI presentation — never engine state.
    pub static ref OUTPUT_LOCK: Arc<Mutex<()>> = Arc::new(Mutex::new(()));
}

/// Format a workflow start banner.
pub fn format_workflow_start(workflow_name: &str, instance_id: &str) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!("\n{}", "═".repeat(80));
    println!(
        "{} {} {}",
        style("▶").cyan().bold(),
        style("Workflow:").bold(),
        style(workflow_name).cyan().bold()
    );
    println!(
        "  {} {}",
        style("Instance ID:").dim(),
        style(instance_id).dim()
    );
    println!("{}", "─".repeat(80));
}

/// Format the final published outputs once `Workflow::run` returns.
pub fn format_workflow_output(results: &serde_json::Map<String, Value>) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!("\n{}", "═".repeat(80));
    println!("{}", style("Workflow Completed").green().bold());
    println!("{}", "─".repeat(80));
    if results.is_empty() {
        println!("  {}", style("(no tasks ran)").dim());
    } else {
        for (name, output) in results {
            println!("  {}", style(format!("{name}:")).bold());
            println!("{}", indent_json(output, 4));
        }
    }
    println!("{}", "═".repeat(80));
}

/// Format a task/group about to run.
pub fn format_task_start(name: &str, task_type: &str) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!(
        "\n{} {} {} {}",
        style("▸").cyan(),
        style("Task:").bold(),
        style(name).cyan(),
        style(format!("[{task_type}]")).dim()
    );
}

/// Format a cache hit on a task's fingerprint lookup.
pub fn format_cache_hit(task_name: &str) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!(
        "  {} {}",
        style("Cache hit").yellow().bold(),
        style(format!("'{task_name}'")).yellow(),
    );
}

/// Format a task/group that reached a terminal success.
pub fn format_task_complete(name: &str, retries: u32, execution_time: f64) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!(
        "  {} {} {}",
        style("✓").green(),
        style(format!("Completed '{name}'")).green(),
        style(format!("({retries} attempt(s), {execution_time:.3}s)")).dim()
    );
}

/// Format a task/group that reached a terminal failure.
pub fn format_task_error(name: &str, error: &str) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!(
        "  {} {}",
        style("✗").red().bold(),
        style(format!("Failed '{name}'")).red().bold()
    );
    println!("    {} {}", style("Error:").red(), style(error).red());
}

/// Format a task skipped by `condition_not_met`.
pub fn format_task_skipped(name: &str) {
    let _lock = OUTPUT_LOCK.lock().expect("output lock poisoned");
    println!(
        "  {} {}",
        style("⤼").yellow(),
        style(format!("Skipped '{name}' (condition not met)")).yellow()
    );
}

fn indent_json(value: &Value, indent: usize) -> String {
    let json_str = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    let indent_str = " ".repeat(indent);
    json_str
        .lines()
        .map(|line| format!("{indent_str}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
