//! The condition language tasks use to opt out of execution: a structured
//! `{path, operator, value}` form and a string `"left op right"` form.

use crate::path;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Structured {
        path: String,
        operator: Operator,
        value: Json,
    },
    Expr(String),
}

/// Evaluate a condition against a task's populated dependency outputs.
/// A missing path, or a string expression that fails to parse, evaluates
/// to `false` rather than erroring — the condition language never blocks
/// scheduling, it only decides whether to run.
#[must_use]
pub fn evaluate(condition: &Condition, outputs: &HashMap<String, Json>, order: &[String]) -> bool {
    match condition {
        Condition::Structured {
            path,
            operator,
            value,
        } => match path::resolve(path, outputs, order) {
            Ok(actual) => compare(&actual, *operator, value),
            Err(_) => false,
        },
        Condition::Expr(expr) => evaluate_expr(expr, outputs, order),
    }
}

fn evaluate_expr(expr: &str, outputs: &HashMap<String, Json>, order: &[String]) -> bool {
    let substituted = substitute_json_encoded(expr, outputs, order);
    let parts: Vec<&str> = substituted.split_whitespace().collect();
    let [left_tok, op_tok, right_tok] = parts.as_slice() else {
        return false;
    };

    let (Ok(left), Ok(right)) = (
        serde_json::from_str::<Json>(left_tok),
        serde_json::from_str::<Json>(right_tok),
    ) else {
        return false;
    };

    let Some(operator) = string_operator(op_tok) else {
        return false;
    };

    compare(&left, operator, &right)
}

/// Replace every `${...}` token in `expr` with the JSON-encoded result of
/// resolving it, so a string token round-trips through `serde_json::from_str`
/// the same way a literal would — `"ready"` rather than bare `ready`, which
/// `path::substitute`'s bare-string rendering can't give us since that one
/// is shared with config templating, where the bare form is what's wanted.
fn substitute_json_encoded(expr: &str, outputs: &HashMap<String, Json>, order: &[String]) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut i = 0;
    while i < expr.len() {
        if expr[i..].starts_with("${") {
            if let Some(rel_end) = expr[i + 2..].find('}') {
                let inner = &expr[i + 2..i + 2 + rel_end];
                match path::resolve(inner, outputs, order) {
                    Ok(value) => result.push_str(&serde_json::to_string(&value).unwrap_or_default()),
                    Err(_) => result.push_str(&expr[i..i + 3 + rel_end]),
                }
                i += 3 + rel_end;
                continue;
            }
        }
        let ch = expr[i..].chars().next().expect("i < len");
        result.push(ch);
        i += ch.len_utf8();
    }
    result
}

fn string_operator(token: &str) -> Option<Operator> {
    match token {
        ">" => Some(Operator::Gt),
        ">=" => Some(Operator::Gte),
        "<" => Some(Operator::Lt),
        "<=" => Some(Operator::Lte),
        "==" => Some(Operator::Eq),
        "!=" => Some(Operator::Ne),
        _ => None,
    }
}

fn compare(actual: &Json, operator: Operator, expected: &Json) -> bool {
    match operator {
        Operator::Eq => actual == expected,
        Operator::Ne => actual != expected,
        Operator::Gt => ordering(actual, expected).is_some_and(std::cmp::Ordering::is_gt),
        Operator::Gte => ordering(actual, expected).is_some_and(std::cmp::Ordering::is_ge),
        Operator::Lt => ordering(actual, expected).is_some_and(std::cmp::Ordering::is_lt),
        Operator::Lte => ordering(actual, expected).is_some_and(std::cmp::Ordering::is_le),
        Operator::In => expected.as_array().is_some_and(|arr| arr.contains(actual)),
        Operator::NotIn => expected.as_array().is_some_and(|arr| !arr.contains(actual)),
    }
}

fn ordering(a: &Json, b: &Json) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
