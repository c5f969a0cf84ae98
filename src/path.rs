//! The dotted-path DSL used to read upstream task outputs: `prev`, `prevN`,
//! `task.key.sub`, with an `[N]` array-index suffix on any segment.

use serde_json::Value as Json;
use snafu::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "path '{path}' requests prev{n} but only {available} prior task(s) are known"
    ))]
    NotEnoughPrevious {
        path: String,
        n: usize,
        available: usize,
    },

    #[snafu(display("path '{path}' references unknown task '{name}'"))]
    UnknownTask { path: String, name: String },

    #[snafu(display("path '{path}' not found: segment '{segment}' is missing or not an object"))]
    SegmentNotFound { path: String, segment: String },

    #[snafu(display("path '{path}' not found: segment '{segment}' is not an array"))]
    NotAnArray { path: String, segment: String },

    #[snafu(display("path '{path}' not found: index {index} out of bounds at '{segment}'"))]
    IndexOutOfBounds {
        path: String,
        segment: String,
        index: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Resolve a dotted path against a completed task's dependency outputs.
///
/// `outputs` maps task name to its published output map; `order` is the
/// dependency resolution order used to satisfy `prev`/`prevN`.
pub fn resolve(path: &str, outputs: &HashMap<String, Json>, order: &[String]) -> Result<Json> {
    let raw_segments: Vec<&str> = path.split('.').collect();
    let (first_key, first_index) = split_array_index(raw_segments[0]);

    let root_name = if is_prev_segment(first_key) {
        let n = prev_steps(first_key);
        ensure!(
            n <= order.len(),
            NotEnoughPreviousSnafu {
                path: path.to_string(),
                n,
                available: order.len(),
            }
        );
        order[order.len() - n].clone()
    } else {
        first_key.to_string()
    };

    let mut current = outputs
        .get(&root_name)
        .cloned()
        .with_context(|| UnknownTaskSnafu {
            path: path.to_string(),
            name: root_name.clone(),
        })?;

    if let Some(idx) = first_index {
        current = index_into(&current, idx, path, raw_segments[0])?;
    }

    for raw in &raw_segments[1..] {
        let (key, index) = split_array_index(raw);
        current = field_into(&current, key, path, raw)?;
        if let Some(idx) = index {
            current = index_into(&current, idx, path, raw)?;
        }
    }

    Ok(current)
}

/// Resolve a path and require the result to be a JSON array, the way
/// `for_each` evaluation and streaming item extraction do.
pub fn resolve_list(
    path: &str,
    outputs: &HashMap<String, Json>,
    order: &[String],
) -> Result<Vec<Json>> {
    let value = resolve(path, outputs, order)?;
    match value {
        Json::Array(items) => Ok(items),
        _ => Err(Error::NotAnArray {
            path: path.to_string(),
            segment: path.to_string(),
        }),
    }
}

fn is_prev_segment(key: &str) -> bool {
    key.strip_prefix("prev")
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
}

fn prev_steps(key: &str) -> usize {
    let digits = key.strip_prefix("prev").unwrap_or("");
    if digits.is_empty() {
        1
    } else {
        digits.parse().unwrap_or(1)
    }
}

/// Split `name[2]` into `("name", Some(2))`; segments with no `[...]`
/// suffix pass through unchanged.
fn split_array_index(segment: &str) -> (&str, Option<usize>) {
    if let Some(start) = segment.find('[') {
        if let Some(rest) = segment.strip_suffix(']') {
            if let Ok(idx) = rest[start + 1..].parse::<usize>() {
                return (&segment[..start], Some(idx));
            }
        }
    }
    (segment, None)
}

fn field_into(current: &Json, key: &str, path: &str, segment: &str) -> Result<Json> {
    current
        .as_object()
        .and_then(|obj| obj.get(key))
        .cloned()
        .with_context(|| SegmentNotFoundSnafu {
            path: path.to_string(),
            segment: segment.to_string(),
        })
}

fn index_into(current: &Json, idx: usize, path: &str, segment: &str) -> Result<Json> {
    let array = current.as_array().with_context(|| NotAnArraySnafu {
        path: path.to_string(),
        segment: segment.to_string(),
    })?;
    array.get(idx).cloned().with_context(|| {
        IndexOutOfBoundsSnafu {
            path: path.to_string(),
            segment: segment.to_string(),
            index: idx,
        }
    })
}

/// Replace every `${...}` token in `template` with the JSON-stringified
/// result of resolving the inner path against `outputs`/`order`. Tokens
/// that fail to resolve are left in place, mirroring the original's
/// best-effort textual substitution.
#[must_use]
pub fn substitute(template: &str, outputs: &HashMap<String, Json>, order: &[String]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut i = 0;
    while i < template.len() {
        if template[i..].starts_with("${") {
            if let Some(rel_end) = template[i + 2..].find('}') {
                let inner = &template[i + 2..i + 2 + rel_end];
                match resolve(inner, outputs, order) {
                    Ok(value) => result.push_str(&crate::value::stringify(&value)),
                    Err(_) => result.push_str(&template[i..i + 3 + rel_end]),
                }
                i += 3 + rel_end;
                continue;
            }
        }
        let ch = template[i..].chars().next().expect("i < len");
        result.push(ch);
        i += ch.len_utf8();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> (HashMap<String, Json>, Vec<String>) {
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), json!({"v": 1, "items": [10, 20, 30]}));
        outputs.insert("b".to_string(), json!({"v": 2, "nested": {"x": 5}}));
        (outputs, vec!["a".to_string(), "b".to_string()])
    }

    #[test]
    fn resolves_direct_task_path() {
        let (outputs, order) = outputs();
        assert_eq!(resolve("a.v", &outputs, &order).unwrap(), json!(1));
    }

    #[test]
    fn resolves_prev_shorthand_to_whole_map() {
        let (outputs, order) = outputs();
        assert_eq!(resolve("prev", &outputs, &order).unwrap(), outputs["b"]);
    }

    #[test]
    fn resolves_prev_n_with_remainder() {
        let (outputs, order) = outputs();
        assert_eq!(resolve("prev2.v", &outputs, &order).unwrap(), json!(1));
    }

    #[test]
    fn resolves_nested_dotted_path() {
        let (outputs, order) = outputs();
        assert_eq!(resolve("b.nested.x", &outputs, &order).unwrap(), json!(5));
    }

    #[test]
    fn resolves_array_index_suffix() {
        let (outputs, order) = outputs();
        assert_eq!(resolve("a.items[1]", &outputs, &order).unwrap(), json!(20));
    }

    #[test]
    fn prev_n_beyond_history_is_an_error() {
        let (outputs, order) = outputs();
        assert!(resolve("prev5", &outputs, &order).is_err());
    }

    #[test]
    fn unknown_task_is_an_error() {
        let (outputs, order) = outputs();
        assert!(resolve("nope.v", &outputs, &order).is_err());
    }

    #[test]
    fn substitutes_tokens_with_stringified_values() {
        let (outputs, order) = outputs();
        let rendered = substitute("value=${a.v} nested=${b.nested.x}", &outputs, &order);
        assert_eq!(rendered, "value=1 nested=5");
    }

    #[test]
    fn is_pure_and_repeatable() {
        let (outputs, order) = outputs();
        let once = resolve("b.nested.x", &outputs, &order).unwrap();
        let twice = resolve("b.nested.x", &outputs, &order).unwrap();
        assert_eq!(once, twice);
    }
}
