//! Patch-path mini-language for gap filling.
//!
//! Grammar: `path := segment ('.' segment | '[' field '=' value ']')*`.
//! A bracketed `[field=value]` token selects (or creates) the first element
//! of the list named by the preceding segment whose `field` equals `value`;
//! with no preceding segment the list name defaults to `items`. Whitespace
//! around `=` is insignificant. Application is idempotent: re-applying the
//! same `(path, value)` pairs leaves the data unchanged.

use serde_json::{Map, Value};
use thiserror::Error;

/// Scanner token: a map key or a list-element selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    Key(String),
    Select { field: String, value: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("unclosed bracket in path: {0}")]
    UnclosedBracket(String),
    #[error("empty path")]
    EmptyPath,
}

/// Scans a path into tokens.
pub fn parse_path(path: &str) -> Result<Vec<PathToken>, PatchError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = path.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                if !current.is_empty() {
                    tokens.push(PathToken::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    tokens.push(PathToken::Key(std::mem::take(&mut current)));
                }
                let mut j = i + 1;
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(PatchError::UnclosedBracket(path.to_string()));
                }
                let spec: String = chars[i + 1..j].iter().collect();
                match spec.split_once('=') {
                    Some((field, value)) => tokens.push(PathToken::Select {
                        field: field.trim().to_string(),
                        value: value.trim().to_string(),
                    }),
                    None => tokens.push(PathToken::Select {
                        field: "index".to_string(),
                        value: spec.trim().to_string(),
                    }),
                }
                i = j;
            }
            ch => current.push(ch),
        }
        i += 1;
    }
    if !current.is_empty() {
        tokens.push(PathToken::Key(current));
    }
    if tokens.is_empty() {
        return Err(PatchError::EmptyPath);
    }
    Ok(tokens)
}

/// Traversal step after pairing selectors with their list names.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    List {
        key: String,
        field: String,
        value: String,
    },
}

fn to_steps(tokens: Vec<PathToken>) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(tok) = iter.next() {
        match tok {
            PathToken::Key(key) => {
                if let Some(PathToken::Select { .. }) = iter.peek() {
                    if let Some(PathToken::Select { field, value }) = iter.next() {
                        steps.push(Step::List { key, field, value });
                    }
                } else {
                    steps.push(Step::Field(key));
                }
            }
            // Selector with no preceding segment: the list name defaults to "items".
            PathToken::Select { field, value } => steps.push(Step::List {
                key: "items".to_string(),
                field,
                value,
            }),
        }
    }
    steps
}

fn as_object_coerce(v: &mut Value) -> &mut Map<String, Value> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    match v {
        Value::Object(m) => m,
        _ => unreachable!("coerced to object above"),
    }
}

/// Applies one `(path, value)` patch, creating intermediate maps and selected
/// list elements as needed. A terminal selector creates/finds its element but
/// assigns nothing.
pub fn apply_patch(data: &mut Value, path: &str, value: &Value) -> Result<(), PatchError> {
    let steps = to_steps(parse_path(path)?);
    let last = steps.len() - 1;
    let mut current = data;

    for (i, step) in steps.into_iter().enumerate() {
        match step {
            Step::Field(key) => {
                let obj = as_object_coerce(current);
                if i == last {
                    obj.insert(key, value.clone());
                    return Ok(());
                }
                current = obj
                    .entry(key)
                    .or_insert_with(|| Value::Object(Map::new()));
            }
            Step::List { key, field, value: sel } => {
                let obj = as_object_coerce(current);
                let entry = obj.entry(key).or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                let arr = match entry {
                    Value::Array(a) => a,
                    _ => unreachable!("coerced to array above"),
                };
                let pos = arr.iter().position(|e| {
                    e.get(&field).and_then(Value::as_str) == Some(sel.as_str())
                });
                let idx = match pos {
                    Some(p) => p,
                    None => {
                        let mut elem = Map::new();
                        elem.insert(field.clone(), Value::String(sel.clone()));
                        arr.push(Value::Object(elem));
                        arr.len() - 1
                    }
                };
                let elem = &mut arr[idx];
                if !elem.is_object() {
                    let mut m = Map::new();
                    m.insert(field.clone(), Value::String(sel.clone()));
                    *elem = Value::Object(m);
                }
                if i == last {
                    return Ok(());
                }
                current = elem;
            }
        }
    }
    Ok(())
}

/// Applies a map of patches, logging and skipping malformed paths so one bad
/// patch cannot block the rest.
pub fn apply_patches(data: &mut Value, patches: &Map<String, Value>) {
    for (path, value) in patches {
        if let Err(e) = apply_patch(data, path, value) {
            tracing::warn!(path = %path, error = %e, "skipping malformed patch path");
        }
    }
}
