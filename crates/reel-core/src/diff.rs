//! Structural diff between value trees
//!
//! Diffs are lists of JSON-Pointer addressed operations. Arrays are compared
//! position by position: a permutation shows up as per-index replacements,
//! never as moves.

use crate::{Error, Result, Value};
use serde::{Deserialize, Serialize};

/// A single path-addressed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    /// Insert a new object key or array element
    Add { path: String, value: Value },
    /// Overwrite an existing location
    Replace { path: String, value: Value },
    /// Delete an existing location
    Remove { path: String },
}

impl DiffOp {
    /// The JSON Pointer this operation targets
    pub fn path(&self) -> &str {
        match self {
            DiffOp::Add { path, .. } | DiffOp::Replace { path, .. } | DiffOp::Remove { path } => {
                path
            }
        }
    }

    /// The value carried by `Add` and `Replace`
    pub fn value(&self) -> Option<&Value> {
        match self {
            DiffOp::Add { value, .. } | DiffOp::Replace { value, .. } => Some(value),
            DiffOp::Remove { .. } => None,
        }
    }
}

/// Escape a single pointer token (`~` becomes `~0`, `/` becomes `~1`)
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Reverse [`escape_token`]
pub fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn child_path(parent: &str, token: &str) -> String {
    format!("{}/{}", parent, escape_token(token))
}

/// Compute the operations that turn `old` into `new`
pub fn diff(old: &Value, new: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_at(old, new, "", &mut ops);
    ops
}

fn diff_at(old: &Value, new: &Value, path: &str, ops: &mut Vec<DiffOp>) {
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (key, old_child) in before {
                let child = child_path(path, key);
                match after.get(key) {
                    Some(new_child) => diff_at(old_child, new_child, &child, ops),
                    None => ops.push(DiffOp::Remove { path: child }),
                }
            }
            for (key, new_child) in after {
                if !before.contains_key(key) {
                    ops.push(DiffOp::Add {
                        path: child_path(path, key),
                        value: new_child.clone(),
                    });
                }
            }
        }
        (Value::Array(before), Value::Array(after)) => {
            let shared = before.len().min(after.len());
            for (index, (old_item, new_item)) in before.iter().zip(after).enumerate() {
                diff_at(old_item, new_item, &format!("{}/{}", path, index), ops);
            }
            for (index, item) in after.iter().enumerate().skip(shared) {
                ops.push(DiffOp::Add {
                    path: format!("{}/{}", path, index),
                    value: item.clone(),
                });
            }
            // Highest index first so the ops apply sequentially
            for index in (shared..before.len()).rev() {
                ops.push(DiffOp::Remove {
                    path: format!("{}/{}", path, index),
                });
            }
        }
        _ if scalar_eq(old, new) => {}
        _ => ops.push(DiffOp::Replace {
            path: path.to_string(),
            value: new.clone(),
        }),
    }
}

// Bitwise for floats: NaN equals itself and a sign flip on zero is a change
fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

/// Apply operations in order to `target`
pub fn apply(target: &mut Value, ops: &[DiffOp]) -> Result<()> {
    for op in ops {
        apply_one(target, op)?;
    }
    Ok(())
}

fn parse_pointer(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(Error::InvalidPointer(path.to_string()));
    };
    Ok(rest.split('/').map(unescape_token).collect())
}

fn parse_index(token: &str, path: &str) -> Result<usize> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPointer(path.to_string()));
    }
    token
        .parse()
        .map_err(|_| Error::InvalidPointer(path.to_string()))
}

fn apply_one(target: &mut Value, op: &DiffOp) -> Result<()> {
    let path = op.path();
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        return match op {
            DiffOp::Add { value, .. } | DiffOp::Replace { value, .. } => {
                *target = value.clone();
                Ok(())
            }
            DiffOp::Remove { .. } => Err(Error::InvalidPointer(path.to_string())),
        };
    };

    let mut parent = target;
    for token in parents {
        parent = match parent {
            Value::Object(map) => map
                .get_mut(token.as_str())
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?,
            Value::Array(items) => {
                let index = parse_index(token, path)?;
                let len = items.len();
                items.get_mut(index).ok_or(Error::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len,
                })?
            }
            other => {
                return Err(Error::TypeMismatch {
                    path: path.to_string(),
                    expected: "object or array",
                    got: other.type_name(),
                })
            }
        };
    }

    match parent {
        Value::Object(map) => match op {
            DiffOp::Add { value, .. } => {
                map.insert(last.clone(), value.clone());
            }
            DiffOp::Replace { value, .. } => match map.get_mut(last.as_str()) {
                Some(slot) => *slot = value.clone(),
                None => return Err(Error::PathNotFound(path.to_string())),
            },
            DiffOp::Remove { .. } => {
                if map.shift_remove(last.as_str()).is_none() {
                    return Err(Error::PathNotFound(path.to_string()));
                }
            }
        },
        Value::Array(items) => {
            let len = items.len();
            let index = if last == "-" && matches!(op, DiffOp::Add { .. }) {
                len
            } else {
                parse_index(last, path)?
            };
            let out_of_bounds = Error::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len,
            };
            match op {
                DiffOp::Add { value, .. } if index <= len => items.insert(index, value.clone()),
                DiffOp::Replace { value, .. } if index < len => items[index] = value.clone(),
                DiffOp::Remove { .. } if index < len => {
                    items.remove(index);
                }
                _ => return Err(out_of_bounds),
            }
        }
        other => {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: "object or array",
                got: other.type_name(),
            })
        }
    }
    Ok(())
}
