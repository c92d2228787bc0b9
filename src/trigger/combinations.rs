//! Deterministic enumeration of attribute combinations from a trigger payload.

use std::collections::BTreeMap;

use serde_json::Value;

/// One assignment of a value to every payload attribute.
pub type Combination = BTreeMap<String, Value>;

/// Flatten `payload` into attributes and enumerate their cartesian product.
///
/// Nested objects contribute dotted keys (`style.colour`). A scalar is an
/// attribute with one value and an array of scalars is an attribute with one
/// value per element. Arrays containing objects or arrays, empty arrays and
/// nulls contribute nothing. Keys are visited in sorted order and the last key
/// varies fastest, so the output is stable for a given payload. At most `max`
/// combinations are produced.
pub fn enumerate(payload: &Value, max: usize) -> Vec<Combination> {
    let mut dimensions = Vec::new();
    if let Value::Object(map) = payload {
        flatten(map, "", &mut dimensions);
    }
    if dimensions.is_empty() || max == 0 {
        return Vec::new();
    }

    let mut combinations = Vec::new();
    let mut cursor = vec![0usize; dimensions.len()];
    loop {
        combinations.push(
            dimensions
                .iter()
                .zip(&cursor)
                .map(|((key, values), &index)| (key.clone(), values[index].clone()))
                .collect(),
        );
        if combinations.len() >= max || !advance(&mut cursor, &dimensions) {
            return combinations;
        }
    }
}

/// Odometer step; false once every combination has been visited.
fn advance(cursor: &mut [usize], dimensions: &[(String, Vec<Value>)]) -> bool {
    for position in (0..cursor.len()).rev() {
        cursor[position] += 1;
        if cursor[position] < dimensions[position].1.len() {
            return true;
        }
        cursor[position] = 0;
    }
    false
}

fn flatten(map: &serde_json::Map<String, Value>, prefix: &str, out: &mut Vec<(String, Vec<Value>)>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match &map[key] {
            Value::Null => {}
            Value::Object(nested) => flatten(nested, &path, out),
            Value::Array(items) => {
                if !items.is_empty() && items.iter().all(is_scalar) {
                    out.push((path, items.clone()));
                }
            }
            scalar => out.push((path, vec![scalar.clone()])),
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// One-line rendering used in prompts: `colour=red, season=SS25`.
pub fn describe(combination: &Combination) -> String {
    combination
        .iter()
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}={s}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
