//! Value helpers shared by the matcher, expressions and stages

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Sort rank of a value's type: null < numbers < strings < objects < arrays < booleans
pub fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total ordering over JSON values. Numbers compare numerically regardless of
/// integer/float representation.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare_values(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let ord = kx.cmp(ky).then_with(|| compare_values(vx, vy));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Truthiness as used by `$cond`, `$and`, `$or`, `$not` and `$expr`
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}

/// Look up a dotted path. Arrays are indexed by numeric segments; any other
/// segment applied to an array collects that field from each element.
pub fn get_path(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    lookup(doc, &segments)
}

fn lookup(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => lookup(map.get(*head)?, rest),
        Value::Array(items) => match head.parse::<usize>() {
            Ok(idx) => lookup(items.get(idx)?, rest),
            Err(_) => Some(Value::Array(
                items
                    .iter()
                    .filter(|item| item.is_object())
                    .filter_map(|item| lookup(item, segments))
                    .collect(),
            )),
        },
        _ => None,
    }
}

/// Set a dotted path, creating intermediate objects as needed
pub fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                set_path(child, rest, value);
            }
        }
    }
}

/// Remove a dotted path if present
pub fn remove_path(doc: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

/// Numeric result: integral values inside the i64 range stay integers
/// only when every input was an integer
pub fn number(f: f64, integral_inputs: bool) -> Value {
    if integral_inputs && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Stable key for grouping; integral floats collapse onto integers
pub fn group_key(v: &Value) -> String {
    fn canonical(v: &Value) -> Value {
        match v {
            Value::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Value::from(f as i64)
                }
                _ => v.clone(),
            },
            Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
            Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), canonical(v))).collect(),
            ),
            _ => v.clone(),
        }
    }
    canonical(v).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_order() {
        let mut values = vec![json!(true), json!([1]), json!({"a": 1}), json!("x"), json!(3), Value::Null];
        values.sort_by(compare_values);
        assert_eq!(
            values,
            vec![Value::Null, json!(3), json!("x"), json!({"a": 1}), json!([1]), json!(true)]
        );
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        assert!(values_equal(&json!(2), &json!(2.0)));
        assert_eq!(compare_values(&json!(1.5), &json!(2)), Ordering::Less);
    }

    #[test]
    fn test_get_path_through_arrays() {
        let doc = json!({"a": {"b": 5}, "items": [{"k": 1}, {"k": 2}]});
        assert_eq!(get_path(&doc, "a.b"), Some(json!(5)));
        assert_eq!(get_path(&doc, "items.k"), Some(json!([1, 2])));
        assert_eq!(get_path(&doc, "items.1.k"), Some(json!(2)));
        assert_eq!(get_path(&doc, "a.missing"), None);
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut doc = Map::new();
        set_path(&mut doc, "x.y", json!(1));
        assert_eq!(Value::Object(doc.clone()), json!({"x": {"y": 1}}));
        remove_path(&mut doc, "x.y");
        assert_eq!(Value::Object(doc), json!({"x": {}}));
    }

    #[test]
    fn test_group_key_collapses_integral_floats() {
        assert_eq!(group_key(&json!(2020.0)), group_key(&json!(2020)));
        assert_ne!(group_key(&json!("2020")), group_key(&json!(2020)));
    }
}
