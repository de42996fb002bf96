//! `$match` filter evaluation

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::expr::eval;
use super::value::{compare_values, get_path, is_truthy, type_rank, values_equal};
use super::{PipelineError, PipelineResult};

/// Check whether `doc` satisfies a query filter document
pub fn matches(doc: &Value, filter: &Value) -> PipelineResult<bool> {
    let filter = filter
        .as_object()
        .ok_or_else(|| PipelineError::InvalidStage(format!("$match expects an object: {}", filter)))?;

    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => all_of(doc, condition)?,
            "$or" => any_of(doc, condition)?,
            "$nor" => !any_of(doc, condition)?,
            "$expr" => is_truthy(&eval(condition, doc)?),
            op if op.starts_with('$') => return Err(PipelineError::Unsupported(op.to_string())),
            path => field_matches(doc, path, condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Value) -> PipelineResult<&Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| PipelineError::InvalidStage("$and/$or/$nor expect an array".into()))
}

fn all_of(doc: &Value, condition: &Value) -> PipelineResult<bool> {
    for clause in clauses(condition)? {
        if !matches(doc, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(doc: &Value, condition: &Value) -> PipelineResult<bool> {
    for clause in clauses(condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_doc(condition: &Value) -> Option<&Map<String, Value>> {
    match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => Some(map),
        _ => None,
    }
}

fn field_matches(doc: &Value, path: &str, condition: &Value) -> PipelineResult<bool> {
    let value = get_path(doc, path);
    match is_operator_doc(condition) {
        Some(ops) => operators_match(value.as_ref(), ops),
        None => Ok(equals(value.as_ref(), condition)),
    }
}

/// Values a condition is tested against: the value itself and, for arrays, each element
fn candidates(value: &Value) -> Vec<&Value> {
    let mut out = vec![value];
    if let Value::Array(items) = value {
        out.extend(items.iter());
    }
    out
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(v) => candidates(v).into_iter().any(|c| values_equal(c, expected)),
    }
}

fn compares(value: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    let Some(v) = value else {
        return false;
    };
    candidates(v)
        .into_iter()
        .filter(|c| type_rank(c) == type_rank(expected))
        .any(|c| accept(compare_values(c, expected)))
}

fn operators_match(value: Option<&Value>, ops: &Map<String, Value>) -> PipelineResult<bool> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, arg),
            "$ne" => !equals(value, arg),
            "$gt" => compares(value, arg, |o| o == Ordering::Greater),
            "$gte" => compares(value, arg, |o| o != Ordering::Less),
            "$lt" => compares(value, arg, |o| o == Ordering::Less),
            "$lte" => compares(value, arg, |o| o != Ordering::Greater),
            "$in" => in_list(value, arg)?,
            "$nin" => !in_list(value, arg)?,
            "$exists" => value.is_some() == is_truthy(arg),
            "$regex" => {
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                regex_match(value, arg, options)?
            }
            "$options" => true,
            "$not" => match arg {
                Value::Object(inner) => !operators_match(value, inner)?,
                Value::String(_) => !regex_match(value, arg, "")?,
                _ => {
                    return Err(PipelineError::InvalidStage(
                        "$not expects an operator object or regex".into(),
                    ))
                }
            },
            other => return Err(PipelineError::Unsupported(other.to_string())),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(value: Option<&Value>, arg: &Value) -> PipelineResult<bool> {
    let list = arg
        .as_array()
        .ok_or_else(|| PipelineError::InvalidStage("$in/$nin expect an array".into()))?;
    Ok(list.iter().any(|expected| equals(value, expected)))
}

fn build_regex(pattern: &str, options: &str) -> PipelineResult<Regex> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()?;
    Ok(regex)
}

fn regex_match(value: Option<&Value>, pattern: &Value, options: &str) -> PipelineResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| PipelineError::InvalidStage("$regex expects a string pattern".into()))?;
    let regex = build_regex(pattern, options)?;
    let Some(v) = value else {
        return Ok(false);
    };
    Ok(candidates(v)
        .into_iter()
        .filter_map(Value::as_str)
        .any(|s| regex.is_match(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn station() -> Value {
        json!({
            "country_code": "DE",
            "power_kw": 150,
            "operator": "Ionity GmbH",
            "connectors": ["CCS", "Type2"],
            "location": {"lat": 52.5, "lon": 13.4}
        })
    }

    #[test]
    fn test_implicit_equality_and_dotted_paths() {
        assert!(matches(&station(), &json!({"country_code": "DE"})).unwrap());
        assert!(matches(&station(), &json!({"location.lat": 52.5})).unwrap());
        assert!(!matches(&station(), &json!({"country_code": "FR"})).unwrap());
    }

    #[test]
    fn test_array_field_matches_any_element() {
        assert!(matches(&station(), &json!({"connectors": "CCS"})).unwrap());
        assert!(matches(&station(), &json!({"connectors": {"$in": ["CHAdeMO", "Type2"]}})).unwrap());
        assert!(!matches(&station(), &json!({"connectors": {"$nin": ["CCS"]}})).unwrap());
    }

    #[test]
    fn test_range_operators_respect_type() {
        assert!(matches(&station(), &json!({"power_kw": {"$gte": 150, "$lt": 350}})).unwrap());
        assert!(!matches(&station(), &json!({"power_kw": {"$gt": "100"}})).unwrap());
    }

    #[test]
    fn test_exists_and_null_equality() {
        assert!(matches(&station(), &json!({"missing": null})).unwrap());
        assert!(matches(&station(), &json!({"missing": {"$exists": false}})).unwrap());
        assert!(!matches(&station(), &json!({"operator": {"$exists": false}})).unwrap());
    }

    #[test]
    fn test_regex_and_not() {
        assert!(matches(&station(), &json!({"operator": {"$regex": "^ionity", "$options": "i"}})).unwrap());
        assert!(!matches(&station(), &json!({"operator": {"$not": {"$regex": "GmbH"}}})).unwrap());
    }

    #[test]
    fn test_logical_operators_and_expr() {
        let filter = json!({"$or": [{"country_code": "FR"}, {"power_kw": {"$gte": 100}}]});
        assert!(matches(&station(), &filter).unwrap());
        let nor = json!({"$nor": [{"country_code": "DE"}]});
        assert!(!matches(&station(), &nor).unwrap());
        let expr = json!({"$expr": {"$gt": ["$location.lat", "$location.lon"]}});
        assert!(matches(&station(), &expr).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_unsupported() {
        let err = matches(&station(), &json!({"power_kw": {"$near": 1}})).unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported(_)));
    }
}
