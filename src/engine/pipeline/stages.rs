//! Pipeline stages

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::expr::{eval, is_missing_field};
use super::matcher::matches;
use super::value::{compare_values, get_path, group_key, number, remove_path, set_path, values_equal};
use super::{PipelineError, PipelineResult};

/// Apply one named stage to the document stream
pub fn apply(name: &str, spec: &Value, docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    match name {
        "$match" => match_stage(spec, docs),
        "$group" => group_stage(spec, docs),
        "$sort" => sort_stage(spec, docs),
        "$limit" => Ok(docs.into_iter().take(count_arg(name, spec)?).collect()),
        "$skip" => Ok(docs.into_iter().skip(count_arg(name, spec)?).collect()),
        "$project" => docs.iter().map(|d| project_doc(spec, d)).collect(),
        "$addFields" | "$set" => docs.into_iter().map(|d| add_fields(spec, d)).collect(),
        "$unwind" => unwind_stage(spec, docs),
        "$count" => count_stage(spec, docs),
        "$sortByCount" => sort_by_count(spec, docs),
        other => Err(PipelineError::Unsupported(other.to_string())),
    }
}

fn count_arg(name: &str, spec: &Value) -> PipelineResult<usize> {
    spec.as_u64()
        .or_else(|| spec.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        .map(|n| n as usize)
        .ok_or_else(|| PipelineError::InvalidStage(format!("{} expects a non-negative integer", name)))
}

fn match_stage(spec: &Value, docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        if matches(&doc, spec)? {
            out.push(doc);
        }
    }
    Ok(out)
}

/// Running state of one `$group` accumulator
#[derive(Debug, Clone)]
enum Accumulator {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Push(Vec<Value>),
    AddToSet(Vec<Value>),
    Count(i64),
}

impl Accumulator {
    fn new(op: &str) -> PipelineResult<Self> {
        Ok(match op {
            "$sum" => Accumulator::Sum { total: 0.0, integral: true },
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Value::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            "$count" => Accumulator::Count(0),
            other => return Err(PipelineError::Unsupported(other.to_string())),
        })
    }

    fn update(&mut self, value: Value) {
        match self {
            Accumulator::Sum { total, integral } => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *integral &= value.as_i64().is_some();
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => keep_extreme(current, value, Ordering::is_lt),
            Accumulator::Max(current) => keep_extreme(current, value, Ordering::is_gt),
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = value,
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|i| values_equal(i, &value)) {
                    items.push(value);
                }
            }
            Accumulator::Count(n) => *n += 1,
        }
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Sum { total, integral } => number(total, integral),
            Accumulator::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    number(total / count as f64, false)
                }
            }
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => v.unwrap_or(Value::Null),
            Accumulator::Last(v) => v,
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Value::Array(items),
            Accumulator::Count(n) => Value::from(n),
        }
    }
}

/// Replace `current` when `value` is non-null and ranks better
fn keep_extreme(current: &mut Option<Value>, value: Value, better: fn(Ordering) -> bool) {
    if value.is_null() {
        return;
    }
    let replace = match current {
        None => true,
        Some(existing) => better(compare_values(&value, existing)),
    };
    if replace {
        *current = Some(value);
    }
}

struct Group {
    id: Value,
    accumulators: Vec<Accumulator>,
}

fn group_stage(spec: &Value, docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    let spec = spec
        .as_object()
        .ok_or_else(|| PipelineError::InvalidStage("$group expects an object".into()))?;
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| PipelineError::InvalidStage("$group requires an _id".into()))?;

    // (output field, operator, argument expression)
    let mut fields: Vec<(&str, &str, &Value)> = Vec::new();
    for (name, acc) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let acc_obj = acc
            .as_object()
            .filter(|m| m.len() == 1)
            .ok_or_else(|| PipelineError::InvalidStage(format!("accumulator for '{}' must have one operator", name)))?;
        let (op, arg) = acc_obj
            .iter()
            .next()
            .ok_or_else(|| PipelineError::InvalidStage(format!("empty accumulator for '{}'", name)))?;
        fields.push((name.as_str(), op.as_str(), arg));
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in &docs {
        let id = eval(id_expr, doc)?;
        let key = group_key(&id);
        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                let accumulators = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<PipelineResult<Vec<_>>>()?;
                groups.push(Group { id, accumulators });
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };

        for (acc, (_, _, arg)) in groups[slot].accumulators.iter_mut().zip(fields.iter()) {
            let value = match acc {
                Accumulator::Count(_) => Value::Null,
                _ => eval(arg, doc)?,
            };
            acc.update(value);
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| {
            let mut out = Map::new();
            out.insert("_id".to_string(), group.id);
            for ((name, _, _), acc) in fields.iter().zip(group.accumulators) {
                out.insert(name.to_string(), acc.finish());
            }
            Value::Object(out)
        })
        .collect())
}

fn sort_stage(spec: &Value, mut docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    let spec = spec
        .as_object()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| PipelineError::InvalidStage("$sort expects a non-empty object".into()))?;

    let mut keys: Vec<(&str, bool)> = Vec::new();
    for (field, dir) in spec {
        let descending = match dir.as_f64() {
            Some(d) if d == 1.0 => false,
            Some(d) if d == -1.0 => true,
            _ => {
                return Err(PipelineError::InvalidStage(format!(
                    "$sort direction for '{}' must be 1 or -1",
                    field
                )))
            }
        };
        keys.push((field.as_str(), descending));
    }

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let va = get_path(a, field).unwrap_or(Value::Null);
            let vb = get_path(b, field).unwrap_or(Value::Null);
            let ord = compare_values(&va, &vb);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(docs)
}

fn is_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn project_doc(spec: &Value, doc: &Value) -> PipelineResult<Value> {
    let spec = spec
        .as_object()
        .ok_or_else(|| PipelineError::InvalidStage("$project expects an object".into()))?;

    let exclude_id = spec.get("_id").and_then(is_flag) == Some(false);
    let exclusion = spec
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .any(|(_, v)| is_flag(v) == Some(false));

    if exclusion {
        let mut out = doc.as_object().cloned().unwrap_or_default();
        for (field, v) in spec {
            if is_flag(v) == Some(false) {
                remove_path(&mut out, field);
            } else if field != "_id" {
                return Err(PipelineError::InvalidStage(format!(
                    "cannot mix inclusion of '{}' in an exclusion projection",
                    field
                )));
            }
        }
        return Ok(Value::Object(out));
    }

    let mut out = Map::new();
    if !exclude_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (field, v) in spec {
        if field == "_id" && is_flag(v).is_some() {
            continue;
        }
        match is_flag(v) {
            Some(true) => {
                if let Some(value) = get_path(doc, field) {
                    set_path(&mut out, field, value);
                }
            }
            _ => {
                if !is_missing_field(v, doc) {
                    set_path(&mut out, field, eval(v, doc)?);
                }
            }
        }
    }
    Ok(Value::Object(out))
}

fn add_fields(spec: &Value, doc: Value) -> PipelineResult<Value> {
    let spec = spec
        .as_object()
        .ok_or_else(|| PipelineError::InvalidStage("$addFields expects an object".into()))?;
    let mut values = Vec::with_capacity(spec.len());
    for (field, expr) in spec {
        values.push((field, eval(expr, &doc)?));
    }
    let mut out = match doc {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (field, value) in values {
        set_path(&mut out, field, value);
    }
    Ok(Value::Object(out))
}

fn unwind_stage(spec: &Value, docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    let (path, preserve, index_field) = match spec {
        Value::String(p) => (p.as_str(), false, None),
        Value::Object(map) => {
            if let Some(key) = map
                .keys()
                .find(|k| !matches!(k.as_str(), "path" | "preserveNullAndEmptyArrays" | "includeArrayIndex"))
            {
                return Err(PipelineError::InvalidStage(format!("$unwind does not accept '{}'", key)));
            }
            let index_field = match map.get("includeArrayIndex") {
                None => None,
                Some(Value::String(name)) if !name.is_empty() && !name.starts_with('$') => Some(name.as_str()),
                Some(_) => {
                    return Err(PipelineError::InvalidStage(
                        "$unwind includeArrayIndex must be a field name".into(),
                    ))
                }
            };
            (
                map.get("path").and_then(Value::as_str).unwrap_or(""),
                map.get("preserveNullAndEmptyArrays")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                index_field,
            )
        }
        _ => return Err(PipelineError::InvalidStage("$unwind expects a path".into())),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| PipelineError::InvalidStage(format!("$unwind path must start with '$': {}", path)))?;

    // Documents passed through whole get a null index
    let with_index = |doc: Value, index: Value| match (index_field, doc) {
        (Some(name), Value::Object(mut map)) => {
            set_path(&mut map, name, index);
            Value::Object(map)
        }
        (_, doc) => doc,
    };

    let mut out = Vec::new();
    for doc in docs {
        match get_path(&doc, field) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for (i, item) in items.into_iter().enumerate() {
                    let mut copy = doc.as_object().cloned().unwrap_or_default();
                    set_path(&mut copy, field, item);
                    out.push(with_index(Value::Object(copy), Value::from(i as i64)));
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve {
                    out.push(with_index(doc, Value::Null));
                }
            }
            Some(_) => out.push(with_index(doc, Value::Null)),
        }
    }
    Ok(out)
}

fn count_stage(spec: &Value, docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    let name = spec
        .as_str()
        .filter(|s| !s.is_empty() && !s.starts_with('$'))
        .ok_or_else(|| PipelineError::InvalidStage("$count expects a field name".into()))?;
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Map::new();
    out.insert(name.to_string(), Value::from(docs.len() as i64));
    Ok(vec![Value::Object(out)])
}

fn sort_by_count(spec: &Value, docs: Vec<Value>) -> PipelineResult<Vec<Value>> {
    let group = serde_json::json!({"_id": spec, "count": {"$sum": 1}});
    let grouped = group_stage(&group, docs)?;
    sort_stage(&serde_json::json!({"count": -1}), grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vehicles() -> Vec<Value> {
        vec![
            json!({"_id": 1, "make": "TESLA", "model_year": 2022, "range": 300, "tags": ["awd", "lr"]}),
            json!({"_id": 2, "make": "NISSAN", "model_year": 2019, "range": 150, "tags": []}),
            json!({"_id": 3, "make": "TESLA", "model_year": 2023, "range": null}),
            json!({"_id": 4, "make": "KIA", "model_year": 2023, "range": 250, "tags": ["lr"]}),
        ]
    }

    #[test]
    fn test_group_accumulators() {
        let spec = json!({
            "_id": "$make",
            "avg_range": {"$avg": "$range"},
            "max_year": {"$max": "$model_year"},
            "min_range": {"$min": "$range"},
            "years": {"$addToSet": "$model_year"},
            "n": {"$count": {}},
            "first": {"$first": "$_id"},
            "last": {"$last": "$_id"}
        });
        let out = group_stage(&spec, vehicles()).unwrap();
        let tesla = out.iter().find(|d| d["_id"] == json!("TESLA")).unwrap();
        assert_eq!(tesla["avg_range"], json!(300.0));
        assert_eq!(tesla["max_year"], json!(2023));
        assert_eq!(tesla["min_range"], json!(300));
        assert_eq!(tesla["years"], json!([2022, 2023]));
        assert_eq!(tesla["n"], json!(2));
        assert_eq!(tesla["first"], json!(1));
        assert_eq!(tesla["last"], json!(3));
    }

    #[test]
    fn test_group_compound_id_and_null_id() {
        let spec = json!({"_id": {"make": "$make", "year": "$model_year"}, "c": {"$sum": 1}});
        assert_eq!(group_stage(&spec, vehicles()).unwrap().len(), 4);

        let total = json!({"_id": null, "total": {"$sum": "$range"}});
        let out = group_stage(&total, vehicles()).unwrap();
        assert_eq!(out, vec![json!({"_id": null, "total": 700})]);
    }

    #[test]
    fn test_sort_multiple_keys_with_nulls_first() {
        let out = sort_stage(&json!({"model_year": -1, "range": 1}), vehicles()).unwrap();
        let ids: Vec<Value> = out.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(4), json!(1), json!(2)]);
    }

    #[test]
    fn test_project_exclusion_and_mixing_error() {
        let out = project_doc(&json!({"tags": 0, "_id": 0}), &vehicles()[0]).unwrap();
        assert_eq!(out, json!({"make": "TESLA", "model_year": 2022, "range": 300}));
        assert!(project_doc(&json!({"tags": 0, "make": 1}), &vehicles()[0]).is_err());
    }

    #[test]
    fn test_project_renames_and_skips_missing() {
        let out = project_doc(&json!({"brand": "$make", "x": "$nope", "make": 1}), &vehicles()[1]).unwrap();
        assert_eq!(out, json!({"_id": 2, "brand": "NISSAN", "make": "NISSAN"}));
    }

    #[test]
    fn test_unwind_with_and_without_preserve() {
        let plain = unwind_stage(&json!("$tags"), vehicles()).unwrap();
        assert_eq!(plain.len(), 3);
        let kept = unwind_stage(&json!({"path": "$tags", "preserveNullAndEmptyArrays": true}), vehicles()).unwrap();
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn test_sort_accepts_float_directions() {
        let out = sort_stage(&json!({"range": -1.0, "_id": 1.0}), vehicles()).unwrap();
        let ids: Vec<i64> = out.iter().map(|d| d["_id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 4, 2, 3]);
        assert!(sort_stage(&json!({"range": 0.5}), vehicles()).is_err());
    }

    #[test]
    fn test_unwind_include_array_index() {
        let spec = json!({"path": "$tags", "includeArrayIndex": "idx", "preserveNullAndEmptyArrays": true});
        let out = unwind_stage(&spec, vehicles()).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0]["tags"], json!("awd"));
        assert_eq!(out[0]["idx"], json!(0));
        assert_eq!(out[1]["idx"], json!(1));
        assert_eq!(out[2]["_id"], json!(2));
        assert_eq!(out[2]["idx"], Value::Null);

        let err = unwind_stage(&json!({"path": "$tags", "includeArrayIndex": "$idx"}), vehicles()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStage(_)));
        assert!(unwind_stage(&json!({"path": "$tags", "unknown": true}), vehicles()).is_err());
    }

    #[test]
    fn test_count_and_sort_by_count() {
        assert_eq!(count_stage(&json!("total"), vehicles()).unwrap(), vec![json!({"total": 4})]);
        assert!(count_stage(&json!("total"), Vec::new()).unwrap().is_empty());

        let out = sort_by_count(&json!("$make"), vehicles()).unwrap();
        assert_eq!(out[0], json!({"_id": "TESLA", "count": 2}));
    }

    #[test]
    fn test_add_fields_and_skip_limit() {
        let out = apply("$set", &json!({"decade": {"$subtract": ["$model_year", {"$mod": ["$model_year", 10]}]}}), vehicles()).unwrap();
        assert_eq!(out[1]["decade"], json!(2010));
        let page = apply("$skip", &json!(1), out).unwrap();
        let page = apply("$limit", &json!(2), page).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["_id"], json!(2));
    }
}
