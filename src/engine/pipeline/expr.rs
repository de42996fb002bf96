//! Aggregation expressions
//!
//! Evaluates `$field` paths, literals and operator objects against a document.
//! Missing fields evaluate to null.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::value::{compare_values, get_path, is_truthy, number, values_equal};
use super::{PipelineError, PipelineResult};

/// Evaluate an expression against `doc`
pub fn eval(expr: &Value, doc: &Value) -> PipelineResult<Value> {
    match expr {
        Value::String(s) if s.starts_with("$$") => eval_variable(&s[2..], doc),
        Value::String(s) if s.starts_with('$') => Ok(get_path(doc, &s[1..]).unwrap_or(Value::Null)),
        Value::Array(items) => items
            .iter()
            .map(|item| eval(item, doc))
            .collect::<PipelineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            if let Some((op, arg)) = single_operator(map) {
                eval_operator(op, arg, doc)
            } else {
                let mut out = Map::new();
                for (key, sub) in map {
                    out.insert(key.clone(), eval(sub, doc)?);
                }
                Ok(Value::Object(out))
            }
        }
        other => Ok(other.clone()),
    }
}

/// True when `expr` is a bare field path whose field is absent from `doc`
pub fn is_missing_field(expr: &Value, doc: &Value) -> bool {
    match expr {
        Value::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
            get_path(doc, &s[1..]).is_none()
        }
        _ => false,
    }
}

fn single_operator(map: &Map<String, Value>) -> Option<(&str, &Value)> {
    if map.len() != 1 {
        return None;
    }
    let (key, value) = map.iter().next()?;
    key.starts_with('$').then_some((key.as_str(), value))
}

fn eval_variable(name: &str, doc: &Value) -> PipelineResult<Value> {
    let (var, path) = match name.split_once('.') {
        Some((var, path)) => (var, Some(path)),
        None => (name, None),
    };
    match var {
        "ROOT" | "CURRENT" => Ok(match path {
            Some(p) => get_path(doc, p).unwrap_or(Value::Null),
            None => doc.clone(),
        }),
        _ => Err(PipelineError::Unsupported(format!("$${}", var))),
    }
}

/// Evaluate operator arguments, accepting a bare value as a one-element list
fn eval_args(arg: &Value, doc: &Value) -> PipelineResult<Vec<Value>> {
    match arg {
        Value::Array(items) => items.iter().map(|item| eval(item, doc)).collect(),
        other => Ok(vec![eval(other, doc)?]),
    }
}

fn expect_args(op: &str, args: &[Value], count: usize) -> PipelineResult<()> {
    if args.len() != count {
        return Err(PipelineError::InvalidExpression(format!(
            "{} expects {} arguments, got {}",
            op,
            count,
            args.len()
        )));
    }
    Ok(())
}

fn is_integer(v: &Value) -> bool {
    v.as_i64().is_some()
}

fn eval_operator(op: &str, arg: &Value, doc: &Value) -> PipelineResult<Value> {
    match op {
        "$literal" => Ok(arg.clone()),

        // Arithmetic
        "$add" | "$multiply" => {
            let args = eval_args(arg, doc)?;
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let integral = args.iter().all(is_integer);
            let mut acc = if op == "$add" { 0.0 } else { 1.0 };
            for a in &args {
                let n = numeric(op, a)?;
                if op == "$add" {
                    acc += n;
                } else {
                    acc *= n;
                }
            }
            Ok(number(acc, integral))
        }
        "$subtract" | "$divide" | "$mod" => {
            let args = eval_args(arg, doc)?;
            expect_args(op, &args, 2)?;
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::Null);
            }
            let (a, b) = (numeric(op, &args[0])?, numeric(op, &args[1])?);
            let integral = is_integer(&args[0]) && is_integer(&args[1]);
            match op {
                "$subtract" => Ok(number(a - b, integral)),
                "$divide" => {
                    if b == 0.0 {
                        return Err(PipelineError::InvalidExpression("$divide by zero".into()));
                    }
                    Ok(number(a / b, false))
                }
                _ => {
                    if b == 0.0 {
                        return Err(PipelineError::InvalidExpression("$mod by zero".into()));
                    }
                    Ok(number(a % b, integral))
                }
            }
        }
        "$abs" => {
            let v = first_arg(arg, doc)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            Ok(number(numeric(op, &v)?.abs(), is_integer(&v)))
        }
        "$round" => {
            let args = eval_args(arg, doc)?;
            let value = args.first().cloned().unwrap_or(Value::Null);
            if value.is_null() {
                return Ok(Value::Null);
            }
            let places = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            let factor = 10f64.powi(places as i32);
            let rounded = round_half_even(numeric(op, &value)? * factor) / factor;
            Ok(number(rounded, is_integer(&value)))
        }

        // Comparison
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$cmp" => {
            let args = eval_args(arg, doc)?;
            expect_args(op, &args, 2)?;
            let ord = compare_values(&args[0], &args[1]);
            Ok(match op {
                "$eq" => Value::Bool(ord == Ordering::Equal),
                "$ne" => Value::Bool(ord != Ordering::Equal),
                "$gt" => Value::Bool(ord == Ordering::Greater),
                "$gte" => Value::Bool(ord != Ordering::Less),
                "$lt" => Value::Bool(ord == Ordering::Less),
                "$lte" => Value::Bool(ord != Ordering::Greater),
                _ => Value::from(ord as i8 as i64),
            })
        }

        // Boolean
        "$and" => Ok(Value::Bool(eval_args(arg, doc)?.iter().all(is_truthy))),
        "$or" => Ok(Value::Bool(eval_args(arg, doc)?.iter().any(is_truthy))),
        "$not" => Ok(Value::Bool(!is_truthy(&first_arg(arg, doc)?))),

        // Conditional
        "$cond" => {
            let (cond, then, otherwise) = match arg {
                Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Value::Object(map) => match (map.get("if"), map.get("then"), map.get("else")) {
                    (Some(c), Some(t), Some(e)) => (c, t, e),
                    _ => {
                        return Err(PipelineError::InvalidExpression(
                            "$cond requires if, then and else".into(),
                        ))
                    }
                },
                _ => {
                    return Err(PipelineError::InvalidExpression(
                        "$cond expects [if, then, else]".into(),
                    ))
                }
            };
            if is_truthy(&eval(cond, doc)?) {
                eval(then, doc)
            } else {
                eval(otherwise, doc)
            }
        }
        "$ifNull" => {
            let args = eval_args(arg, doc)?;
            let fallback = args.last().cloned().unwrap_or(Value::Null);
            Ok(args
                .into_iter()
                .find(|v| !v.is_null())
                .unwrap_or(fallback))
        }
        "$in" => {
            let args = eval_args(arg, doc)?;
            expect_args(op, &args, 2)?;
            match &args[1] {
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, &args[0])))),
                _ => Err(PipelineError::InvalidExpression("$in requires an array".into())),
            }
        }

        // Strings
        "$concat" => {
            let args = eval_args(arg, doc)?;
            let mut out = String::new();
            for a in &args {
                match a {
                    Value::Null => return Ok(Value::Null),
                    Value::String(s) => out.push_str(s),
                    other => {
                        return Err(PipelineError::InvalidExpression(format!(
                            "$concat only supports strings, got {}",
                            other
                        )))
                    }
                }
            }
            Ok(Value::String(out))
        }
        "$toUpper" | "$toLower" => {
            let text = match first_arg(arg, doc)? {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Value::String(if op == "$toUpper" {
                text.to_uppercase()
            } else {
                text.to_lowercase()
            }))
        }
        "$substr" | "$substrCP" => {
            let args = eval_args(arg, doc)?;
            expect_args(op, &args, 3)?;
            let text = match &args[0] {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let start = args[1].as_f64().unwrap_or(0.0).max(0.0) as usize;
            let len = args[2].as_f64().unwrap_or(-1.0);
            let chars = text.chars().skip(start);
            let out: String = if len < 0.0 {
                chars.collect()
            } else {
                chars.take(len as usize).collect()
            };
            Ok(Value::String(out))
        }

        // Conversion
        "$toDouble" => {
            let v = first_arg(arg, doc)?;
            match to_f64(&v) {
                Some(f) => Ok(number(f, false)),
                None if v.is_null() => Ok(Value::Null),
                None => Err(PipelineError::InvalidExpression(format!("cannot convert {} to double", v))),
            }
        }
        "$toInt" | "$toLong" => {
            let v = first_arg(arg, doc)?;
            match to_f64(&v) {
                Some(f) => Ok(Value::from(f.trunc() as i64)),
                None if v.is_null() => Ok(Value::Null),
                None => Err(PipelineError::InvalidExpression(format!("cannot convert {} to int", v))),
            }
        }
        "$toString" => Ok(match first_arg(arg, doc)? {
            Value::Null => Value::Null,
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }),

        // Arrays
        "$size" => match first_arg(arg, doc)? {
            Value::Array(items) => Ok(Value::from(items.len() as i64)),
            other => Err(PipelineError::InvalidExpression(format!(
                "$size requires an array, got {}",
                other
            ))),
        },
        "$sum" | "$avg" | "$min" | "$max" => {
            let args = eval_args(arg, doc)?;
            let values: Vec<Value> = match args.as_slice() {
                [Value::Array(items)] => items.clone(),
                _ => args,
            };
            Ok(reduce_values(op, &values))
        }

        // Dates
        "$year" => {
            let v = first_arg(arg, doc)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            parse_date_year(&v)
                .map(|y| Value::from(y as i64))
                .ok_or_else(|| PipelineError::InvalidExpression(format!("$year cannot read a date from {}", v)))
        }

        other => Err(PipelineError::Unsupported(other.to_string())),
    }
}

fn first_arg(arg: &Value, doc: &Value) -> PipelineResult<Value> {
    match arg {
        Value::Array(items) if items.len() == 1 => eval(&items[0], doc),
        other => eval(other, doc),
    }
}

fn numeric(op: &str, v: &Value) -> PipelineResult<f64> {
    v.as_f64().ok_or_else(|| {
        PipelineError::InvalidExpression(format!("{} only supports numeric values, got {}", op, v))
    })
}

fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

/// `$sum`, `$avg`, `$min`, `$max` over a list, ignoring non-numeric or null entries
pub fn reduce_values(op: &str, values: &[Value]) -> Value {
    match op {
        "$sum" | "$avg" => {
            let nums: Vec<&Value> = values.iter().filter(|v| v.is_number()).collect();
            let total: f64 = nums.iter().filter_map(|v| v.as_f64()).sum();
            if op == "$sum" {
                number(total, nums.iter().all(|v| is_integer(v)))
            } else if nums.is_empty() {
                Value::Null
            } else {
                number(total / nums.len() as f64, false)
            }
        }
        _ => {
            let present = values.iter().filter(|v| !v.is_null());
            let best = if op == "$min" {
                present.min_by(|a, b| compare_values(a, b))
            } else {
                present.max_by(|a, b| compare_values(a, b))
            };
            best.cloned().unwrap_or(Value::Null)
        }
    }
}

fn parse_date_year(v: &Value) -> Option<i32> {
    match v {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.year());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(dt.year());
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt.year());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(|d| d.year())
        }
        // Extended JSON date
        Value::Object(map) => map.get("$date").and_then(parse_date_year),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "make": "tesla",
            "price": 42000,
            "range": 358.5,
            "tags": ["a", "b", "c"],
            "sold": "2023-05-14T10:00:00Z",
            "dims": {"w": 2, "h": 3}
        })
    }

    #[test]
    fn test_field_paths_and_literals() {
        assert_eq!(eval(&json!("$make"), &doc()).unwrap(), json!("tesla"));
        assert_eq!(eval(&json!("$dims.h"), &doc()).unwrap(), json!(3));
        assert_eq!(eval(&json!("$missing"), &doc()).unwrap(), Value::Null);
        assert_eq!(eval(&json!({"$literal": "$make"}), &doc()).unwrap(), json!("$make"));
        assert_eq!(eval(&json!("$$ROOT.make"), &doc()).unwrap(), json!("tesla"));
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        assert_eq!(eval(&json!({"$add": ["$price", 1000]}), &doc()).unwrap(), json!(43000));
        assert_eq!(eval(&json!({"$multiply": ["$dims.w", "$dims.h"]}), &doc()).unwrap(), json!(6));
        assert_eq!(eval(&json!({"$divide": ["$price", 1000]}), &doc()).unwrap(), json!(42.0));
        assert_eq!(eval(&json!({"$round": [{"$divide": [10, 3]}, 2]}), &doc()).unwrap(), json!(3.33));
        assert_eq!(eval(&json!({"$add": ["$missing", 1]}), &doc()).unwrap(), Value::Null);
    }

    #[test]
    fn test_divide_by_zero_is_error() {
        let err = eval(&json!({"$divide": [1, 0]}), &doc()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidExpression(_)));
    }

    #[test]
    fn test_cond_both_forms() {
        let arr = json!({"$cond": [{"$gte": ["$price", 40000]}, "premium", "standard"]});
        let obj = json!({"$cond": {"if": {"$lt": ["$price", 40000]}, "then": "budget", "else": "other"}});
        assert_eq!(eval(&arr, &doc()).unwrap(), json!("premium"));
        assert_eq!(eval(&obj, &doc()).unwrap(), json!("other"));
    }

    #[test]
    fn test_string_and_conversion_operators() {
        assert_eq!(eval(&json!({"$toUpper": "$make"}), &doc()).unwrap(), json!("TESLA"));
        assert_eq!(
            eval(&json!({"$concat": ["$make", "-", {"$toString": "$price"}]}), &doc()).unwrap(),
            json!("tesla-42000")
        );
        assert_eq!(eval(&json!({"$substr": ["$make", 0, 3]}), &doc()).unwrap(), json!("tes"));
        assert_eq!(eval(&json!({"$toInt": "$range"}), &doc()).unwrap(), json!(358));
        assert_eq!(eval(&json!({"$toDouble": "12.5"}), &doc()).unwrap(), json!(12.5));
        assert_eq!(eval(&json!({"$ifNull": ["$missing", "n/a"]}), &doc()).unwrap(), json!("n/a"));
    }

    #[test]
    fn test_size_in_and_year() {
        assert_eq!(eval(&json!({"$size": "$tags"}), &doc()).unwrap(), json!(3));
        assert_eq!(eval(&json!({"$in": ["b", "$tags"]}), &doc()).unwrap(), json!(true));
        assert_eq!(eval(&json!({"$year": "$sold"}), &doc()).unwrap(), json!(2023));
        assert_eq!(eval(&json!({"$year": {"$literal": "2021-02-03"}}), &doc()).unwrap(), json!(2021));
    }

    #[test]
    fn test_unknown_operator() {
        let err = eval(&json!({"$regexFind": {}}), &doc()).unwrap_err();
        assert!(matches!(err, PipelineError::Unsupported(ref s) if s == "$regexFind"));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(2.4), 2.0);
    }
}
