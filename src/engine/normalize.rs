//! Result Normalization
//!
//! Converts backend result sets into a common tabular shape so relational
//! rows and aggregation documents can be compared cell by cell.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use super::adapter::ResultSet;

/// A canonical table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Cell {
    fn rank(&self) -> u8 {
        match self {
            Cell::Null => 0,
            Cell::Bool(_) => 1,
            Cell::Number(_) => 2,
            Cell::Text(_) => 3,
        }
    }

    /// Total order used for canonical row sorting
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Bool(a), Cell::Bool(b)) => a.cmp(b),
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Drop `_id` values that look like generated ObjectIds
    pub drop_object_ids: bool,
    /// Parse numeric-looking text into numbers
    pub coerce_numeric_text: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            drop_object_ids: true,
            coerce_numeric_text: false,
        }
    }
}

/// Rows of cells under lowercased column names
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Copy with rows in canonical order
    pub fn sorted(&self) -> Table {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| compare_rows(a, b));
        Table {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Copy restricted to `columns`, in that order; absent columns become null
    pub fn project(&self, columns: &[String]) -> Table {
        let indexes: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indexes
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();
        Table {
            columns: columns.to_vec(),
            rows,
        }
    }
}

pub fn compare_rows(a: &[Cell], b: &[Cell]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Normalize a backend result set
pub fn normalize(result: &ResultSet, options: &NormalizeOptions) -> Table {
    let flat_rows: Vec<Vec<(String, Cell)>> = result
        .rows
        .iter()
        .map(|row| flatten_row(row, options))
        .collect();

    let mut columns: Vec<String> = Vec::new();
    if flat_rows.is_empty() {
        columns = result.columns.iter().map(|c| c.to_lowercase()).collect();
    }
    for row in &flat_rows {
        for (name, _) in row {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }

    let rows = flat_rows
        .into_iter()
        .map(|row| {
            let mut cells = vec![Cell::Null; columns.len()];
            for (name, cell) in row {
                if let Some(i) = columns.iter().position(|c| *c == name) {
                    cells[i] = cell;
                }
            }
            cells
        })
        .collect();

    Table { columns, rows }
}

fn flatten_row(row: &Map<String, Value>, options: &NormalizeOptions) -> Vec<(String, Cell)> {
    let mut out: Vec<(String, Cell)> = Vec::new();
    for (key, value) in row {
        if key == "_id" {
            match value {
                Value::Object(map) if !is_extended_scalar(map) => {
                    // Group keys become ordinary columns unless the row already has them
                    for (sub, v) in map {
                        if !row.contains_key(sub) {
                            flatten_value(sub, v, options, &mut out);
                        }
                    }
                }
                v if options.drop_object_ids && is_object_id(v) => {}
                v => flatten_value(key, v, options, &mut out),
            }
        } else {
            flatten_value(key, value, options, &mut out);
        }
    }
    out
}

fn flatten_value(name: &str, value: &Value, options: &NormalizeOptions, out: &mut Vec<(String, Cell)>) {
    match value {
        Value::Object(map) if !is_extended_scalar(map) => {
            for (sub, v) in map {
                flatten_value(&format!("{}.{}", name, sub), v, options, out);
            }
        }
        other => out.push((name.to_lowercase(), to_cell(other, options))),
    }
}

/// `{"$oid": ..}`, `{"$date": ..}`, `{"$numberDecimal": ..}` and friends
fn is_extended_scalar(map: &Map<String, Value>) -> bool {
    map.len() == 1
        && map
            .keys()
            .next()
            .map(|k| matches!(k.as_str(), "$oid" | "$date" | "$numberDecimal" | "$numberLong" | "$numberInt" | "$numberDouble"))
            .unwrap_or(false)
}

fn is_object_id(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key("$oid"),
        Value::String(s) => s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit()),
        _ => false,
    }
}

fn to_cell(value: &Value, options: &NormalizeOptions) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Bool(*b),
        Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Null),
        Value::String(s) => {
            if options.coerce_numeric_text {
                if let Ok(f) = s.trim().parse::<f64>() {
                    if f.is_finite() {
                        return Cell::Number(f);
                    }
                }
            }
            Cell::Text(s.clone())
        }
        Value::Array(_) => Cell::Text(value.to_string()),
        Value::Object(map) => match map.iter().next() {
            Some((k, v)) if k == "$date" => match v {
                Value::String(s) => Cell::Text(s.clone()),
                Value::Object(inner) => inner
                    .get("$numberLong")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(Cell::Number)
                    .unwrap_or(Cell::Null),
                other => to_cell(other, options),
            },
            Some((k, Value::String(s))) if k == "$oid" => Cell::Text(s.clone()),
            Some((_, Value::String(s))) => s.parse::<f64>().map(Cell::Number).unwrap_or_else(|_| Cell::Text(s.clone())),
            _ => Cell::Text(value.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(rows: Vec<Value>) -> ResultSet {
        ResultSet::from_rows(
            rows.into_iter().map(|r| r.as_object().cloned().unwrap()).collect(),
            0,
        )
    }

    #[test]
    fn test_compound_id_is_flattened() {
        let rs = set(vec![json!({"_id": {"region": "Italy", "year": 2023}, "Total": 5})]);
        let table = normalize(&rs, &NormalizeOptions::default());
        assert_eq!(table.columns, vec!["region", "year", "total"]);
        assert_eq!(table.rows[0], vec![Cell::Text("Italy".into()), Cell::Number(2023.0), Cell::Number(5.0)]);
    }

    #[test]
    fn test_id_subfield_does_not_override_existing_column() {
        let rs = set(vec![json!({"_id": {"make": "KIA"}, "make": "Kia"})]);
        let table = normalize(&rs, &NormalizeOptions::default());
        assert_eq!(table.columns, vec!["make"]);
        assert_eq!(table.rows[0], vec![Cell::Text("Kia".into())]);
    }

    #[test]
    fn test_object_ids_dropped_scalar_ids_kept() {
        let rs = set(vec![
            json!({"_id": {"$oid": "65a1b2c3d4e5f6a7b8c9d0e1"}, "n": 1}),
            json!({"_id": "65a1b2c3d4e5f6a7b8c9d0e2", "n": 2}),
        ]);
        let table = normalize(&rs, &NormalizeOptions::default());
        assert_eq!(table.columns, vec!["n"]);

        let keyed = set(vec![json!({"_id": "Norway", "n": 1})]);
        assert_eq!(normalize(&keyed, &NormalizeOptions::default()).columns, vec!["_id", "n"]);
    }

    #[test]
    fn test_nested_and_arrays_and_missing_cells() {
        let rs = set(vec![
            json!({"loc": {"lat": 1.5, "lon": 2.5}, "tags": ["a", "b"]}),
            json!({"other": true}),
        ]);
        let table = normalize(&rs, &NormalizeOptions::default());
        assert_eq!(table.columns, vec!["loc.lat", "loc.lon", "tags", "other"]);
        assert_eq!(table.rows[0][2], Cell::Text(r#"["a","b"]"#.into()));
        assert_eq!(table.rows[1][0], Cell::Null);
        assert_eq!(table.rows[1][3], Cell::Bool(true));
    }

    #[test]
    fn test_numeric_text_coercion_and_decimals() {
        let rs = set(vec![json!({"v": "12.50", "d": {"$numberDecimal": "3.25"}})]);
        let plain = normalize(&rs, &NormalizeOptions::default());
        assert_eq!(plain.rows[0], vec![Cell::Text("12.50".into()), Cell::Number(3.25)]);

        let opts = NormalizeOptions {
            coerce_numeric_text: true,
            ..Default::default()
        };
        let coerced = normalize(&rs, &opts);
        assert_eq!(coerced.rows[0][0], Cell::Number(12.5));
    }

    #[test]
    fn test_empty_result_keeps_declared_columns_and_sorting() {
        let rs = ResultSet {
            columns: vec!["Region".into()],
            rows: vec![],
            execution_time_ms: 0,
        };
        assert_eq!(normalize(&rs, &NormalizeOptions::default()).columns, vec!["region"]);

        let table = Table {
            columns: vec!["x".into()],
            rows: vec![vec![Cell::Text("b".into())], vec![Cell::Null], vec![Cell::Number(1.0)]],
        };
        let sorted = table.sorted();
        assert_eq!(sorted.rows, vec![vec![Cell::Null], vec![Cell::Number(1.0)], vec![Cell::Text("b".into())]]);
    }
}
