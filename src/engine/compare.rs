//! Result Comparison
//!
//! Diffs two normalized tables with numeric tolerance and optional
//! order-insensitivity.

use serde::{Deserialize, Serialize};

use super::normalize::{Cell, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareOptions {
    pub ignore_order: bool,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    /// Column names excluded from the diff, matched case-insensitively
    pub ignore_columns: Vec<String>,
    pub max_reported_diffs: usize,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            ignore_order: true,
            abs_tolerance: 1e-6,
            rel_tolerance: 1e-4,
            ignore_columns: Vec::new(),
            max_reported_diffs: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Match,
    ColumnMismatch,
    RowCountMismatch,
    ValueMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDiff {
    pub row: usize,
    pub column: String,
    pub left: Cell,
    pub right: Cell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub status: ComparisonStatus,
    pub left_rows: usize,
    pub right_rows: usize,
    pub shared_columns: Vec<String>,
    pub left_only_columns: Vec<String>,
    pub right_only_columns: Vec<String>,
    /// Total differing cells; `row_diffs` holds at most `max_reported_diffs`
    pub diff_count: usize,
    pub row_diffs: Vec<RowDiff>,
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        self.status == ComparisonStatus::Match
    }

    /// Shared columns agree even if either side carries extra columns
    pub fn values_agree(&self) -> bool {
        match self.status {
            ComparisonStatus::Match => true,
            ComparisonStatus::ColumnMismatch => {
                !self.shared_columns.is_empty() && self.left_rows == self.right_rows && self.diff_count == 0
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> String {
        match self.status {
            ComparisonStatus::Match => format!("results match ({} rows)", self.left_rows),
            ComparisonStatus::RowCountMismatch => {
                format!("row count differs: {} vs {}", self.left_rows, self.right_rows)
            }
            ComparisonStatus::ValueMismatch => format!(
                "{} differing values across {} shared columns",
                self.diff_count,
                self.shared_columns.len()
            ),
            ComparisonStatus::ColumnMismatch => format!(
                "columns differ (left only: [{}], right only: [{}])",
                self.left_only_columns.join(", "),
                self.right_only_columns.join(", ")
            ),
        }
    }
}

/// Numbers are equal within either tolerance; null equals only null
pub fn cells_equal(left: &Cell, right: &Cell, options: &CompareOptions) -> bool {
    match (left, right) {
        (Cell::Number(a), Cell::Number(b)) => {
            let diff = (a - b).abs();
            diff <= options.abs_tolerance || diff <= options.rel_tolerance * a.abs().max(b.abs())
        }
        (a, b) => a == b,
    }
}

fn rows_equal(left: &[Cell], right: &[Cell], options: &CompareOptions) -> bool {
    left.len() == right.len() && left.iter().zip(right).all(|(a, b)| cells_equal(a, b, options))
}

/// Pair rows of two equally long tables as multisets. Each left row takes
/// the first unused right row equal to it within tolerance; rows left over
/// on both sides pair up in order. Returns (left, right) row indexes.
fn pair_rows(left: &Table, right: &Table, options: &CompareOptions) -> Vec<(usize, usize)> {
    let mut used = vec![false; right.len()];
    let mut pairs = Vec::with_capacity(left.len());
    let mut unmatched = Vec::new();

    for (li, lrow) in left.rows.iter().enumerate() {
        // Canonically sorted tables mostly line up already
        let same_position = li < right.len() && !used[li] && rows_equal(lrow, &right.rows[li], options);
        let found = if same_position {
            Some(li)
        } else {
            (0..right.len()).find(|&ri| !used[ri] && rows_equal(lrow, &right.rows[ri], options))
        };
        match found {
            Some(ri) => {
                used[ri] = true;
                pairs.push((li, ri));
            }
            None => unmatched.push(li),
        }
    }

    let leftovers: Vec<usize> = (0..right.len()).filter(|ri| !used[*ri]).collect();
    pairs.extend(unmatched.into_iter().zip(leftovers));
    pairs.sort_unstable();
    pairs
}

/// Compare two tables
pub fn compare(left: &Table, right: &Table, options: &CompareOptions) -> Comparison {
    let keep = |c: &str| !options.ignore_columns.iter().any(|i| i.eq_ignore_ascii_case(c));

    let shared: Vec<String> = left
        .columns
        .iter()
        .filter(|c| keep(c.as_str()) && right.columns.contains(*c))
        .cloned()
        .collect();
    let left_only: Vec<String> = left
        .columns
        .iter()
        .filter(|c| keep(c.as_str()) && !right.columns.contains(*c))
        .cloned()
        .collect();
    let right_only: Vec<String> = right
        .columns
        .iter()
        .filter(|c| keep(c.as_str()) && !left.columns.contains(*c))
        .cloned()
        .collect();

    let mut comparison = Comparison {
        status: ComparisonStatus::Match,
        left_rows: left.len(),
        right_rows: right.len(),
        shared_columns: shared.clone(),
        left_only_columns: left_only,
        right_only_columns: right_only,
        diff_count: 0,
        row_diffs: Vec::new(),
    };

    if left.is_empty() && right.is_empty() {
        return comparison;
    }

    if shared.is_empty() {
        comparison.status = ComparisonStatus::ColumnMismatch;
        return comparison;
    }

    if left.len() != right.len() {
        comparison.status = ComparisonStatus::RowCountMismatch;
        return comparison;
    }

    let (l, r) = (left.project(&shared), right.project(&shared));
    let (l, r, pairs) = if options.ignore_order {
        let (l, r) = (l.sorted(), r.sorted());
        let pairs = pair_rows(&l, &r, options);
        (l, r, pairs)
    } else {
        let pairs = (0..l.len()).map(|i| (i, i)).collect();
        (l, r, pairs)
    };

    for (li, ri) in pairs {
        let (lrow, rrow) = (&l.rows[li], &r.rows[ri]);
        for (col_idx, column) in shared.iter().enumerate() {
            let (lc, rc) = (&lrow[col_idx], &rrow[col_idx]);
            if !cells_equal(lc, rc, options) {
                comparison.diff_count += 1;
                if comparison.row_diffs.len() < options.max_reported_diffs {
                    comparison.row_diffs.push(RowDiff {
                        row: li,
                        column: column.clone(),
                        left: lc.clone(),
                        right: rc.clone(),
                    });
                }
            }
        }
    }

    comparison.status = if comparison.diff_count > 0 {
        ComparisonStatus::ValueMismatch
    } else if !comparison.left_only_columns.is_empty() || !comparison.right_only_columns.is_empty() {
        ComparisonStatus::ColumnMismatch
    } else {
        ComparisonStatus::Match
    };
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: Vec<Vec<Cell>>) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn num(n: f64) -> Cell {
        Cell::Number(n)
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn test_order_insensitive_match_with_tolerance() {
        let left = table(&["region", "total"], vec![vec![text("IT"), num(10.0)], vec![text("NO"), num(20.000001)]]);
        let right = table(&["region", "total"], vec![vec![text("NO"), num(20.0)], vec![text("IT"), num(10.0)]]);
        let result = compare(&left, &right, &CompareOptions::default());
        assert!(result.is_match(), "{}", result.summary());
    }

    #[test]
    fn test_unordered_rows_pair_within_tolerance() {
        let left = table(&["share", "region"], vec![vec![num(1.0), text("b")], vec![num(1.00000001), text("a")]]);
        let right = table(&["share", "region"], vec![vec![num(1.00000001), text("b")], vec![num(1.0), text("a")]]);
        let result = compare(&left, &right, &CompareOptions::default());
        assert!(result.is_match(), "{}", result.summary());

        let right = table(&["share", "region"], vec![vec![num(1.00000001), text("b")], vec![num(2.0), text("a")]]);
        let result = compare(&left, &right, &CompareOptions::default());
        assert_eq!(result.status, ComparisonStatus::ValueMismatch);
        assert_eq!(result.diff_count, 1);
        assert_eq!(result.row_diffs[0].column, "share");
    }

    #[test]
    fn test_order_sensitive_detects_swap() {
        let left = table(&["x"], vec![vec![num(1.0)], vec![num(2.0)]]);
        let right = table(&["x"], vec![vec![num(2.0)], vec![num(1.0)]]);
        let options = CompareOptions {
            ignore_order: false,
            ..Default::default()
        };
        let result = compare(&left, &right, &options);
        assert_eq!(result.status, ComparisonStatus::ValueMismatch);
        assert_eq!(result.diff_count, 2);
    }

    #[test]
    fn test_relative_tolerance() {
        let opts = CompareOptions::default();
        assert!(cells_equal(&num(1_000_000.0), &num(1_000_050.0), &opts));
        assert!(!cells_equal(&num(1.0), &num(1.01), &opts));
        assert!(cells_equal(&Cell::Null, &Cell::Null, &opts));
        assert!(!cells_equal(&Cell::Null, &num(0.0), &opts));
        assert!(!cells_equal(&text("1"), &num(1.0), &opts));
    }

    #[test]
    fn test_row_count_and_column_mismatch() {
        let left = table(&["a", "b"], vec![vec![num(1.0), num(2.0)]]);
        let right = table(&["a", "c"], vec![vec![num(1.0), num(3.0)], vec![num(4.0), num(5.0)]]);
        assert_eq!(compare(&left, &right, &CompareOptions::default()).status, ComparisonStatus::RowCountMismatch);

        let right = table(&["a", "c"], vec![vec![num(1.0), num(3.0)]]);
        let result = compare(&left, &right, &CompareOptions::default());
        assert_eq!(result.status, ComparisonStatus::ColumnMismatch);
        assert!(result.values_agree());
        assert_eq!(result.left_only_columns, vec!["b"]);
        assert_eq!(result.right_only_columns, vec!["c"]);

        let ignoring = CompareOptions {
            ignore_columns: vec!["b".into(), "c".into()],
            ..Default::default()
        };
        assert!(compare(&left, &right, &ignoring).is_match());

        // An empty result that still names its columns is a row count problem
        let empty = table(&["a", "b"], vec![]);
        assert_eq!(compare(&empty, &left, &CompareOptions::default()).status, ComparisonStatus::RowCountMismatch);
        let nameless = table(&[], vec![]);
        assert_eq!(compare(&nameless, &left, &CompareOptions::default()).status, ComparisonStatus::ColumnMismatch);
    }

    #[test]
    fn test_empty_tables_match_and_diffs_are_capped() {
        assert!(compare(&table(&["a"], vec![]), &table(&["b"], vec![]), &CompareOptions::default()).is_match());

        let left = table(&["v"], (0..30).map(|i| vec![num(i as f64)]).collect());
        let right = table(&["v"], (0..30).map(|i| vec![num(i as f64 + 100.0)]).collect());
        let result = compare(&left, &right, &CompareOptions::default());
        assert_eq!(result.diff_count, 30);
        assert_eq!(result.row_diffs.len(), 20);
    }
}
