//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX and plain-text
//! renderings of query results

use colored::Colorize;
use serde_json::Value;

use crate::engine::adapter::ResultSet;

/// Widest a rendered table column may get
pub const MAX_COLUMN_WIDTH: usize = 50;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print a numbered item
    pub fn numbered_item(num: usize, text: &str) {
        println!("  {}. {}", num.to_string().bright_white().bold(), text);
    }

    /// Print a pass/fail line for one engine run
    pub fn outcome(ok: bool, text: &str) {
        if ok {
            println!("  {} {}", "✓".green(), text);
        } else {
            println!("  {} {}", "✗".red(), text);
        }
    }

    /// Print a progress indicator
    pub fn progress(current: usize, total: usize, message: &str) {
        let percentage = if total == 0 {
            100
        } else {
            (current as f32 / total as f32 * 100.0) as u32
        };
        println!(
            "  {} [{}/{}] {}",
            "▶".bright_blue(),
            current.to_string().bright_white().bold(),
            total,
            message
        );
        print!("  [");
        let filled = percentage / 5;
        for i in 0..20 {
            if i < filled {
                print!("{}", "█".bright_green());
            } else {
                print!("{}", "░".bright_black());
            }
        }
        println!("] {}%", percentage);
    }

    /// Print a table header
    pub fn table_header(columns: &[&str]) {
        let plain = columns.join(" │ ");
        let header = columns
            .iter()
            .map(|c| c.bright_white().bold().to_string())
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("  {}", header);
        println!("  {}", "─".repeat(plain.chars().count()).bright_black());
    }

    /// Print a table row
    pub fn table_row(values: &[&str]) {
        println!("  {}", values.join(" │ "));
    }

    /// Print a divider
    pub fn divider() {
        println!("{}", "─".repeat(60).bright_black());
    }

    /// Print an empty line
    pub fn blank() {
        println!();
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format a wall-clock duration in seconds
pub fn format_seconds(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.3}s", seconds)
    } else if seconds < 3600.0 {
        let whole = seconds as u64;
        format!("{}m {}s", whole / 60, whole % 60)
    } else {
        let whole = seconds as u64;
        format!("{}h {}m", whole / 3600, (whole % 3600) / 60)
    }
}

pub fn format_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{:.1}%", r)).unwrap_or_else(|| "n/a".to_string())
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.is_f64() => format!("{:.2}", n.as_f64().unwrap_or_default()),
        Some(other) => other.to_string(),
    }
}

fn fit(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        format!("{}{}", text, " ".repeat(width - len))
    }
}

/// Plain-text table of every row. Floats show two decimals and long values
/// are cut at [`MAX_COLUMN_WIDTH`].
pub fn render_table(result: &ResultSet) -> String {
    if result.is_empty() {
        return "   No results found".to_string();
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| result.columns.iter().map(|c| cell_text(row.get(c))).collect())
        .collect();
    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(col.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_COLUMN_WIDTH)
        })
        .collect();

    let mut out = vec![format!("\n   Total Results: {} rows\n", result.len())];
    let header = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| fit(c, *w))
        .collect::<Vec<_>>()
        .join(" | ");
    out.push(format!("   {}", header));
    out.push(format!("   {}", "-".repeat(header.chars().count())));
    for row in &cells {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| fit(v, *w))
            .collect::<Vec<_>>()
            .join(" | ");
        out.push(format!("   {}", line));
    }
    out.join("\n")
}

/// Pretty JSON of every document, indented
pub fn render_documents(result: &ResultSet) -> String {
    if result.is_empty() {
        return "   No results found".to_string();
    }
    let json = serde_json::to_string_pretty(&result.rows).unwrap_or_default();
    format!(
        "\n   Total Results: {} documents\n\n{}",
        result.len(),
        indent(&json, "   ")
    )
}

pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}
