//! Terminal output rendering for heap census diffs.
//!
//! One row per changed (type, generation) key with the direction and size
//! of the change, colored with `colored`.

use super::engine::Change;
use crate::aggregator::HistogramKey;
use crate::utils::config::DIFF_TYPE_NAME_WIDTH;
use colored::*;

/// Render the diff table; empty when there are no changes
pub fn render_diff_table(changes: &[Change<HistogramKey>]) -> String {
    if changes.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&render_header());
    for change in changes {
        out.push_str(&render_row(change));
    }
    out
}

fn render_header() -> String {
    format!(
        "{}{}{}\n",
        format!("| {:<width$}|", "Type name", width = DIFF_TYPE_NAME_WIDTH).yellow(),
        "Gen".yellow(),
        "|    Count|".yellow()
    )
}

fn render_row(change: &Change<HistogramKey>) -> String {
    let name = format!(
        "{:<width$}",
        truncate_type_name(&change.key.type_name),
        width = DIFF_TYPE_NAME_WIDTH
    );
    let magnitude = group_thousands(change.magnitude());
    let count = match change.delta() {
        d if d > 0 => format!(" ↑{:>7}", magnitude).green(),
        d if d < 0 => format!(" ↓{:>7}", magnitude).red(),
        _ => format!(" {:>8}", magnitude).normal(),
    };

    format!(
        "{}{}{}{}{}{}{}\n",
        "| ".yellow(),
        name.normal(),
        "|".yellow(),
        format!(" {} ", change.key.generation).blue(),
        "|".yellow(),
        count,
        "|".yellow()
    )
}

/// Truncate long type names with an ellipsis to fit the name column
pub fn truncate_type_name(name: &str) -> String {
    if name.chars().count() <= DIFF_TYPE_NAME_WIDTH {
        name.to_string()
    } else {
        let head: String = name.chars().take(DIFF_TYPE_NAME_WIDTH - 3).collect();
        format!("{}...", head)
    }
}

/// Format a count with thousands separators (1234567 -> "1,234,567")
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
