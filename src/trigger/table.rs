//! Extraction of the trend table from a final answer.
//!
//! Model output is untrusted: every failure mode here (missing anchor, missing
//! table, short or malformed rows) yields fewer rows, never an error.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const COLUMNS: usize = 6;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex must compile"));

/// One row of the trend table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRow {
    pub name: String,
    pub lifecycle: String,
    pub momentum: String,
    pub score: f64,
    pub rationale: String,
    pub visual_ref: String,
}

/// Header line of the table the model is asked to produce.
pub fn header_markdown() -> &'static str {
    "| Name | Lifecycle | Momentum | Score | Rationale | Visual Ref |\n|---|---|---|---|---|---|"
}

/// Parse the pipe table that follows `anchor` in `text`.
pub fn extract(text: &str, anchor: &str) -> Vec<TrendRow> {
    let Some(after_anchor) = find_anchor(text, anchor) else {
        return Vec::new();
    };
    table_lines(after_anchor)
        .into_iter()
        .filter_map(parse_row)
        .collect()
}

/// Text after the first line containing `anchor`, matched case-insensitively.
fn find_anchor<'t>(text: &'t str, anchor: &str) -> Option<&'t str> {
    let needle = anchor.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        offset += line.len();
        if line.to_lowercase().contains(&needle) {
            return Some(&text[offset..]);
        }
    }
    None
}

/// The first contiguous block of pipe lines, skipping prose before it. A new
/// heading before any table ends the search.
fn table_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.starts_with('|') {
            lines.push(line);
        } else if !lines.is_empty() || line.starts_with('#') {
            break;
        }
    }
    lines
}

fn parse_row(line: &str) -> Option<TrendRow> {
    let cells = split_cells(line);
    if cells.len() < COLUMNS || is_separator(&cells) {
        return None;
    }
    let score = parse_score(&cells[3])?;
    let name = cells[0].clone();
    if name.is_empty() {
        return None;
    }
    Some(TrendRow {
        name,
        lifecycle: cells[1].clone(),
        momentum: cells[2].clone(),
        score,
        rationale: cells[4].clone(),
        visual_ref: cells[5].clone(),
    })
}

/// Split a pipe row into trimmed cells. `\|` is a literal pipe.
fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = if inner.ends_with('|') && !inner.ends_with("\\|") {
        &inner[..inner.len() - 1]
    } else {
        inner
    };

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            other => current.push(other),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_separator(cells: &[String]) -> bool {
    cells
        .iter()
        .all(|cell| !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':' | ' ')))
}

/// First numeric token of the cell (`8/10` is 8, `**7.5**` is 7.5).
fn parse_score(cell: &str) -> Option<f64> {
    NUMBER_RE
        .find(cell)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ANSWER: &str = "\
Here is the analysis.

## Trend Table

The strongest signals this season:

| Name | Lifecycle | Momentum | Score | Rationale | Visual Ref |
|------|-----------|----------|-------|-----------|------------|
| Quiet luxury | Peak | Stable | 8.5 | Broad adoption | img-01 |
| Sheer layers | Emerging | Rising | 7/10 | Runway \\| street | img-02 |
| Broken row | Peak |
| Unscored | Peak | Flat | n/a | none | img-03 |

Closing remarks.
";

    #[test]
    fn parses_rows_after_anchor() {
        let rows = extract(ANSWER, "Trend Table");
        assert_eq!(
            rows,
            vec![
                TrendRow {
                    name: "Quiet luxury".into(),
                    lifecycle: "Peak".into(),
                    momentum: "Stable".into(),
                    score: 8.5,
                    rationale: "Broad adoption".into(),
                    visual_ref: "img-01".into(),
                },
                TrendRow {
                    name: "Sheer layers".into(),
                    lifecycle: "Emerging".into(),
                    momentum: "Rising".into(),
                    score: 7.0,
                    rationale: "Runway | street".into(),
                    visual_ref: "img-02".into(),
                },
            ]
        );
    }

    #[test]
    fn anchor_match_is_case_insensitive() {
        assert_eq!(extract(ANSWER, "trend table").len(), 2);
    }

    #[test]
    fn missing_anchor_yields_empty_table() {
        assert!(extract(ANSWER, "Moodboard").is_empty());
        assert!(extract(ANSWER, "  ").is_empty());
    }

    #[test]
    fn heading_before_table_stops_search() {
        let text = "## Trend Table\nNo table here.\n## Other\n| a | b | c | 1 | e | f |\n";
        assert!(extract(text, "Trend Table").is_empty());
    }

    #[test]
    fn garbage_never_panics() {
        for text in ["## Trend Table", "## Trend Table\n|", "## Trend Table\n||||||\n|\\", "## Trend Table\n| é | ü | ö | 1 | ß | ç |"] {
            let _ = extract(text, "Trend Table");
        }
        assert_eq!(extract("## Trend Table\n| é | ü | ö | 1 | ß | ç |", "Trend Table").len(), 1);
    }
}
