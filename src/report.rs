//! report.rs: plain-text rendering of answers, shared by the CLI and the
//! Slack callback message.

use serde_json::Value;

use crate::database::Row;
use crate::pipeline::Answer;

/// Cell values longer than this are cut with an ellipsis.
const MAX_CELL_CHARS: usize = 60;

fn cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_CHARS {
        let cut: String = text.chars().take(MAX_CELL_CHARS - 1).collect();
        format!("{cut}…")
    } else {
        text
    }
}

/// Box-drawn table of at most `max_rows` rows, followed by a row count.
pub fn render_table(rows: &[Row], max_rows: usize) -> String {
    let Some(first) = rows.first() else {
        return "(no results)".to_string();
    };

    let columns: Vec<&String> = first.keys().collect();
    let shown: Vec<Vec<String>> = rows
        .iter()
        .take(max_rows)
        .map(|row| columns.iter().map(|c| row.get(*c).map(cell).unwrap_or_default()).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &shown {
        for (i, val) in row.iter().enumerate() {
            widths[i] = widths[i].max(val.chars().count());
        }
    }

    let pad = |s: &str, w: usize| format!("{s}{}", " ".repeat(w.saturating_sub(s.chars().count())));
    let line = |cells: Vec<String>| format!("│ {} │", cells.join(" │ "));

    let header = line(columns.iter().enumerate().map(|(i, c)| pad(c, widths[i])).collect());
    let rule = "─".repeat(header.chars().count().saturating_sub(2));

    let mut out = Vec::with_capacity(shown.len() + 5);
    out.push(format!("┌{rule}┐"));
    out.push(header);
    out.push(format!("├{rule}┤"));
    for row in &shown {
        out.push(line(row.iter().enumerate().map(|(i, v)| pad(v, widths[i])).collect()));
    }
    out.push(format!("└{rule}┘"));

    if rows.len() > max_rows {
        out.push(format!("  … {} more rows", rows.len() - max_rows));
    }
    out.push(format!("  {} row(s)", rows.len()));
    out.join("\n")
}

/// Slack-flavoured message for a finished answer.
pub fn render_message(answer: &Answer, max_rows: usize) -> String {
    let mut text = format!("*Question:* {}", answer.question);
    if let Some(sql) = &answer.sql {
        text.push_str(&format!("\n*SQL:* `{sql}`"));
    }
    match &answer.result {
        Ok(rows) => text.push_str(&format!("\n```\n{}\n```", render_table(rows, max_rows))),
        Err(e) => text.push_str(&format!("\n:warning: {}", e.user_message())),
    }
    text
}
