//! sanitize.rs: pulls a usable SQL statement out of noisy LLM text and
//! classifies statements against the destructive-operation denylist.
//!
//! Everything here is pure and total. Oversized input is truncated before
//! extraction; `is_safe` rejects it outright.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Upper bound (in chars) on text we are willing to scan.
pub const MAX_SCAN_CHARS: usize = 64 * 1024;

/// Keywords a candidate statement may start with.
pub const LEADING_KEYWORDS: &[&str] = &["SELECT", "WITH", "INSERT", "REPLACE", "UPDATE", "DELETE"];

/// Denylisted operations, matched as whole words, case-insensitive.
pub const FORBIDDEN_OPERATIONS: &[&str] = &["drop", "delete", "update", "alter", "truncate"];

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ``` optionally followed by a `sql`/`sqlite` info string; anything else
    // after the backticks may be the statement itself
    RE.get_or_init(|| Regex::new(r"(?i)```(?:sql(?:ite)?\b)?").expect("fence regex"))
}

fn leading_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", LEADING_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("leading keyword regex")
    })
}

fn forbidden_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_OPERATIONS.join("|"));
        Regex::new(&pattern).expect("forbidden operation regex")
    })
}

fn read_only_forbidden_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(insert|create|attach|detach|pragma|vacuum|reindex)\b|\breplace\s+into\b")
            .expect("read-only regex")
    })
}

fn read_only_lead_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(select|with)\b").expect("read-only lead regex"))
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_to_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Extract the first candidate statement from raw LLM output.
///
/// Fence markers are removed, then everything from the first recognised
/// leading keyword to the end of the text is returned, trimmed. Returns an
/// empty string when no keyword is present.
pub fn extract_statement(raw: &str) -> String {
    let bounded = truncate_to_chars(raw, MAX_SCAN_CHARS);
    let unfenced = fence_re().replace_all(bounded, "");

    let Some(found) = leading_keyword_re().find(&unfenced) else {
        return String::new();
    };

    unfenced[found.start()..]
        .trim()
        .trim_end_matches('`')
        .trim_end()
        .to_string()
}

/// `false` iff the statement contains a denylisted operation as a whole word.
///
/// The empty string is classified safe; callers treat it as "not executable"
/// before ever asking this question.
pub fn is_safe(statement: &str) -> bool {
    if statement.chars().nth(MAX_SCAN_CHARS).is_some() {
        return false;
    }
    !forbidden_re().is_match(statement)
}

/// Byte offset just past the first `;` that sits outside a quoted literal
/// or identifier, if any.
fn statement_end(sql: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in sql.char_indices() {
        match (quote, ch) {
            (None, '\'' | '"' | '`') => quote = Some(ch),
            (Some(open), c) if c == open => quote = None,
            (None, ';') => return Some(idx + 1),
            _ => {}
        }
    }
    None
}

/// The first statement of `sql`, up to and including its terminating `;`.
pub fn first_statement(sql: &str) -> &str {
    match statement_end(sql) {
        Some(end) => &sql[..end],
        None => sql,
    }
}

/// Fold line breaks into single spaces, dropping blank lines.
pub fn to_single_line(sql: &str) -> String {
    sql.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which statements the execution gateway lets through to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyPolicy {
    /// Reject only the denylisted operations (`is_safe`).
    #[default]
    Denylist,
    /// Denylist plus an allowlist: a single SELECT/WITH statement that does
    /// not write, attach, or touch pragmas.
    ReadOnly,
}

impl SafetyPolicy {
    pub fn permits(self, statement: &str) -> bool {
        if !is_safe(statement) {
            return false;
        }
        match self {
            SafetyPolicy::Denylist => true,
            SafetyPolicy::ReadOnly => {
                let trimmed = statement.trim();
                let single = match statement_end(trimmed) {
                    Some(end) => trimmed[end..].trim().is_empty(),
                    None => true,
                };
                single
                    && read_only_lead_re().is_match(trimmed)
                    && !read_only_forbidden_re().is_match(trimmed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_is_unwrapped() {
        let raw = "Here you go:\n```sql\nSELECT * FROM t;\n```\nHope that helps!";
        // trailing prose survives extraction; the synthesizer cuts it
        assert!(extract_statement(raw).starts_with("SELECT * FROM t;"));

        let raw = "```sql\nSELECT * FROM t;\n```";
        assert_eq!(extract_statement(raw), "SELECT * FROM t;");

        let raw = "```\nSELECT * FROM t;\n```";
        assert_eq!(extract_statement(raw), "SELECT * FROM t;");

        let raw = "```SQLite\nSELECT * FROM t;\n```";
        assert_eq!(extract_statement(raw), "SELECT * FROM t;");
    }

    #[test]
    fn keyword_right_after_fence_is_kept() {
        assert_eq!(extract_statement("```SELECT * FROM t;```"), "SELECT * FROM t;");
        assert_eq!(
            extract_statement("Here:\n```WITH a AS (SELECT 1) SELECT * FROM a```"),
            "WITH a AS (SELECT 1) SELECT * FROM a"
        );
    }

    #[test]
    fn prose_before_statement_is_dropped() {
        assert_eq!(extract_statement("Sure! DELETE FROM users;"), "DELETE FROM users;");
        assert_eq!(extract_statement("Answer: `SELECT 1`"), "SELECT 1");
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert_eq!(extract_statement("  select id from users  "), "select id from users");
        assert_eq!(extract_statement("WiTh x AS (SELECT 1) SELECT * FROM x"), "WiTh x AS (SELECT 1) SELECT * FROM x");
    }

    #[test]
    fn no_keyword_gives_empty() {
        assert_eq!(extract_statement(""), "");
        assert_eq!(extract_statement("I cannot answer that."), "");
        assert_eq!(extract_statement("selection of updated rows"), "");
        assert_eq!(extract_statement("```\n```"), "");
    }

    #[test]
    fn extraction_is_idempotent_on_clean_input() {
        for clean in ["SELECT * FROM t;", "INSERT INTO t VALUES (1);", "WITH a AS (SELECT 1) SELECT * FROM a"] {
            let once = extract_statement(clean);
            assert_eq!(once, clean);
            assert_eq!(extract_statement(&once), once);
        }
    }

    #[test]
    fn garbage_input_does_not_panic() {
        let garbage: String = (0u32..200_000).filter_map(|n| char::from_u32(n % 0x2FFF)).collect();
        let _ = extract_statement(&garbage);
        let _ = is_safe(&garbage);

        let huge = "x".repeat(MAX_SCAN_CHARS * 3) + " SELECT 1";
        assert_eq!(extract_statement(&huge), "");
    }

    #[test]
    fn drop_is_unsafe_in_any_case() {
        for sql in ["DROP TABLE x", "drop table x", "DrOp TaBlE x", "SELECT 1; dRoP TABLE x"] {
            assert!(!is_safe(sql), "{sql}");
        }
    }

    #[test]
    fn substring_matches_are_safe() {
        assert!(is_safe("SELECT * FROM dropbox"));
        assert!(is_safe("SELECT updated_at, deleted FROM audit"));
        assert!(is_safe("SELECT * FROM users;"));
        assert!(is_safe(""));
    }

    #[test]
    fn every_denylisted_word_is_caught() {
        for word in FORBIDDEN_OPERATIONS {
            assert!(!is_safe(&format!("{} something", word.to_uppercase())));
        }
    }

    #[test]
    fn oversized_statement_is_rejected() {
        let sql = format!("SELECT '{}'", "a".repeat(MAX_SCAN_CHARS));
        assert!(!is_safe(&sql));
    }

    #[test]
    fn first_statement_respects_quotes() {
        assert_eq!(first_statement("SELECT 1; SELECT 2;"), "SELECT 1;");
        assert_eq!(first_statement("SELECT ';' AS s; DROP TABLE t"), "SELECT ';' AS s;");
        assert_eq!(first_statement("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn single_line_folds_breaks() {
        assert_eq!(to_single_line("SELECT *\n  FROM users\n\n WHERE id = 1;"), "SELECT * FROM users WHERE id = 1;");
    }

    #[test]
    fn read_only_policy_is_stricter() {
        let policy = SafetyPolicy::ReadOnly;
        assert!(policy.permits("SELECT replace(name, 'a', 'b') FROM users;"));
        assert!(policy.permits("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!policy.permits("INSERT INTO t VALUES (1)"));
        assert!(!policy.permits("SELECT 1; SELECT 2"));
        assert!(!policy.permits("SELECT * FROM t; ATTACH 'x.db' AS x"));
        assert!(!policy.permits("PRAGMA table_info(users)"));

        assert!(SafetyPolicy::Denylist.permits("INSERT INTO t VALUES (1)"));
        assert!(!SafetyPolicy::Denylist.permits("DELETE FROM t"));
    }
}
