//! Recovery of SQL statements and result file names from free agent text.
//!
//! Extraction is best effort. A miss is an empty string or `None`, never an
//! error.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

// =============================================================================
// Compiled regex sets (compiled once, reused across calls)
// =============================================================================

static FENCED_SQL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:sql|SQL)\s*(.*?)\s*```").unwrap());

/// Statement shapes tried in order after the fenced block.
static STATEMENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)\b(SHOW\s+(?:TABLES|DATABASES|COLUMNS|INDEXES|CREATE\s+TABLE)[^;]*)(?:;|$)",
        r"(?is)\b(SELECT\s+.*?FROM\s+.*?(?:\s+WHERE\s+.*?)?(?:\s+GROUP BY\s+.*?)?(?:\s+ORDER BY\s+.*?)?(?:\s+LIMIT\s+\d+)?)(?:\s*;|$)",
        r"(?is)\b(DESCRIBE\s+\w+[^;]*)(?:;|$)",
        r"(?is)\b(SHOW\s+CREATE\s+TABLE\s+\w+[^;]*)(?:;|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid statement regex"))
    .collect()
});

/// Leading keywords for the last-resort heuristic, in priority order.
static KEYWORD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "WITH"]
        .iter()
        .map(|k| Regex::new(&format!(r"(?i)\b{}\b", k)).expect("Invalid keyword regex"))
        .collect()
});

static STATEMENT_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;.]\s*\n|\n\n|$").unwrap());

static TRAILING_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[;.]\s*$").unwrap());

static SAVED_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Results saved to file:|Saved to file:)\s*([\w-]+\.csv)").unwrap()
});

static CSV_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([\w-]+\.csv)").unwrap());

/// Marker identifying generated result files among arbitrary CSV mentions.
const RESULT_FILE_MARKER: &str = "query_results";

/// Minimum whitespace tokens for a heuristic match to count as a statement.
const MIN_HEURISTIC_TOKENS: usize = 3;

// =============================================================================
// SQL
// =============================================================================

/// Best-effort recovery of the SQL statement an agent mentioned in `text`.
///
/// A fenced `sql` block wins outright. Otherwise the first matching
/// statement shape is used, and failing that the text following the first
/// SQL keyword up to the end of its sentence. Returns an empty string when
/// nothing looks like SQL.
pub fn extract_sql(text: &str) -> String {
    if let Some(caps) = FENCED_SQL_RE.captures(text) {
        return caps[1].trim().to_string();
    }

    for pattern in STATEMENT_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let sql = caps[1].trim();
            return TRAILING_PUNCT_RE.replace(sql, "").trim_end().to_string();
        }
    }

    for keyword in KEYWORD_PATTERNS.iter() {
        let Some(found) = keyword.find(text) else {
            continue;
        };
        let remaining = &text[found.start()..];
        let end = STATEMENT_END_RE
            .find(remaining)
            .map_or(remaining.len(), |m| m.start());
        let sql = remaining[..end].trim();
        if sql.split_whitespace().count() >= MIN_HEURISTIC_TOKENS {
            return sql.to_string();
        }
    }

    debug!(chars = text.len(), "No SQL found in text");
    String::new()
}

/// The `sql` argument of a call to the SQL execution tool, if this is one.
pub fn sql_from_tool_args(sql_tool_name: &str, tool_name: &str, args: &Value) -> Option<String> {
    if tool_name != sql_tool_name {
        return None;
    }
    args.get("sql")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Artifacts
// =============================================================================

/// A result file name announced in `text`, such as
/// `"Results saved to file: query_results_ab12cd34.csv"`.
///
/// Falls back to any CSV name containing `query_results`.
pub fn extract_artifact_filename(text: &str) -> Option<String> {
    if let Some(caps) = SAVED_FILE_RE.captures(text) {
        return Some(caps[1].to_string());
    }
    CSV_NAME_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|name| name.contains(RESULT_FILE_MARKER))
}
