//! Value-stripping normalization for SQL statements, questions and tool
//! arguments, plus the content-derived ids built from the results.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

// =============================================================================
// Compiled regexes (compiled once, reused across calls)
// =============================================================================

static LINE_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)--.*$").unwrap());

static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static STRING_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'[^']*'").unwrap());

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(FROM|JOIN|INTO|UPDATE)\s+\w+").unwrap());

static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(SELECT)\s+\w+").unwrap());

pub const STRING_PLACEHOLDER: &str = "'STRING_LITERAL'";
pub const NUMERIC_PLACEHOLDER: &str = "NUMERIC_LITERAL";
pub const TABLE_PLACEHOLDER: &str = "TABLE_NAME";
pub const COLUMN_PLACEHOLDER: &str = "COLUMN_NAME";
pub const NUMBER_PLACEHOLDER: &str = "NUMBER";

/// Length of the hex prefix used for content-derived ids.
const ID_HEX_LEN: usize = 12;

// =============================================================================
// SQL
// =============================================================================

/// Reduce a SQL statement to its literal-free shape.
///
/// Only the identifier directly after FROM/JOIN/INTO/UPDATE and the first
/// selected identifier are replaced; nested queries keep their inner names.
pub fn normalize_sql(sql: &str) -> String {
    if sql.trim().is_empty() {
        return String::new();
    }
    let sql = LINE_COMMENT_RE.replace_all(sql, "");
    let sql = BLOCK_COMMENT_RE.replace_all(&sql, " ");
    let sql = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let sql = STRING_LITERAL_RE.replace_all(&sql, STRING_PLACEHOLDER);
    let sql = NUMBER_RE.replace_all(&sql, NUMERIC_PLACEHOLDER);
    let sql = TABLE_RE.replace_all(&sql, format!("${{1}} {}", TABLE_PLACEHOLDER).as_str());
    let sql = COLUMN_RE.replace_all(&sql, format!("${{1}} {}", COLUMN_PLACEHOLDER).as_str());
    sql.into_owned()
}

// =============================================================================
// Questions
// =============================================================================

/// Normalizes natural-language questions against a fixed domain vocabulary.
#[derive(Debug, Clone)]
pub struct QuestionNormalizer {
    nouns: Option<Regex>,
}

impl QuestionNormalizer {
    /// Build a normalizer replacing each of `domain_nouns` (whole words,
    /// case-insensitive) with [`TABLE_PLACEHOLDER`].
    pub fn new<S: AsRef<str>>(domain_nouns: &[S]) -> Self {
        let alts: Vec<String> = domain_nouns
            .iter()
            .map(|n| n.as_ref().trim())
            .filter(|n| !n.is_empty())
            .map(regex::escape)
            .collect();
        let nouns = if alts.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b(?:{})\b", alts.join("|"))).ok()
        };
        Self { nouns }
    }

    /// Lower-case the question, then replace digit runs and domain nouns with
    /// placeholders.
    pub fn normalize(&self, question: &str) -> String {
        let lowered = question.trim().to_lowercase();
        let numbered = NUMBER_RE.replace_all(&lowered, NUMBER_PLACEHOLDER);
        match &self.nouns {
            Some(re) => re.replace_all(&numbered, TABLE_PLACEHOLDER).into_owned(),
            None => numbered.into_owned(),
        }
    }
}

impl Default for QuestionNormalizer {
    fn default() -> Self {
        Self::new(&["customers", "orders", "products", "employees", "payments"])
    }
}

// =============================================================================
// Tool arguments
// =============================================================================

/// Reduce tool arguments to their shape.
///
/// `sql` strings become their normalized SQL, other strings have digit runs
/// replaced, and scalars, lists and objects collapse to type markers.
pub fn args_pattern(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let shaped: Map<String, Value> = map
                .iter()
                .map(|(key, value)| (key.clone(), arg_shape(key, value)))
                .collect();
            Value::Object(shaped)
        }
        other => arg_shape("", other),
    }
}

fn arg_shape(key: &str, value: &Value) -> Value {
    match value {
        Value::String(s) if key == "sql" => Value::String(normalize_sql(s)),
        Value::String(s) => Value::String(NUMBER_RE.replace_all(s, NUMBER_PLACEHOLDER).into_owned()),
        Value::Number(_) => json!("NUMERIC_VALUE"),
        Value::Bool(_) => json!("BOOL"),
        Value::Null => json!("NULL"),
        Value::Array(items) => Value::Array(items.iter().map(|_| json!("LIST_VALUE")).collect()),
        Value::Object(_) => json!({"DICT_VALUE": "..."}),
    }
}

// =============================================================================
// Similarity and ids
// =============================================================================

/// Jaccard index of the whitespace-tokenized, lower-cased word sets.
///
/// Returns 0.0 if either side has no words.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Stable hex digest of the given parts, separated by NUL bytes.
pub fn content_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..ID_HEX_LEN].to_string()
}

/// Id of the query pattern with this normalized SQL shape.
pub fn query_pattern_id(sql_pattern: &str) -> String {
    format!("sql_{}", content_id(&[sql_pattern]))
}

/// Id of the tool usage pattern for this tool and normalized question.
pub fn tool_pattern_id(tool_name: &str, question_pattern: &str) -> String {
    format!("{}_{}", tool_name, content_id(&[tool_name, question_pattern]))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- SQL ----

    #[test]
    fn test_normalize_sql_replaces_literals() {
        let shape = normalize_sql("SELECT name FROM customers WHERE city = 'Paris' AND age > 30");
        assert_eq!(
            shape,
            "SELECT COLUMN_NAME FROM TABLE_NAME WHERE city = 'STRING_LITERAL' AND age > NUMERIC_LITERAL"
        );
    }

    #[test]
    fn test_normalize_sql_strips_comments_and_whitespace() {
        let sql = "-- top customers\nSELECT  id\n  FROM /* main */ orders\n LIMIT 10";
        assert_eq!(
            normalize_sql(sql),
            "SELECT COLUMN_NAME FROM TABLE_NAME LIMIT NUMERIC_LITERAL"
        );
    }

    #[test]
    fn test_normalize_sql_same_shape_for_different_values() {
        let a = normalize_sql("SELECT id FROM orders WHERE total > 100");
        let b = normalize_sql("select id from invoices where total > 5");
        assert_eq!(a.to_lowercase(), b.to_lowercase());
    }

    #[test]
    fn test_normalize_sql_deterministic() {
        let sql = "SELECT c.name, COUNT(*) FROM customers c JOIN orders o ON o.cid = c.id GROUP BY c.name";
        assert_eq!(normalize_sql(sql), normalize_sql(sql));
        assert!(normalize_sql(sql).contains("JOIN TABLE_NAME"));
    }

    #[test]
    fn test_normalize_sql_star_is_kept() {
        assert_eq!(
            normalize_sql("SELECT * FROM t"),
            "SELECT * FROM TABLE_NAME"
        );
    }

    #[test]
    fn test_normalize_sql_empty() {
        assert_eq!(normalize_sql("   "), "");
    }

    // ---- Questions ----

    #[test]
    fn test_normalize_question() {
        let normalizer = QuestionNormalizer::default();
        assert_eq!(
            normalizer.normalize("Show the top 10 Customers by revenue"),
            "show the top NUMBER TABLE_NAME by revenue"
        );
    }

    #[test]
    fn test_normalize_question_custom_vocabulary() {
        let normalizer = QuestionNormalizer::new(&["invoices"]);
        assert_eq!(
            normalizer.normalize("List invoices from orders"),
            "list TABLE_NAME from orders"
        );
    }

    #[test]
    fn test_normalize_question_empty_vocabulary() {
        let normalizer = QuestionNormalizer::new::<&str>(&[]);
        assert_eq!(normalizer.normalize("Orders in 2024"), "orders in NUMBER");
    }

    // ---- Args ----

    #[test]
    fn test_args_pattern_shapes() {
        let args = json!({
            "sql": "SELECT id FROM t WHERE x = 5",
            "label": "page 2 of 3",
            "limit": 10,
            "columns": ["a", "b"],
            "options": {"header": true},
            "verbose": false,
            "extra": null
        });
        let shape = args_pattern(&args);
        assert_eq!(
            shape["sql"],
            "SELECT COLUMN_NAME FROM TABLE_NAME WHERE x = NUMERIC_LITERAL"
        );
        assert_eq!(shape["label"], "page NUMBER of NUMBER");
        assert_eq!(shape["limit"], "NUMERIC_VALUE");
        assert_eq!(shape["columns"], json!(["LIST_VALUE", "LIST_VALUE"]));
        assert_eq!(shape["options"], json!({"DICT_VALUE": "..."}));
        assert_eq!(shape["verbose"], "BOOL");
        assert_eq!(shape["extra"], "NULL");
    }

    // ---- Similarity ----

    #[test]
    fn test_jaccard_identity() {
        assert!((jaccard("show top TABLE_NAME", "show top TABLE_NAME") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_jaccard_disjoint() {
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn test_jaccard_empty() {
        assert_eq!(jaccard("", "alpha"), 0.0);
        assert_eq!(jaccard("alpha", "   "), 0.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        // {a, b, c} vs {b, c, d}: 2 / 4
        assert!((jaccard("a b c", "b c d") - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_jaccard_is_case_insensitive() {
        assert!((jaccard("Show Tables", "show tables") - 1.0).abs() < f64::EPSILON);
    }

    // ---- Ids ----

    #[test]
    fn test_ids_are_stable() {
        let shape = normalize_sql("SELECT id FROM t");
        assert_eq!(query_pattern_id(&shape), query_pattern_id(&shape));
        assert!(query_pattern_id(&shape).starts_with("sql_"));
        assert_eq!(query_pattern_id(&shape).len(), 4 + 12);
    }

    #[test]
    fn test_tool_id_depends_on_tool_and_question() {
        let a = tool_pattern_id("run_sql", "show TABLE_NAME");
        let b = tool_pattern_id("visualize", "show TABLE_NAME");
        let c = tool_pattern_id("run_sql", "count TABLE_NAME");
        assert!(a.starts_with("run_sql_"));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_content_id_separates_parts() {
        assert_ne!(content_id(&["ab", "c"]), content_id(&["a", "bc"]));
    }
}
