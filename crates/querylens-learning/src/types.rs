use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use querylens_core::Metadata;

/// Normalized shape of a SQL statement that has run successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPattern {
    pub pattern_id: String,
    pub question_pattern: String,
    pub sql_pattern: String,
    pub tool_name: String,
    pub success_count: u64,
    pub last_used: DateTime<Utc>,
    /// Carries `original_question` and `original_sql` from the first use.
    #[serde(default)]
    pub metadata: Metadata,
}

impl QueryPattern {
    pub fn original_question(&self) -> Option<&str> {
        self.metadata.get("original_question").and_then(Value::as_str)
    }
}

/// Normalized shape of a tool call, with its success and failure tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsagePattern {
    pub pattern_id: String,
    pub tool_name: String,
    pub question_pattern: String,
    pub args_pattern: Value,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ToolUsagePattern {
    pub fn success_rate(&self) -> f64 {
        ratio(self.success_count, self.failure_count)
    }
}

/// On-disk layout of the pattern file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternState {
    #[serde(default)]
    pub query_patterns: BTreeMap<String, QueryPattern>,
    #[serde(default)]
    pub tool_patterns: BTreeMap<String, ToolUsagePattern>,
}

/// Aggregate learning progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    pub query_patterns_count: usize,
    pub tool_patterns_count: usize,
    pub total_successful_queries: u64,
    pub total_tool_success: u64,
    pub total_tool_failure: u64,
    pub success_rate: f64,
}

impl LearningStats {
    pub(crate) fn from_state(state: &PatternState) -> Self {
        let total_successful_queries = state.query_patterns.values().map(|p| p.success_count).sum();
        let total_tool_success = state.tool_patterns.values().map(|p| p.success_count).sum();
        let total_tool_failure = state.tool_patterns.values().map(|p| p.failure_count).sum();
        Self {
            query_patterns_count: state.query_patterns.len(),
            tool_patterns_count: state.tool_patterns.len(),
            total_successful_queries,
            total_tool_success,
            total_tool_failure,
            success_rate: ratio(total_tool_success, total_tool_failure),
        }
    }
}

/// `success / (success + failure)`, or 0.0 when nothing was recorded.
pub(crate) fn ratio(success: u64, failure: u64) -> f64 {
    let total = success + failure;
    if total == 0 {
        0.0
    } else {
        success as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_pattern(success: u64, failure: u64) -> ToolUsagePattern {
        ToolUsagePattern {
            pattern_id: "run_sql_abc".to_string(),
            tool_name: "run_sql".to_string(),
            question_pattern: "list TABLE_NAME".to_string(),
            args_pattern: json!({"sql": "SELECT COLUMN_NAME FROM TABLE_NAME"}),
            success_count: success,
            failure_count: failure,
            last_used: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_ratio_handles_zero() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(3, 1), 0.75);
    }

    #[test]
    fn test_stats_from_state() {
        let mut state = PatternState::default();
        state
            .tool_patterns
            .insert("a".to_string(), tool_pattern(3, 1));
        state
            .tool_patterns
            .insert("b".to_string(), tool_pattern(1, 3));

        let stats = LearningStats::from_state(&state);
        assert_eq!(stats.tool_patterns_count, 2);
        assert_eq!(stats.query_patterns_count, 0);
        assert_eq!(stats.total_tool_success, 4);
        assert_eq!(stats.total_tool_failure, 4);
        assert_eq!(stats.success_rate, 0.5);
    }

    #[test]
    fn test_pattern_state_tolerates_missing_sections() {
        let state: PatternState = serde_json::from_str("{}").unwrap();
        assert!(state.query_patterns.is_empty());
        assert!(state.tool_patterns.is_empty());
    }

    #[test]
    fn test_original_question_from_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("original_question".to_string(), json!("How many orders?"));
        let pattern = QueryPattern {
            pattern_id: "sql_1".to_string(),
            question_pattern: "how many TABLE_NAME?".to_string(),
            sql_pattern: "SELECT COLUMN_NAME".to_string(),
            tool_name: "run_sql".to_string(),
            success_count: 1,
            last_used: Utc::now(),
            metadata,
        };
        assert_eq!(pattern.original_question(), Some("How many orders?"));
        assert_eq!(tool_pattern(1, 1).success_rate(), 0.5);
    }
}
