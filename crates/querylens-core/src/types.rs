use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata attached to turns, patterns and golden queries.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Sentinel user id for requests that carry no user identifier.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Sentinel conversation id for requests that carry no conversation identifier.
pub const DEFAULT_CONVERSATION: &str = "default";

// =============================================================================
// Conversation scope
// =============================================================================

/// The (user, conversation) pair that isolates conversation memory.
///
/// Identifiers are trimmed; missing or blank ones normalize to
/// [`ANONYMOUS_USER`] and [`DEFAULT_CONVERSATION`]. A sentinel is an
/// ordinary value for comparison purposes, so `("anonymous", "default")` and
/// `("alice", "default")` are different scopes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationScope {
    pub user_id: String,
    pub conversation_id: String,
}

impl ConversationScope {
    pub fn new(user_id: Option<&str>, conversation_id: Option<&str>) -> Self {
        Self {
            user_id: normalize_identifier(user_id, ANONYMOUS_USER),
            conversation_id: normalize_identifier(conversation_id, DEFAULT_CONVERSATION),
        }
    }

    /// Whether the user part is the anonymous sentinel.
    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER
    }
}

impl Default for ConversationScope {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl fmt::Display for ConversationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.conversation_id)
    }
}

fn normalize_identifier(raw: Option<&str>, sentinel: &str) -> String {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => sentinel.to_string(),
    }
}

// =============================================================================
// Conversation turn
// =============================================================================

/// One completed question/answer exchange.
///
/// Turns are immutable once appended to the store; the store hands out clones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub scope: ConversationScope,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub response: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time.
    pub fn new(
        scope: ConversationScope,
        question: impl Into<String>,
        response: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self::at(scope, Utc::now(), question, response, metadata)
    }

    /// Create a turn with an explicit timestamp.
    pub fn at(
        scope: ConversationScope,
        timestamp: DateTime<Utc>,
        question: impl Into<String>,
        response: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            timestamp,
            question: question.into(),
            response: response.into(),
            metadata,
        }
    }

    /// Text searched by keyword filters: question and response joined by a space.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.question, self.response)
    }
}

// =============================================================================
// Artifacts and outcomes
// =============================================================================

/// Handle of a generated result file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Location of the file on disk.
    pub path: PathBuf,
    /// Stable URL under which the file is served.
    pub url: String,
}

impl ArtifactRef {
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// Explicit result of one turn, reported to the learning engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Success {
        sql: Option<String>,
        artifact: Option<ArtifactRef>,
    },
    Failure {
        sql: Option<String>,
        reason: String,
    },
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TurnOutcome::Success { .. })
    }

    pub fn sql(&self) -> Option<&str> {
        match self {
            TurnOutcome::Success { sql, .. } | TurnOutcome::Failure { sql, .. } => sql.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_missing_identifiers_use_sentinels() {
        let scope = ConversationScope::new(None, None);
        assert_eq!(scope.user_id, "anonymous");
        assert_eq!(scope.conversation_id, "default");
        assert!(scope.is_anonymous());
        assert_eq!(scope, ConversationScope::default());
    }

    #[test]
    fn test_scope_blank_identifiers_use_sentinels() {
        let scope = ConversationScope::new(Some("   "), Some(""));
        assert_eq!(scope, ConversationScope::default());
    }

    #[test]
    fn test_scope_trims_identifiers() {
        let scope = ConversationScope::new(Some(" alice "), Some("sales\n"));
        assert_eq!(scope.user_id, "alice");
        assert_eq!(scope.conversation_id, "sales");
    }

    #[test]
    fn test_sentinel_scope_distinct_from_explicit() {
        let anon = ConversationScope::new(None, None);
        let alice = ConversationScope::new(Some("alice"), None);
        assert_ne!(anon, alice);
        assert_eq!(alice.conversation_id, "default");
    }

    #[test]
    fn test_scope_display() {
        let scope = ConversationScope::new(Some("a|b"), Some("c"));
        assert_eq!(scope.to_string(), "a|b/c");
    }

    #[test]
    fn test_turn_round_trip() {
        let mut metadata = Metadata::new();
        metadata.insert("sql_query".into(), serde_json::json!("SELECT 1"));
        let turn = ConversationTurn::new(
            ConversationScope::new(Some("u"), Some("c")),
            "how many?",
            "one",
            metadata,
        );
        let json = serde_json::to_string(&turn).unwrap();
        let back: ConversationTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
        assert_eq!(back.searchable_text(), "how many? one");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = TurnOutcome::Success {
            sql: Some("SELECT 1".into()),
            artifact: None,
        };
        assert!(ok.is_success());
        assert_eq!(ok.sql(), Some("SELECT 1"));

        let failed = TurnOutcome::Failure {
            sql: None,
            reason: "boom".into(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.sql(), None);

        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"], "failure");
    }

    #[test]
    fn test_artifact_file_name() {
        let artifact = ArtifactRef {
            path: PathBuf::from("/tmp/query_results/query_results_abcd1234.csv"),
            url: "/static/query_results_abcd1234.csv".into(),
        };
        assert_eq!(
            artifact.file_name().as_deref(),
            Some("query_results_abcd1234.csv")
        );
    }
}
