//! Collaborator boundaries: the conversational agent, the SQL execution tool
//! and the artifact store.
//!
//! The coordinator only ever sees these traits, so production backends and
//! scripted test doubles are interchangeable.

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::Stream;

use querylens_core::{ArtifactRef, ConversationScope, Metadata};

use crate::error::ChatError;

/// One item of an agent's streamed reply.
///
/// The agent boundary decides the kind of every fragment; the coordinator
/// never inspects untyped payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AgentFragment {
    /// Answer text, in order.
    Text(String),
    /// The agent invoked a tool.
    ToolCall { tool_name: String, args: Value },
    /// A tool finished.
    ToolResult {
        tool_name: String,
        success: bool,
        content: String,
    },
}

impl AgentFragment {
    pub fn text(s: impl Into<String>) -> Self {
        AgentFragment::Text(s.into())
    }

    pub fn tool_call(tool_name: impl Into<String>, args: Value) -> Self {
        AgentFragment::ToolCall {
            tool_name: tool_name.into(),
            args,
        }
    }
}

/// A failure reported by the agent mid-stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct AgentError {
    pub message: String,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<AgentError> for ChatError {
    fn from(err: AgentError) -> Self {
        ChatError::Agent(err.message)
    }
}

/// The agent's reply as an ordered stream of fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<AgentFragment, AgentError>> + Send>>;

/// Who is asking, passed through to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub scope: ConversationScope,
    pub metadata: Metadata,
}

impl RequestContext {
    pub fn new(scope: ConversationScope) -> Self {
        Self {
            scope,
            metadata: Metadata::new(),
        }
    }
}

/// An LLM-backed agent that answers questions, possibly calling tools.
pub trait ConversationalAgent: Send + Sync {
    fn send_message(
        &self,
        ctx: &RequestContext,
        message: &str,
        conversation_id: &str,
    ) -> FragmentStream;
}

/// Tabular result of a SQL statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The SQL execution tool, used to regenerate a missing result file.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn run_sql(&self, sql: &str) -> Result<QueryTable, ChatError>;
}

/// Persists tabular results and maps files to stable URLs.
pub trait ArtifactStore: Send + Sync {
    /// Write `table` as a result file for `sql` and return its handle.
    fn save(&self, sql: &str, table: &QueryTable) -> Result<ArtifactRef, ChatError>;

    /// The handle of an existing file.
    fn reference(&self, path: &Path) -> ArtifactRef;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fragment_constructors() {
        assert_eq!(AgentFragment::text("hi"), AgentFragment::Text("hi".to_string()));
        let call = AgentFragment::tool_call("run_sql", json!({"sql": "SELECT 1"}));
        assert!(matches!(call, AgentFragment::ToolCall { ref tool_name, .. } if tool_name == "run_sql"));
    }

    #[test]
    fn test_fragment_serde_tag() {
        let call = AgentFragment::tool_call("run_sql", json!({"sql": "SELECT 1"}));
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["kind"], "tool_call");
        assert_eq!(value["data"]["tool_name"], "run_sql");

        let text = serde_json::to_value(AgentFragment::text("hi")).unwrap();
        assert_eq!(text, json!({"kind": "text", "data": "hi"}));
    }

    #[test]
    fn test_agent_error_into_chat_error() {
        let err: ChatError = AgentError::new("model overloaded").into();
        assert_eq!(err.to_string(), "agent error: model overloaded");
    }

    #[test]
    fn test_query_table_empty() {
        assert!(QueryTable::default().is_empty());
        let table = QueryTable::new(vec!["id".into()], vec![vec!["1".into()]]);
        assert!(!table.is_empty());
    }
}
