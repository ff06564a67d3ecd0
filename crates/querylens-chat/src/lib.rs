//! QueryLens chat crate - streaming turns against a conversational SQL agent.
//!
//! Provides:
//! - The stream coordinator driving one turn from question to stored answer
//! - Collaborator traits for the agent, SQL execution and result files
//! - SQL and result file recovery from free agent text
//! - Result file attribution and regeneration
//! - Conversation context for follow-up questions

pub mod agent;
pub mod artifacts;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod extractor;

pub use agent::{
    AgentError, AgentFragment, ArtifactStore, ConversationalAgent, FragmentStream, QueryTable,
    RequestContext, SqlExecutor,
};
pub use artifacts::{ArtifactLocator, ArtifactSnapshot, CsvArtifactStore, Resolution};
pub use context::ContextEnhancer;
pub use coordinator::{CoordinatorState, StreamCoordinator, TurnRequest, TurnSummary};
pub use error::ChatError;
pub use extractor::{extract_artifact_filename, extract_sql, sql_from_tool_args};
