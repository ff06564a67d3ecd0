use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ArtifactRef;

/// Caller-visible events emitted while a turn streams.
///
/// Events are ephemeral: they are forwarded to the caller and never
/// persisted. A well-formed turn emits `Start`, any number of `Chunk`s,
/// at most one `Sql`, at most one `Artifact`, and then exactly one of
/// `Complete` or `Error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The turn was accepted and streaming begins.
    Start { timestamp: DateTime<Utc> },

    /// A text fragment from the agent, forwarded in arrival order.
    Chunk { text: String },

    /// The first SQL statement the agent asked to execute.
    Sql { sql: String },

    /// A result file attributable to this turn.
    Artifact { reference: ArtifactRef },

    /// Terminal success event.
    Complete {
        answer: String,
        sql: String,
        artifact: Option<ArtifactRef>,
    },

    /// Terminal failure event.
    Error { error: String },
}

impl StreamEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Sql { .. } => "sql",
            StreamEvent::Artifact { .. } => "artifact",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}
