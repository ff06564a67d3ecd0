//! Stream coordinator: drives one agent turn from question to persisted
//! answer.
//!
//! A turn moves through `Init → Streaming → Finalizing → Done`, or ends in
//! `Error` when the agent fails. Events reach the caller through an mpsc
//! sender in the order they are produced.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use querylens_core::config::{QueryLensConfig, StreamConfig};
use querylens_core::{
    ArtifactRef, ConversationScope, ConversationTurn, Metadata, StreamEvent, TurnOutcome,
};
use querylens_learning::LearningEngine;
use querylens_storage::ConversationStore;

use crate::agent::{AgentFragment, ArtifactStore, ConversationalAgent, RequestContext, SqlExecutor};
use crate::artifacts::ArtifactLocator;
use crate::context::ContextEnhancer;
use crate::error::ChatError;
use crate::extractor::{extract_artifact_filename, extract_sql, sql_from_tool_args};

/// Lifecycle of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Init,
    Streaming,
    Finalizing,
    Done,
    Error,
}

/// A question submitted for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub question: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Caller metadata stored with the turn.
    pub metadata: Metadata,
}

impl TurnRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn scoped(mut self, user_id: &str, conversation_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self.conversation_id = Some(conversation_id.to_string());
        self
    }
}

/// What a finished turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub scope: ConversationScope,
    pub state: CoordinatorState,
    pub answer: String,
    pub sql: String,
    pub artifact: Option<ArtifactRef>,
    /// Agent fragments consumed.
    pub fragments: usize,
    pub truncated: bool,
    pub cancelled: bool,
}

/// Everything accumulated while the agent streams.
#[derive(Debug, Default)]
struct TurnBuffer {
    text: String,
    tool_sql: Option<String>,
    /// Error reported by the most recent SQL tool result, if it failed.
    sql_tool_failure: Option<String>,
    fragments: usize,
    truncated: bool,
    cancelled: bool,
}

/// Coordinates the agent, the conversation store, the learning engine and
/// artifact recovery for each turn.
pub struct StreamCoordinator {
    agent: Arc<dyn ConversationalAgent>,
    store: Arc<ConversationStore>,
    learning: Arc<LearningEngine>,
    context: Option<ContextEnhancer>,
    locator: ArtifactLocator,
    artifact_store: Arc<dyn ArtifactStore>,
    executor: Option<Arc<dyn SqlExecutor>>,
    config: StreamConfig,
}

impl StreamCoordinator {
    pub fn new(
        agent: Arc<dyn ConversationalAgent>,
        store: Arc<ConversationStore>,
        learning: Arc<LearningEngine>,
        artifact_store: Arc<dyn ArtifactStore>,
        config: &QueryLensConfig,
    ) -> Self {
        let context = config
            .stream
            .enhance_with_context
            .then(|| ContextEnhancer::new(Arc::clone(&store), config.conversation.context_turns));
        Self {
            agent,
            store,
            learning,
            context,
            locator: ArtifactLocator::from_config(&config.artifacts),
            artifact_store,
            executor: None,
            config: config.stream.clone(),
        }
    }

    /// Regenerate missing result files by re-running SQL with `executor`.
    pub fn with_executor(mut self, executor: Arc<dyn SqlExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_locator(mut self, locator: ArtifactLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Run one turn, sending events to `sink` until it completes, fails or
    /// is cancelled.
    ///
    /// Invalid questions are rejected before any event is sent. An agent
    /// failure sends a single `Error` event and returns [`ChatError::Agent`]
    /// without persisting anything. Cancelling `cancel` or dropping the
    /// receiving end of `sink` stops streaming, even while an event waits for
    /// room in the channel; the partial turn is still stored with
    /// `cancelled: true`. A failed SQL tool result makes the recorded outcome
    /// a failure.
    pub async fn begin_turn(
        &self,
        request: TurnRequest,
        sink: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<TurnSummary, ChatError> {
        self.validate(&request.question)?;
        let scope = ConversationScope::new(
            request.user_id.as_deref(),
            request.conversation_id.as_deref(),
        );
        let question = request.question.trim().to_string();
        let mut state = CoordinatorState::Init;
        info!(scope = %scope, chars = question.len(), "Turn started");

        let mut buffer = TurnBuffer::default();
        if !emit(&sink, &cancel, StreamEvent::Start { timestamp: Utc::now() }).await {
            buffer.cancelled = true;
        }

        let snapshot = self.locator.snapshot();
        if !buffer.cancelled {
            let prompt = self.enhance(&question, &scope);
            let ctx = RequestContext {
                scope: scope.clone(),
                metadata: request.metadata.clone(),
            };
            transition(&mut state, CoordinatorState::Streaming);
            if let Err(e) = self.stream(&ctx, &prompt, &sink, &cancel, &mut buffer).await {
                transition(&mut state, CoordinatorState::Error);
                error!(scope = %scope, error = %e, "Agent failed, turn abandoned");
                emit(&sink, &cancel, StreamEvent::Error { error: e.to_string() }).await;
                return Err(e);
            }
        }

        if buffer.cancelled {
            info!(scope = %scope, fragments = buffer.fragments, "Turn cancelled");
            let answer = buffer.text.trim().to_string();
            let sql = buffer.tool_sql.clone().unwrap_or_default();
            self.persist(&scope, &question, &answer, &sql, false, &buffer, &request.metadata);
            transition(&mut state, CoordinatorState::Done);
            return Ok(TurnSummary {
                scope,
                state,
                answer,
                sql,
                artifact: None,
                fragments: buffer.fragments,
                truncated: buffer.truncated,
                cancelled: true,
            });
        }

        transition(&mut state, CoordinatorState::Finalizing);
        // Only SQL the agent ran through the tool, and that did not fail, is
        // ever re-executed.
        let regenerate = buffer
            .tool_sql
            .as_deref()
            .filter(|sql| !sql.is_empty() && buffer.sql_tool_failure.is_none());
        let announced = extract_artifact_filename(&buffer.text);
        let resolution = self
            .locator
            .resolve(
                announced.as_deref(),
                &snapshot,
                regenerate,
                self.executor.as_deref(),
                self.artifact_store.as_ref(),
            )
            .await;
        let artifact = resolution.artifact;
        let sql = match &buffer.tool_sql {
            Some(sql) => sql.clone(),
            None => extract_sql(&buffer.text),
        };

        if let Some(reference) = &artifact {
            emit(
                &sink,
                &cancel,
                StreamEvent::Artifact {
                    reference: reference.clone(),
                },
            )
            .await;
        }
        let answer = buffer.text.trim().to_string();
        emit(
            &sink,
            &cancel,
            StreamEvent::Complete {
                answer: answer.clone(),
                sql: sql.clone(),
                artifact: artifact.clone(),
            },
        )
        .await;

        self.persist(
            &scope,
            &question,
            &answer,
            &sql,
            artifact.is_some(),
            &buffer,
            &request.metadata,
        );

        // SQL recovered from prose is only learned from when a result file
        // backs it up.
        let outcome_sql = match &buffer.tool_sql {
            Some(tool_sql) => Some(tool_sql.clone()),
            None => artifact.as_ref().map(|_| sql.clone()),
        }
        .filter(|s| !s.is_empty());
        let failure = buffer
            .sql_tool_failure
            .clone()
            .or(resolution.execution_failure);
        let outcome = match failure {
            Some(reason) => TurnOutcome::Failure {
                sql: outcome_sql,
                reason,
            },
            None => TurnOutcome::Success {
                sql: outcome_sql,
                artifact: artifact.clone(),
            },
        };
        if let Err(e) = self
            .learning
            .record_outcome(&question, &outcome, Some(&request.metadata))
        {
            warn!(error = %e, "Failed to record turn outcome");
        }

        transition(&mut state, CoordinatorState::Done);
        info!(
            scope = %scope,
            fragments = buffer.fragments,
            has_sql = !sql.is_empty(),
            has_artifact = artifact.is_some(),
            "Turn complete"
        );
        Ok(TurnSummary {
            scope,
            state,
            answer,
            sql,
            artifact,
            fragments: buffer.fragments,
            truncated: buffer.truncated,
            cancelled: false,
        })
    }

    fn validate(&self, question: &str) -> Result<(), ChatError> {
        if question.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let max = self.config.max_message_length;
        if question.chars().count() > max {
            return Err(ChatError::MessageTooLong(max));
        }
        Ok(())
    }

    /// Learned patterns first, then conversation context.
    fn enhance(&self, question: &str, scope: &ConversationScope) -> String {
        let enhanced = self.learning.enhance(question);
        match &self.context {
            Some(context) => context.enhance(&enhanced, scope),
            None => enhanced,
        }
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        buffer: &mut TurnBuffer,
    ) -> Result<(), ChatError> {
        let max = self.config.max_fragments;
        // One extra item tells a stream that hit the cap from one that ended at it.
        let mut fragments = self
            .agent
            .send_message(ctx, prompt, &ctx.scope.conversation_id)
            .take(max.saturating_add(1));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    buffer.cancelled = true;
                    break;
                }
                _ = sink.closed() => {
                    debug!("Event sink closed while waiting for the agent");
                    buffer.cancelled = true;
                    break;
                }
                next = fragments.next() => next,
            };
            let Some(item) = next else {
                break;
            };
            if buffer.fragments == max {
                buffer.truncated = true;
                warn!(max_fragments = max, "Agent stream truncated");
                break;
            }
            buffer.fragments += 1;

            match item? {
                AgentFragment::Text(text) => {
                    buffer.text.push_str(&text);
                    if !emit(sink, cancel, StreamEvent::Chunk { text }).await {
                        buffer.cancelled = true;
                        break;
                    }
                }
                AgentFragment::ToolCall { tool_name, args } => {
                    let Some(sql) = sql_from_tool_args(&self.config.sql_tool_name, &tool_name, &args)
                    else {
                        debug!(tool = %tool_name, "Tool call");
                        continue;
                    };
                    if buffer.tool_sql.is_none()
                        && !emit(sink, cancel, StreamEvent::Sql { sql: sql.clone() }).await
                    {
                        buffer.tool_sql = Some(sql);
                        buffer.cancelled = true;
                        break;
                    }
                    debug!(tool = %tool_name, "SQL tool call");
                    buffer.tool_sql = Some(sql);
                }
                AgentFragment::ToolResult {
                    tool_name,
                    success,
                    content,
                } => {
                    debug!(tool = %tool_name, success, chars = content.len(), "Tool result");
                    if tool_name == self.config.sql_tool_name {
                        if success {
                            buffer.sql_tool_failure = None;
                        } else {
                            warn!(tool = %tool_name, error = %content, "SQL tool reported failure");
                            buffer.sql_tool_failure = Some(content);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        scope: &ConversationScope,
        question: &str,
        answer: &str,
        sql: &str,
        artifact_generated: bool,
        buffer: &TurnBuffer,
        caller_metadata: &Metadata,
    ) {
        let mut metadata = caller_metadata.clone();
        metadata.insert("sql_query".to_string(), json!(sql));
        metadata.insert("artifact_generated".to_string(), json!(artifact_generated));
        metadata.insert("truncated".to_string(), json!(buffer.truncated));
        metadata.insert("cancelled".to_string(), json!(buffer.cancelled));

        let turn = ConversationTurn::new(scope.clone(), question, answer, metadata);
        if let Err(e) = self.store.append(turn) {
            error!(scope = %scope, error = %e, "Failed to store turn");
        }
    }
}

/// Send `event`, returning `false` once the receiver is gone or the turn is
/// cancelled while waiting for room in the channel.
async fn emit(
    sink: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> bool {
    let name = event.name();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(event = name, "Turn cancelled before event was delivered");
            false
        }
        sent = sink.send(event) => match sent {
            Ok(()) => true,
            Err(_) => {
                debug!(event = name, "Event sink closed");
                false
            }
        },
    }
}

fn transition(state: &mut CoordinatorState, next: CoordinatorState) {
    debug!(from = ?*state, to = ?next, "Turn state");
    *state = next;
}
