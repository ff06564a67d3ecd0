//! Conversation context for follow-up questions.
//!
//! Recent turns of the same scope are prepended to the text sent to the
//! agent. The stored question is never rewritten.

use std::sync::Arc;

use tracing::{debug, warn};

use querylens_core::ConversationScope;
use querylens_storage::{ConversationStore, HistoryFilter};

/// Characters of a previous answer carried into the context window.
const ANSWER_PREVIEW_CHARS: usize = 200;

/// Prefixes questions with a rolling window of prior turns.
pub struct ContextEnhancer {
    store: Arc<ConversationStore>,
    /// Maximum number of recent turns to include.
    context_turns: usize,
}

impl ContextEnhancer {
    pub fn new(store: Arc<ConversationStore>, context_turns: usize) -> Self {
        Self {
            store,
            context_turns,
        }
    }

    /// `question` preceded by the last turns of `scope`, oldest first.
    ///
    /// Returns the question unchanged when the scope has no history or the
    /// history cannot be read.
    pub fn enhance(&self, question: &str, scope: &ConversationScope) -> String {
        if self.context_turns == 0 {
            return question.to_string();
        }
        let turns = match self
            .store
            .history(&HistoryFilter::scope(scope), Some(self.context_turns))
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!(scope = %scope, error = %e, "Failed to read conversation context");
                return question.to_string();
            }
        };
        if turns.is_empty() {
            return question.to_string();
        }

        let mut out = String::from("Previous conversation:\n");
        for turn in turns.iter().rev() {
            let answer: String = turn.response.chars().take(ANSWER_PREVIEW_CHARS).collect();
            out.push_str(&format!("Q: {}\nA: {}\n", turn.question, answer));
        }
        out.push_str(&format!("\nCurrent question: {}", question));

        debug!(scope = %scope, turns = turns.len(), "Question enhanced with conversation context");
        out
    }
}
