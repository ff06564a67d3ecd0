//! Scope-isolated conversation history.
//!
//! Turns live in a two-level map (user -> conversation -> turns) behind a
//! single mutex shared by every scope. Each mutation flushes the whole map
//! to the backing [`JsonFile`] before returning; flush failures are logged
//! and the in-memory state stays authoritative.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info};

use querylens_core::types::{ConversationScope, ConversationTurn, Metadata};

use crate::error::StorageError;
use crate::json_file::JsonFile;

type TurnMap = BTreeMap<String, BTreeMap<String, Vec<ConversationTurn>>>;

/// Which scopes a read or clear applies to.
///
/// Both ids set selects one exact scope, a user alone selects every
/// conversation of that user, neither selects everything. A conversation id
/// without a user selects that conversation id across all users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            conversation_id: None,
        }
    }

    pub fn scope(scope: &ConversationScope) -> Self {
        Self {
            user_id: Some(scope.user_id.clone()),
            conversation_id: Some(scope.conversation_id.clone()),
        }
    }

    /// Build a filter from optional raw ids; blank ids count as absent.
    pub fn from_parts(user_id: Option<&str>, conversation_id: Option<&str>) -> Self {
        let clean = |s: Option<&str>| {
            s.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            user_id: clean(user_id),
            conversation_id: clean(conversation_id),
        }
    }

    fn matches_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref().map_or(true, |u| u == user_id)
    }

    fn matches_conversation(&self, conversation_id: &str) -> bool {
        self.conversation_id
            .as_deref()
            .map_or(true, |c| c == conversation_id)
    }
}

/// Concurrency-safe, scope-isolated turn history with bounded retention.
pub struct ConversationStore {
    turns: Mutex<TurnMap>,
    file: JsonFile,
    max_turns: usize,
}

impl ConversationStore {
    /// Open the store at `path`, rehydrating any previously flushed turns.
    pub fn open(path: impl Into<PathBuf>, max_turns: usize) -> Result<Self, StorageError> {
        let file = JsonFile::new(path);
        let mut turns: TurnMap = file.load()?;
        let max_turns = max_turns.max(1);
        let mut pruned = 0;
        for conversations in turns.values_mut() {
            for scope_turns in conversations.values_mut() {
                pruned += enforce_retention(scope_turns, max_turns);
            }
        }
        let store = Self {
            turns: Mutex::new(turns),
            file,
            max_turns,
        };
        if pruned > 0 {
            info!(pruned, max_turns, "Pruned stored turns beyond the retention cap");
            store.flush(&*store.lock()?);
        }
        info!(
            turns = store.turn_count().unwrap_or(0),
            max_turns, "Conversation store opened"
        );
        Ok(store)
    }

    /// A store that is never persisted (for testing).
    pub fn in_memory(max_turns: usize) -> Self {
        Self {
            turns: Mutex::new(TurnMap::new()),
            file: JsonFile::in_memory(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Append a completed turn to its scope, pruning the oldest turns beyond
    /// the retention cap.
    pub fn append(&self, turn: ConversationTurn) -> Result<(), StorageError> {
        let mut turns = self.lock()?;
        let scope = turn.scope.clone();
        let scope_turns = turns
            .entry(scope.user_id.clone())
            .or_default()
            .entry(scope.conversation_id.clone())
            .or_default();
        scope_turns.push(turn);
        let dropped = enforce_retention(scope_turns, self.max_turns);
        debug!(scope = %scope, dropped, "Turn appended");
        self.flush(&turns);
        Ok(())
    }

    /// Turns matching `filter`, newest first.
    pub fn history(
        &self,
        filter: &HistoryFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationTurn>, StorageError> {
        self.search(filter, &[], &Metadata::new(), limit)
    }

    /// Turns matching `filter` whose question plus response contains every
    /// keyword (case-insensitive) and whose metadata holds every given pair.
    pub fn search(
        &self,
        filter: &HistoryFilter,
        keywords: &[String],
        metadata: &Metadata,
        limit: Option<usize>,
    ) -> Result<Vec<ConversationTurn>, StorageError> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let mut matched: Vec<ConversationTurn> = {
            let turns = self.lock()?;
            turns
                .iter()
                .filter(|(user, _)| filter.matches_user(user))
                .flat_map(|(_, conversations)| conversations.iter())
                .filter(|(conversation, _)| filter.matches_conversation(conversation))
                .flat_map(|(_, scope_turns)| scope_turns.iter().rev())
                .filter(|turn| matches_keywords(turn, &keywords))
                .filter(|turn| matches_metadata(turn, metadata))
                .cloned()
                .collect()
        };

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    /// Delete every turn matching `filter`. Returns the number removed.
    pub fn clear(&self, filter: &HistoryFilter) -> Result<usize, StorageError> {
        let mut turns = self.lock()?;
        let mut removed = 0;
        for (user, conversations) in turns.iter_mut() {
            if !filter.matches_user(user) {
                continue;
            }
            conversations.retain(|conversation, scope_turns| {
                if filter.matches_conversation(conversation) {
                    removed += scope_turns.len();
                    false
                } else {
                    true
                }
            });
        }
        turns.retain(|_, conversations| !conversations.is_empty());
        info!(
            user = ?filter.user_id,
            conversation = ?filter.conversation_id,
            removed,
            "Conversation history cleared"
        );
        self.flush(&turns);
        Ok(removed)
    }

    /// Every scope that currently holds at least one turn.
    pub fn scopes(&self) -> Result<Vec<ConversationScope>, StorageError> {
        let turns = self.lock()?;
        Ok(turns
            .iter()
            .flat_map(|(user, conversations)| {
                conversations.keys().map(move |conversation| ConversationScope {
                    user_id: user.clone(),
                    conversation_id: conversation.clone(),
                })
            })
            .collect())
    }

    pub fn turn_count(&self) -> Result<usize, StorageError> {
        let turns = self.lock()?;
        Ok(turns
            .values()
            .flat_map(|conversations| conversations.values())
            .map(Vec::len)
            .sum())
    }

    fn lock(&self) -> Result<MutexGuard<'_, TurnMap>, StorageError> {
        self.turns
            .lock()
            .map_err(|_| StorageError::LockPoisoned("conversation store"))
    }

    /// Called with the lock held so that file order follows mutation order.
    fn flush(&self, turns: &TurnMap) {
        if let Err(e) = self.file.store(turns) {
            error!(error = %e, "Failed to flush conversation store");
        }
    }
}

/// Drop the oldest turns beyond `max_turns`. Returns how many were dropped.
fn enforce_retention(turns: &mut Vec<ConversationTurn>, max_turns: usize) -> usize {
    if turns.len() <= max_turns {
        return 0;
    }
    let excess = turns.len() - max_turns;
    turns.drain(..excess);
    excess
}

fn matches_keywords(turn: &ConversationTurn, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let text = turn.searchable_text().to_lowercase();
    keywords.iter().all(|k| text.contains(k.as_str()))
}

fn matches_metadata(turn: &ConversationTurn, metadata: &Metadata) -> bool {
    metadata
        .iter()
        .all(|(key, value)| turn.metadata.get(key) == Some(value))
}
