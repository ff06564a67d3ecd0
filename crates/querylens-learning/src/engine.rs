//! Pattern learning from successful tool usage.
//!
//! The engine keeps two maps, query patterns keyed by normalized SQL shape and
//! tool usage patterns keyed by tool and normalized question, behind a single
//! `RwLock`. Every mutation rewrites the pattern file in full.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use querylens_core::config::LearningConfig;
use querylens_core::{Metadata, TurnOutcome};
use querylens_storage::JsonFile;

use crate::error::LearningError;
use crate::normalize::{
    args_pattern, jaccard, normalize_sql, query_pattern_id, tool_pattern_id, QuestionNormalizer,
};
use crate::types::{LearningStats, PatternState, QueryPattern, ToolUsagePattern};

/// Default name of the tool whose `sql` argument feeds query patterns.
pub const DEFAULT_SQL_TOOL: &str = "run_sql";

/// Tool name under which turns that produced no SQL are tallied.
pub const AGENT_EXECUTION_TOOL: &str = "agent_execution";

/// Characters of the original question shown as an example in enhancements.
const EXAMPLE_CHARS: usize = 100;

/// Learns reusable patterns from tool calls and feeds them back into new
/// questions.
pub struct LearningEngine {
    state: RwLock<PatternState>,
    loaded: AtomicBool,
    file: JsonFile,
    normalizer: QuestionNormalizer,
    config: LearningConfig,
    sql_tool_name: String,
}

impl LearningEngine {
    /// An engine persisting to `path`. Nothing is read until [`load`](Self::load).
    pub fn open(path: impl Into<PathBuf>, config: LearningConfig) -> Self {
        Self::with_file(JsonFile::new(path), config)
    }

    /// An engine that is never persisted (for testing).
    pub fn in_memory(config: LearningConfig) -> Self {
        Self::with_file(JsonFile::in_memory(), config)
    }

    fn with_file(file: JsonFile, config: LearningConfig) -> Self {
        Self {
            state: RwLock::new(PatternState::default()),
            loaded: AtomicBool::new(false),
            file,
            normalizer: QuestionNormalizer::new(&config.domain_nouns),
            config,
            sql_tool_name: DEFAULT_SQL_TOOL.to_string(),
        }
    }

    /// Use `name` as the SQL execution tool instead of [`DEFAULT_SQL_TOOL`].
    pub fn with_sql_tool_name(mut self, name: impl Into<String>) -> Self {
        self.sql_tool_name = name.into();
        self
    }

    pub fn sql_tool_name(&self) -> &str {
        &self.sql_tool_name
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Rehydrate patterns from the pattern file.
    ///
    /// Only the first call reads the file; later calls return `Ok(false)`.
    /// Patterns recorded in memory before loading take precedence over
    /// persisted ones with the same id.
    pub fn load(&self) -> Result<bool, LearningError> {
        let mut state = self.write()?;
        if self.loaded.load(Ordering::Acquire) {
            debug!("Patterns already loaded");
            return Ok(false);
        }
        let persisted: PatternState = self.file.load()?;
        for (id, pattern) in persisted.query_patterns {
            state.query_patterns.entry(id).or_insert(pattern);
        }
        for (id, pattern) in persisted.tool_patterns {
            state.tool_patterns.entry(id).or_insert(pattern);
        }
        self.loaded.store(true, Ordering::Release);
        info!(
            query_patterns = state.query_patterns.len(),
            tool_patterns = state.tool_patterns.len(),
            "Learned patterns loaded"
        );
        Ok(true)
    }

    fn ensure_loaded(&self) -> Result<(), LearningError> {
        if !self.is_loaded() {
            self.load()?;
        }
        Ok(())
    }

    /// Record one tool call.
    ///
    /// Successes increment (or create) the tool usage pattern, and a
    /// successful call of the SQL tool with a `sql` argument also increments
    /// (or creates) the query pattern for that statement's shape. Failures
    /// only count against the tool usage pattern.
    pub fn record_tool_usage(
        &self,
        question: &str,
        tool_name: &str,
        args: &Value,
        success: bool,
        metadata: Option<&Metadata>,
    ) -> Result<(), LearningError> {
        if tool_name.trim().is_empty() {
            return Err(LearningError::Validation(
                "tool name must not be empty".to_string(),
            ));
        }
        self.ensure_loaded()?;

        let question_pattern = self.normalizer.normalize(question);
        let tool_id = tool_pattern_id(tool_name, &question_pattern);
        let now = Utc::now();

        let mut state = self.write()?;
        let tool = state
            .tool_patterns
            .entry(tool_id.clone())
            .or_insert_with(|| ToolUsagePattern {
                pattern_id: tool_id.clone(),
                tool_name: tool_name.to_string(),
                question_pattern: question_pattern.clone(),
                args_pattern: args_pattern(args),
                success_count: 0,
                failure_count: 0,
                last_used: now,
                metadata: metadata.cloned().unwrap_or_default(),
            });
        if success {
            tool.success_count += 1;
        } else {
            tool.failure_count += 1;
        }
        tool.last_used = now;

        let sql = args
            .get("sql")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty());
        if let Some(sql) = sql.filter(|_| success && tool_name == self.sql_tool_name) {
            let sql_pattern = normalize_sql(sql);
            let query_id = query_pattern_id(&sql_pattern);
            let query = state
                .query_patterns
                .entry(query_id.clone())
                .or_insert_with(|| {
                    let mut pattern_meta = metadata.cloned().unwrap_or_default();
                    pattern_meta.insert("original_question".to_string(), json!(question));
                    pattern_meta.insert("original_sql".to_string(), json!(sql));
                    QueryPattern {
                        pattern_id: query_id.clone(),
                        question_pattern: question_pattern.clone(),
                        sql_pattern,
                        tool_name: tool_name.to_string(),
                        success_count: 0,
                        last_used: now,
                        metadata: pattern_meta,
                    }
                });
            query.success_count += 1;
            query.last_used = now;
            debug!(pattern = %query_id, uses = query.success_count, "Query pattern recorded");
        }

        debug!(tool = tool_name, pattern = %tool_id, success, "Tool usage recorded");
        self.persist(&state);
        Ok(())
    }

    /// Record the explicit outcome of a turn.
    ///
    /// Outcomes with SQL count against the SQL tool. Outcomes without SQL
    /// count against [`AGENT_EXECUTION_TOOL`] and never create a query
    /// pattern.
    pub fn record_outcome(
        &self,
        question: &str,
        outcome: &TurnOutcome,
        metadata: Option<&Metadata>,
    ) -> Result<(), LearningError> {
        match outcome.sql() {
            Some(sql) => self.record_tool_usage(
                question,
                &self.sql_tool_name,
                &json!({ "sql": sql }),
                outcome.is_success(),
                metadata,
            ),
            None => self.record_tool_usage(
                question,
                AGENT_EXECUTION_TOOL,
                &json!({ "message": question }),
                outcome.is_success(),
                metadata,
            ),
        }
    }

    /// Query patterns whose question pattern is more similar to `question`
    /// than the configured threshold, most similar first.
    pub fn find_similar(
        &self,
        question: &str,
        limit: usize,
    ) -> Result<Vec<QueryPattern>, LearningError> {
        self.ensure_loaded()?;
        let question_pattern = self.normalizer.normalize(question);
        let state = self.read()?;

        let mut scored: Vec<(f64, &QueryPattern)> = state
            .query_patterns
            .values()
            .map(|p| (jaccard(&question_pattern, &p.question_pattern), p))
            .filter(|(score, _)| *score > self.config.similarity_threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.success_count.cmp(&a.1.success_count))
                .then_with(|| a.1.pattern_id.cmp(&b.1.pattern_id))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    /// Prefix `question` with the most similar learned patterns.
    ///
    /// Returns the question unchanged when learning is disabled, when nothing
    /// is similar enough, or when the patterns cannot be read.
    pub fn enhance(&self, question: &str) -> String {
        if !self.config.enabled {
            return question.to_string();
        }
        let similar = match self.find_similar(question, self.config.max_enhancements) {
            Ok(similar) => similar,
            Err(e) => {
                error!(error = %e, "Failed to look up learned patterns");
                return question.to_string();
            }
        };
        if similar.is_empty() {
            return question.to_string();
        }

        let mut lines = vec!["\n=== Learned Patterns from Successful Queries ===".to_string()];
        for (i, pattern) in similar.iter().enumerate() {
            lines.push(format!(
                "\nPattern {} (Used {} times successfully):",
                i + 1,
                pattern.success_count
            ));
            lines.push(format!("Question pattern: {}", pattern.question_pattern));
            lines.push(format!("SQL pattern: {}", pattern.sql_pattern));
            if let Some(example) = pattern.original_question().filter(|q| !q.is_empty()) {
                let example: String = example.chars().take(EXAMPLE_CHARS).collect();
                lines.push(format!("Example: {}...", example));
            }
        }
        lines.push("\n=== End Learned Patterns ===\n".to_string());

        debug!(patterns = similar.len(), "Question enhanced with learned patterns");
        format!("{}\nOriginal question: {}", lines.join("\n"), question)
    }

    /// All query patterns, most used first.
    pub fn query_patterns(&self) -> Result<Vec<QueryPattern>, LearningError> {
        self.ensure_loaded()?;
        let mut patterns: Vec<QueryPattern> = self.read()?.query_patterns.values().cloned().collect();
        patterns.sort_by(|a, b| b.success_count.cmp(&a.success_count));
        Ok(patterns)
    }

    /// Tool usage patterns, optionally restricted to one tool, most used first.
    pub fn tool_patterns(
        &self,
        tool_filter: Option<&str>,
    ) -> Result<Vec<ToolUsagePattern>, LearningError> {
        self.ensure_loaded()?;
        let mut patterns: Vec<ToolUsagePattern> = self
            .read()?
            .tool_patterns
            .values()
            .filter(|p| tool_filter.map_or(true, |t| p.tool_name == t))
            .cloned()
            .collect();
        patterns.sort_by(|a, b| {
            (b.success_count + b.failure_count).cmp(&(a.success_count + a.failure_count))
        });
        Ok(patterns)
    }

    pub fn stats(&self) -> Result<LearningStats, LearningError> {
        self.ensure_loaded()?;
        Ok(LearningStats::from_state(&*self.read()?))
    }

    /// Overwrite the pattern file with the current state.
    pub fn flush(&self) -> Result<(), LearningError> {
        let state = self.read()?;
        self.file.store(&*state)?;
        Ok(())
    }

    fn persist(&self, state: &PatternState) {
        if let Err(e) = self.file.store(state) {
            error!(error = %e, "Failed to persist learned patterns");
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PatternState>, LearningError> {
        self.state
            .read()
            .map_err(|_| LearningError::LockPoisoned("patterns"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PatternState>, LearningError> {
        self.state
            .write()
            .map_err(|_| LearningError::LockPoisoned("patterns"))
    }
}
