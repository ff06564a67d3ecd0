//! Curated catalog of known-good SQL, per user.
//!
//! A golden query is identified by its SQL text and owner, so promoting the
//! same statement twice counts as a second success instead of a duplicate.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use querylens_core::{ConversationScope, Metadata};
use querylens_storage::JsonFile;

use crate::error::LearningError;
use crate::normalize::content_id;
use crate::types::ratio;

type GoldenMap = BTreeMap<String, GoldenQuery>;

const TOP_USERS: usize = 5;
const TOP_TAGS: usize = 10;

/// A reusable, known-good query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenQuery {
    pub query_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub original_question: String,
    pub sql_query: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl GoldenQuery {
    pub fn success_rate(&self) -> f64 {
        ratio(self.success_count, self.failure_count)
    }

    fn add_tags(&mut self, tags: &[String]) {
        for tag in tags {
            let tag = tag.trim();
            if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
                self.tags.push(tag.to_string());
            }
        }
    }

    fn searchable_text(&self) -> String {
        format!(
            "{} {} {}",
            self.original_question,
            self.sql_query,
            self.description.as_deref().unwrap_or("")
        )
        .to_lowercase()
    }
}

/// Input for [`GoldenQueryRegistry::add`].
#[derive(Debug, Clone, Default)]
pub struct NewGoldenQuery {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub original_question: String,
    pub sql_query: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

/// Filters for [`GoldenQueryRegistry::search`]. Unset fields match everything.
#[derive(Debug, Clone)]
pub struct GoldenSearch {
    pub user_id: Option<String>,
    /// Case-insensitive substring of question, SQL or description.
    pub text: Option<String>,
    /// Matches queries carrying at least one of these tags.
    pub tags: Vec<String>,
    pub min_success_ratio: f64,
    pub limit: usize,
}

impl Default for GoldenSearch {
    fn default() -> Self {
        Self {
            user_id: None,
            text: None,
            tags: Vec::new(),
            min_success_ratio: 0.0,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(LearningError::Validation(format!(
                "unsupported export format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

/// Aggregate view of the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoldenStats {
    pub total_golden_queries: usize,
    pub total_successful_uses: u64,
    pub total_failed_uses: u64,
    pub overall_success_rate: f64,
    pub unique_users: usize,
    pub users_with_most_queries: Vec<(String, usize)>,
    pub most_common_tags: Vec<(String, usize)>,
}

/// Durable golden query catalog, keyed by content-derived id.
pub struct GoldenQueryRegistry {
    queries: Mutex<GoldenMap>,
    file: JsonFile,
}

impl GoldenQueryRegistry {
    /// Open the registry at `path`, loading any existing catalog.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LearningError> {
        let file = JsonFile::new(path);
        let queries: GoldenMap = file.load()?;
        info!(queries = queries.len(), "Golden query registry opened");
        Ok(Self {
            queries: Mutex::new(queries),
            file,
        })
    }

    /// A registry that is never persisted (for testing).
    pub fn in_memory() -> Self {
        Self {
            queries: Mutex::new(GoldenMap::new()),
            file: JsonFile::in_memory(),
        }
    }

    /// Id of the golden query for `sql` owned by `user_id`.
    pub fn query_id(sql: &str, user_id: &str) -> String {
        content_id(&[sql, user_id])
    }

    /// Insert a golden query, or count another success for an existing one.
    ///
    /// On update the tags are unioned and the metadata merged; question,
    /// description and creation time keep their first values.
    pub fn add(&self, new: NewGoldenQuery) -> Result<GoldenQuery, LearningError> {
        if new.sql_query.trim().is_empty() {
            return Err(LearningError::Validation(
                "golden query sql must not be empty".to_string(),
            ));
        }
        let scope = ConversationScope::new(
            new.user_id.as_deref(),
            new.conversation_id.as_deref(),
        );
        let query_id = Self::query_id(&new.sql_query, &scope.user_id);
        let now = Utc::now();

        let mut queries = self.lock()?;
        let query = match queries.get_mut(&query_id) {
            Some(existing) => {
                existing.success_count += 1;
                existing.last_used = now;
                existing.add_tags(&new.tags);
                existing.metadata.extend(new.metadata);
                info!(query_id = %query_id, uses = existing.success_count, "Golden query updated");
                existing.clone()
            }
            None => {
                let mut query = GoldenQuery {
                    query_id: query_id.clone(),
                    user_id: scope.user_id,
                    conversation_id: scope.conversation_id,
                    original_question: new.original_question,
                    sql_query: new.sql_query,
                    description: new.description.filter(|d| !d.trim().is_empty()),
                    tags: Vec::new(),
                    success_count: 1,
                    failure_count: 0,
                    last_used: now,
                    created_at: now,
                    metadata: new.metadata,
                };
                query.add_tags(&new.tags);
                queries.insert(query_id.clone(), query.clone());
                info!(query_id = %query_id, user = %query.user_id, "Golden query added");
                query
            }
        };
        self.flush_locked(&queries);
        Ok(query)
    }

    /// Count a successful reuse. Returns `false` for an unknown id.
    pub fn record_success(&self, query_id: &str) -> Result<bool, LearningError> {
        self.update(query_id, |q| {
            q.success_count += 1;
            q.last_used = Utc::now();
        })
    }

    /// Count a failed reuse. Returns `false` for an unknown id.
    pub fn record_failure(&self, query_id: &str) -> Result<bool, LearningError> {
        self.update(query_id, |q| {
            q.failure_count += 1;
            q.last_used = Utc::now();
        })
    }

    pub fn add_tags(&self, query_id: &str, tags: &[String]) -> Result<bool, LearningError> {
        self.update(query_id, |q| q.add_tags(tags))
    }

    pub fn remove_tags(&self, query_id: &str, tags: &[String]) -> Result<bool, LearningError> {
        self.update(query_id, |q| q.tags.retain(|t| !tags.contains(t)))
    }

    pub fn delete(&self, query_id: &str) -> Result<bool, LearningError> {
        let mut queries = self.lock()?;
        if queries.remove(query_id).is_none() {
            return Ok(false);
        }
        info!(query_id, "Golden query deleted");
        self.flush_locked(&queries);
        Ok(true)
    }

    pub fn get(&self, query_id: &str) -> Result<Option<GoldenQuery>, LearningError> {
        Ok(self.lock()?.get(query_id).cloned())
    }

    /// The user's golden queries, most recently used first.
    pub fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<GoldenQuery>, LearningError> {
        self.recent(limit, |q| q.user_id == user_id)
    }

    /// Golden queries from one conversation, most recently used first.
    pub fn list_for_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<GoldenQuery>, LearningError> {
        self.recent(limit, |q| {
            q.user_id == user_id && q.conversation_id == conversation_id
        })
    }

    /// Filtered golden queries, best success ratio first, then most recently
    /// used.
    pub fn search(&self, search: &GoldenSearch) -> Result<Vec<GoldenQuery>, LearningError> {
        let needle = search
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        let mut results: Vec<GoldenQuery> = self
            .lock()?
            .values()
            .filter(|q| search.user_id.as_deref().map_or(true, |u| q.user_id == u))
            .filter(|q| q.success_rate() >= search.min_success_ratio)
            .filter(|q| search.tags.is_empty() || q.tags.iter().any(|t| search.tags.contains(t)))
            .filter(|q| {
                needle
                    .as_deref()
                    .map_or(true, |n| q.searchable_text().contains(n))
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then_with(|| b.last_used.cmp(&a.last_used))
        });
        results.truncate(search.limit);
        debug!(results = results.len(), "Golden query search");
        Ok(results)
    }

    pub fn stats(&self) -> Result<GoldenStats, LearningError> {
        let queries = self.lock()?;
        let total_successful_uses = queries.values().map(|q| q.success_count).sum();
        let total_failed_uses = queries.values().map(|q| q.failure_count).sum();

        let mut users: HashMap<&str, usize> = HashMap::new();
        let mut tags: HashMap<&str, usize> = HashMap::new();
        for query in queries.values() {
            *users.entry(query.user_id.as_str()).or_insert(0) += 1;
            for tag in &query.tags {
                *tags.entry(tag.as_str()).or_insert(0) += 1;
            }
        }

        Ok(GoldenStats {
            total_golden_queries: queries.len(),
            total_successful_uses,
            total_failed_uses,
            overall_success_rate: ratio(total_successful_uses, total_failed_uses),
            unique_users: users.len(),
            users_with_most_queries: top_counts(users, TOP_USERS),
            most_common_tags: top_counts(tags, TOP_TAGS),
        })
    }

    /// Render the whole catalog as pretty JSON (id → record) or CSV.
    pub fn export(&self, format: ExportFormat) -> Result<String, LearningError> {
        let queries = self.lock()?;
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(&*queries)
                .map_err(|e| LearningError::Export(e.to_string())),
            ExportFormat::Csv => export_csv(queries.values()),
        }
    }

    /// Overwrite the catalog file with the current state.
    pub fn flush(&self) -> Result<(), LearningError> {
        let queries = self.lock()?;
        self.file.store(&*queries)?;
        Ok(())
    }

    fn update<F>(&self, query_id: &str, apply: F) -> Result<bool, LearningError>
    where
        F: FnOnce(&mut GoldenQuery),
    {
        let mut queries = self.lock()?;
        let Some(query) = queries.get_mut(query_id) else {
            debug!(query_id, "Unknown golden query");
            return Ok(false);
        };
        apply(query);
        self.flush_locked(&queries);
        Ok(true)
    }

    fn recent<P>(&self, limit: usize, predicate: P) -> Result<Vec<GoldenQuery>, LearningError>
    where
        P: Fn(&GoldenQuery) -> bool,
    {
        let mut results: Vec<GoldenQuery> = self
            .lock()?
            .values()
            .filter(|q| predicate(q))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        results.truncate(limit);
        Ok(results)
    }

    fn flush_locked(&self, queries: &GoldenMap) {
        if let Err(e) = self.file.store(queries) {
            error!(error = %e, "Failed to persist golden queries");
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, GoldenMap>, LearningError> {
        self.queries
            .lock()
            .map_err(|_| LearningError::LockPoisoned("golden queries"))
    }
}

fn export_csv<'a>(
    queries: impl Iterator<Item = &'a GoldenQuery>,
) -> Result<String, LearningError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "query_id",
        "user_id",
        "conversation_id",
        "original_question",
        "sql_query",
        "description",
        "tags",
        "success_count",
        "failure_count",
        "success_rate",
        "last_used",
        "created_at",
    ])?;
    for query in queries {
        writer.write_record([
            query.query_id.clone(),
            query.user_id.clone(),
            query.conversation_id.clone(),
            truncate_chars(&query.original_question, 100),
            truncate_chars(&query.sql_query, 200),
            truncate_chars(query.description.as_deref().unwrap_or(""), 100),
            query.tags.join(";"),
            query.success_count.to_string(),
            query.failure_count.to_string(),
            format!("{:.2}", query.success_rate()),
            query.last_used.to_rfc3339(),
            query.created_at.to_rfc3339(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| LearningError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| LearningError::Export(e.to_string()))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn top_counts(counts: HashMap<&str, usize>, n: usize) -> Vec<(String, usize)> {
    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(n);
    sorted
}
