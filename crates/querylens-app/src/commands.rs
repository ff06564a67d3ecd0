//! Operator command handlers.
//!
//! Each handler renders its result as pretty JSON (or CSV for a CSV export)
//! so the binary only has to print it.

use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use querylens_core::{Metadata, QueryLensConfig, QueryLensError, Result};
use querylens_learning::{
    ExportFormat, GoldenQueryRegistry, GoldenSearch, LearningEngine, NewGoldenQuery,
};
use querylens_storage::{ConversationStore, HistoryFilter};

use crate::cli::{Command, GoldenCommand};

/// The durable stores, constructed once at startup.
pub struct Stores {
    pub conversations: ConversationStore,
    pub learning: LearningEngine,
    pub golden: GoldenQueryRegistry,
}

impl Stores {
    /// Write every store to disk.
    pub fn flush(&self) -> Result<()> {
        self.learning.flush()?;
        self.golden.flush()?;
        Ok(())
    }
}

pub fn execute(command: Command, stores: &Stores) -> Result<String> {
    match command {
        Command::History {
            user,
            conversation,
            limit,
        } => {
            let filter = HistoryFilter::from_parts(user.as_deref(), conversation.as_deref());
            render(&stores.conversations.history(&filter, limit)?)
        }
        Command::Search {
            keywords,
            meta,
            user,
            conversation,
            limit,
        } => {
            let filter = HistoryFilter::from_parts(user.as_deref(), conversation.as_deref());
            let metadata: Metadata = meta.into_iter().collect();
            render(&stores
                .conversations
                .search(&filter, &keywords, &metadata, limit)?)
        }
        Command::Clear { user, conversation } => {
            let filter = HistoryFilter::from_parts(user.as_deref(), conversation.as_deref());
            let removed = stores.conversations.clear(&filter)?;
            info!(removed, user = ?user, conversation = ?conversation, "Conversation history cleared");
            render(&json!({ "removed": removed }))
        }
        Command::Patterns { tool: None } => render(&stores.learning.query_patterns()?),
        Command::Patterns { tool: Some(tool) } => {
            let filter = (tool != "all").then_some(tool.as_str());
            render(&stores.learning.tool_patterns(filter)?)
        }
        Command::Stats => render(&json!({
            "learning": stores.learning.stats()?,
            "golden": stores.golden.stats()?,
            "conversations": {
                "scopes": stores.conversations.scopes()?.len(),
                "turns": stores.conversations.turn_count()?,
            },
        })),
        Command::Golden(golden) => execute_golden(golden, &stores.golden),
        Command::InitConfig { .. } => Err(QueryLensError::Validation(
            "init-config runs before the stores are opened".to_string(),
        )),
    }
}

/// Save `config` to `path`. An existing file is kept unless `force` is set.
pub fn init_config(config: &QueryLensConfig, path: &Path, force: bool) -> Result<String> {
    if path.exists() && !force {
        return Err(QueryLensError::Validation(format!(
            "config file {} already exists, pass --force to overwrite",
            path.display()
        )));
    }
    config.save(path)?;
    render(&json!({ "written": path.display().to_string() }))
}

fn execute_golden(command: GoldenCommand, golden: &GoldenQueryRegistry) -> Result<String> {
    match command {
        GoldenCommand::List {
            user,
            conversation: Some(conversation),
            limit,
        } => render(&golden.list_for_conversation(&user, &conversation, limit)?),
        GoldenCommand::List {
            user,
            conversation: None,
            limit,
        } => render(&golden.list_for_user(&user, limit)?),
        GoldenCommand::Search {
            user,
            text,
            tags,
            min_ratio,
            limit,
        } => render(&golden.search(&GoldenSearch {
            user_id: user,
            text,
            tags,
            min_success_ratio: min_ratio,
            limit,
        })?),
        GoldenCommand::Promote {
            sql,
            question,
            user,
            conversation,
            description,
            tags,
        } => {
            let query = golden.add(NewGoldenQuery {
                user_id: user,
                conversation_id: conversation,
                original_question: question,
                sql_query: sql,
                description,
                tags,
                metadata: Metadata::new(),
            })?;
            info!(query_id = %query.query_id, user_id = %query.user_id, "Golden query promoted");
            render(&query)
        }
        GoldenCommand::Export { format } => {
            let format = ExportFormat::from_str(&format)?;
            Ok(golden.export(format)?)
        }
    }
}

fn render<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(QueryLensError::from)
}
