//! CLI argument definitions for the QueryLens operator tool.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

/// QueryLens - conversation memory and learned SQL patterns for a chat-to-SQL agent.
#[derive(Parser, Debug)]
#[command(name = "querylens", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the JSON state files.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show conversation turns, newest first.
    History {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find turns containing every keyword and metadata pair.
    Search {
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        /// Metadata filter as key=value. Values parse as JSON when they can.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete conversation turns. Without filters, deletes everything.
    Clear {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        conversation: Option<String>,
    },

    /// List learned query patterns, or tool patterns with --tool.
    Patterns {
        /// Show tool usage patterns for this tool ("all" for every tool).
        #[arg(long)]
        tool: Option<String>,
    },

    /// Learning and golden query statistics.
    Stats,

    /// Write the effective configuration to the config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Manage golden queries.
    #[command(subcommand)]
    Golden(GoldenCommand),
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum GoldenCommand {
    /// A user's golden queries, most recently used first.
    List {
        #[arg(long, default_value = "anonymous")]
        user: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Filter golden queries by text, tags and success ratio.
    Search {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value_t = 0.0)]
        min_ratio: f64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Save a query as golden.
    Promote {
        #[arg(long)]
        sql: String,
        #[arg(long)]
        question: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Dump the catalog to stdout.
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > QUERYLENS_CONFIG env var > ~/.querylens/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("QUERYLENS_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    /// Returns `None` if not overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Parse a `key=value` metadata filter.
fn parse_meta(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty metadata key in '{}'", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".querylens").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("querylens").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["stats", "-d", "/tmp/ql", "-l", "debug"]);
        assert_eq!(args.command, Command::Stats);
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/tmp/ql"));
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
    }

    #[test]
    fn test_explicit_config_wins() {
        let args = parse(&["-c", "/etc/querylens.toml", "stats"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/querylens.toml"));
    }

    #[test]
    fn test_history_filters() {
        let args = parse(&["history", "--user", "alice", "--limit", "5"]);
        assert_eq!(
            args.command,
            Command::History {
                user: Some("alice".into()),
                conversation: None,
                limit: Some(5),
            }
        );
    }

    #[test]
    fn test_search_repeated_keywords_and_meta() {
        let args = parse(&[
            "search",
            "--keyword",
            "orders",
            "--keyword",
            "month",
            "--meta",
            "artifact_generated=true",
            "--meta",
            "sql_query=SELECT 1",
        ]);
        let Command::Search { keywords, meta, .. } = args.command else {
            panic!("expected search");
        };
        assert_eq!(keywords, vec!["orders", "month"]);
        assert_eq!(
            meta,
            vec![
                ("artifact_generated".to_string(), json!(true)),
                ("sql_query".to_string(), json!("SELECT 1")),
            ]
        );
    }

    #[test]
    fn test_meta_without_equals_rejected() {
        let result = CliArgs::try_parse_from(["querylens", "search", "--meta", "broken"]);
        assert!(result.is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[test]
    fn test_golden_promote() {
        let args = parse(&[
            "golden",
            "promote",
            "--sql",
            "SELECT COUNT(*) FROM orders",
            "--question",
            "how many orders?",
            "--user",
            "alice",
            "--tag",
            "sales",
            "--tag",
            "kpi",
        ]);
        let Command::Golden(GoldenCommand::Promote { sql, tags, user, .. }) = args.command else {
            panic!("expected golden promote");
        };
        assert_eq!(sql, "SELECT COUNT(*) FROM orders");
        assert_eq!(user.as_deref(), Some("alice"));
        assert_eq!(tags, vec!["sales", "kpi"]);
    }

    #[test]
    fn test_golden_defaults() {
        let args = parse(&["golden", "list"]);
        assert_eq!(
            args.command,
            Command::Golden(GoldenCommand::List {
                user: "anonymous".into(),
                conversation: None,
                limit: 20,
            })
        );
        let args = parse(&["golden", "export"]);
        assert_eq!(
            args.command,
            Command::Golden(GoldenCommand::Export {
                format: "json".into()
            })
        );
    }

    #[test]
    fn test_init_config_flag() {
        let args = parse(&["init-config", "--force"]);
        assert_eq!(args.command, Command::InitConfig { force: true });
    }

    #[test]
    fn test_subcommand_required() {
        assert!(CliArgs::try_parse_from(["querylens"]).is_err());
    }
}
