use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{QueryLensError, Result};

/// Top-level configuration for QueryLens.
///
/// Loaded from `~/.querylens/config.toml` by default. Each section corresponds
/// to one component of the turn pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryLensConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub golden: GoldenConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
}

impl QueryLensConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: QueryLensConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| QueryLensError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Path of the conversation history file inside `data_dir`.
    pub fn conversation_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.conversation.file_name)
    }

    /// Path of the learned-patterns file inside `data_dir`.
    pub fn patterns_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.learning.patterns_file)
    }

    /// Path of the golden query file inside `data_dir`.
    pub fn golden_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.golden.file_name)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the JSON state files.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.querylens/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Retention cap: turns kept per (user, conversation) scope.
    pub max_turns: usize,
    /// Number of recent turns prefixed to a question as context.
    pub context_turns: usize,
    /// File name of the conversation store inside `data_dir`.
    pub file_name: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            context_turns: 3,
            file_name: "conversations.json".to_string(),
        }
    }
}

/// Pattern learning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Whether questions are enhanced with learned patterns.
    pub enabled: bool,
    /// Jaccard similarity a pattern must exceed to be used for enhancement.
    pub similarity_threshold: f64,
    /// Maximum patterns rendered into one enhanced question.
    pub max_enhancements: usize,
    /// Domain nouns replaced by a placeholder during question normalization.
    pub domain_nouns: Vec<String>,
    /// File name of the pattern store inside `data_dir`.
    pub patterns_file: String,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.5,
            max_enhancements: 2,
            domain_nouns: ["customers", "orders", "products", "employees", "payments"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            patterns_file: "learned_patterns.json".to_string(),
        }
    }
}

/// Golden query registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldenConfig {
    /// File name of the golden query catalog inside `data_dir`.
    pub file_name: String,
}

impl Default for GoldenConfig {
    fn default() -> Self {
        Self {
            file_name: "golden_queries.json".to_string(),
        }
    }
}

/// Agent stream handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Hard cap on fragments consumed from one agent stream.
    pub max_fragments: usize,
    /// Maximum question length in characters.
    pub max_message_length: usize,
    /// Tool name identifying a SQL execution call.
    pub sql_tool_name: String,
    /// Prefix recent conversation turns to the question sent to the agent.
    pub enhance_with_context: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_fragments: 100,
            max_message_length: 4000,
            sql_tool_name: "run_sql".to_string(),
            enhance_with_context: true,
        }
    }
}

/// Result artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory where result files are written and searched.
    pub results_dir: String,
    /// A file modified within this many seconds counts as produced by the turn.
    pub recency_window_secs: u64,
    /// URL prefix under which result files are served.
    pub url_prefix: String,
    /// File extension of result files.
    pub extension: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            results_dir: "./query_results".to_string(),
            recency_window_secs: 30,
            url_prefix: "/static".to_string(),
            extension: "csv".to_string(),
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}
