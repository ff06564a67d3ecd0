//! QueryLens learning crate - pattern learning and the golden query catalog.
//!
//! Provides:
//! - Value-stripping normalization of SQL, questions and tool arguments
//! - Query and tool usage patterns with success tallies
//! - Similarity lookup and question enhancement from learned patterns
//! - A per-user catalog of known-good queries with JSON/CSV export

pub mod engine;
pub mod error;
pub mod golden;
pub mod normalize;
pub mod types;

pub use engine::{LearningEngine, AGENT_EXECUTION_TOOL, DEFAULT_SQL_TOOL};
pub use error::LearningError;
pub use golden::{
    ExportFormat, GoldenQuery, GoldenQueryRegistry, GoldenSearch, GoldenStats, NewGoldenQuery,
};
pub use normalize::{normalize_sql, QuestionNormalizer};
pub use types::{LearningStats, QueryPattern, ToolUsagePattern};
