//! QueryLens storage crate - durable JSON persistence and conversation memory.
//!
//! Provides the flat JSON document type every store flushes through and the
//! scope-isolated conversation history store.

pub mod conversation;
pub mod error;
pub mod json_file;

pub use conversation::{ConversationStore, HistoryFilter};
pub use error::StorageError;
pub use json_file::JsonFile;
