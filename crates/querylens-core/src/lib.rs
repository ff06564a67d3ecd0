pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::QueryLensConfig;
pub use error::{QueryLensError, Result};
pub use events::StreamEvent;
pub use types::*;
