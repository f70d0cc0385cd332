pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod pools;
pub mod types;

pub use config::Config;
pub use pools::{PoolsError, PoolsFile};
pub use types::LogLevel;
