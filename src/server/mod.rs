//! Server module for Sketchwire
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `background_tasks`: Periodic session eviction
//! - `shutdown`: Signal handling and cancellation
//! - `init`: Server initialization and run loop

mod background_tasks;
pub mod config;
pub(crate) mod init;
mod loader;
mod shutdown;

pub use init::run;
pub use loader::{load_config, DEFAULT_CONFIG};
