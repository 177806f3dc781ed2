// Library module for bucketsync
// Re-exports modules for use in integration tests and the binary

pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod sync;

pub use error::{SyncError, SyncResult};
