//! Schema module - Configuration, reporting and persisted-state types.

mod config;
mod state;

pub use config::*;
pub use state::*;
