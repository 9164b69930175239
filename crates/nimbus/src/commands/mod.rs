//! CLI command handlers.

pub mod build;
pub mod validate;
