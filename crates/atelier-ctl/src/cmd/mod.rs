//! CLI command modules.

pub mod config;
pub mod generate;
pub mod history;
pub mod render;
pub mod task;
