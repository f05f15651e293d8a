//! CLI module organization:
//! - args: argument structures
//! - commands: command execution
//! - output: console rendering of reports

pub mod args;
pub mod commands;
pub mod output;

pub use args::*;
pub use commands::*;
