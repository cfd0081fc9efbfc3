//! Tally CLI library.
//!
//! This crate provides the command-line interface over `tally-core`, backed
//! by the SQLite store from `tally-store`.

mod cli;
pub mod commands;
mod config;
pub mod git;

pub use cli::{Cli, Commands, SessionAction};
pub use config::Config;
