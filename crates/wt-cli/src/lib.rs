//! Web time tracker CLI library.
//!
//! This crate provides the CLI interface for the web time tracker.

mod cli;
pub mod commands;
mod config;

pub use cli::{BlockSwitch, Cli, Commands, FilterAction, LimitAction, ReportArgs};
pub use config::Config;
