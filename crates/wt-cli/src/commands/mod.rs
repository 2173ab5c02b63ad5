//! CLI subcommand implementations.

pub mod filter;
pub mod host;
pub mod limit;
pub mod report;
pub mod reset;
pub mod status;
pub mod util;
