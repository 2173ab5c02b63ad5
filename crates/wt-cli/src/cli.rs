//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Per-domain web time tracker.
///
/// Attributes foreground browsing time to domains, enforces daily limits and
/// reports daily and monthly totals.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the tracker, reading browser events as JSON lines on stdin.
    Host {
        /// Drive the clock only from event `at` timestamps and disable timers.
        #[arg(long)]
        replay: bool,
    },

    /// Show tracked time for a day or a month.
    Report(ReportArgs),

    /// Show database location, filter and limits.
    Status,

    /// Manage daily limits.
    #[command(subcommand)]
    Limit(LimitAction),

    /// Turn limit enforcement on or off for a domain.
    Block {
        /// Domain (or URL) to configure.
        domain: String,

        #[command(flatten)]
        switch: BlockSwitch,
    },

    /// Configure which domains are tracked.
    #[command(subcommand)]
    Filter(FilterAction),

    /// Delete all tracked time and settings.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
}

/// Report period selection.
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Day to report: YYYY-MM-DD, "today", "yesterday" or "N days ago" [default: today].
    #[arg(long, conflicts_with = "month")]
    pub date: Option<String>,

    /// Month to report: YYYY-MM, or "this" for the current month.
    #[arg(long)]
    pub month: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Exactly one of `--on` / `--off`.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct BlockSwitch {
    /// Redirect the domain's tabs once its limit is exceeded.
    #[arg(long)]
    pub on: bool,

    /// Only track the domain, never redirect.
    #[arg(long)]
    pub off: bool,
}

/// Limit subcommands.
#[derive(Debug, Subcommand)]
pub enum LimitAction {
    /// Set a daily limit in minutes (0 removes it).
    Set { domain: String, minutes: u64 },

    /// Remove a domain's limit and block flag.
    Remove { domain: String },
}

/// Filter subcommands.
#[derive(Debug, Subcommand)]
pub enum FilterAction {
    /// Set the filter mode: all, include or exclude.
    Mode { mode: String },

    /// Add a domain to the filter list.
    Add { domain: String },

    /// Remove a domain from the filter list.
    Remove { domain: String },
}
