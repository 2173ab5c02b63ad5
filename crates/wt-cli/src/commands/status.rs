//! Status command for showing the database, filter and limits.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use wt_core::policy::load_policy;
use wt_core::{FilterMode, KeyValueStore, Period, load_rollup};

use super::report::format_duration;

pub async fn run<W: Write, S: KeyValueStore>(
    writer: &mut W,
    store: &S,
    database_path: &Path,
    today: NaiveDate,
) -> Result<()> {
    let policy = load_policy(store).await?;
    let rollup = load_rollup(store, Period::day(today)).await?;

    writeln!(writer, "Web time tracker status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    writeln!(
        writer,
        "Today: {} across {} domains",
        format_duration(rollup.total_ms),
        rollup.entries.len()
    )?;

    match policy.filter.mode {
        FilterMode::All => writeln!(writer, "Filter: all (every domain is tracked)")?,
        mode => {
            writeln!(writer, "Filter: {mode} ({} domains)", policy.filter.list.len())?;
            for domain in &policy.filter.list {
                writeln!(writer, "- {domain}")?;
            }
        }
    }

    if policy.limits.is_empty() {
        writeln!(writer, "No limits configured.")?;
        return Ok(());
    }

    writeln!(writer, "Limits:")?;
    for (domain, minutes) in &policy.limits {
        let blocking = policy.blocking.get(domain).copied().unwrap_or(false);
        let used = rollup
            .entries
            .iter()
            .find(|e| &e.key == domain)
            .map_or(0, |e| e.ms);
        let mode = if blocking { "blocking" } else { "tracking only" };
        writeln!(
            writer,
            "- {domain}: {minutes}m/day, {} used today ({mode})",
            format_duration(used)
        )?;
    }

    Ok(())
}
