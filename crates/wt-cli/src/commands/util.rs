//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use wt_core::{AttributionKey, Classifier, Period};

/// Pre-compiled regex for relative day parsing.
static RELATIVE_DAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+days?\s+ago$").unwrap());

/// Pre-compiled regex for `YYYY-MM` months.
static MONTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());

/// Conservative bound for relative day parsing (~1000 years).
const MAX_RELATIVE_DAYS: i64 = 1000 * 365;

/// Parse a day as either `YYYY-MM-DD` or a relative expression.
///
/// Supports:
/// - ISO date: "2025-01-15"
/// - Relative: "today", "yesterday", "3 days ago"
pub fn parse_date(s: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let s = s.trim();
    match s {
        "today" => return Ok(today),
        "yesterday" => return Ok(today - Duration::days(1)),
        _ => {}
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }

    let Some(caps) = RELATIVE_DAY_RE.captures(s) else {
        anyhow::bail!(
            "Invalid date: {s}. Use YYYY-MM-DD (e.g., 2025-01-15), 'today', 'yesterday' or 'N days ago'"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative date")?;
    if n > MAX_RELATIVE_DAYS {
        anyhow::bail!("Relative date too far back: {n} days");
    }
    Ok(today - Duration::days(n))
}

/// Parse a month as `YYYY-MM` or "this".
pub fn parse_month(s: &str, today: NaiveDate) -> anyhow::Result<Period> {
    let s = s.trim();
    if s == "this" {
        return Ok(Period::month_of(today));
    }

    let Some(caps) = MONTH_RE.captures(s) else {
        anyhow::bail!("Invalid month: {s}. Use YYYY-MM (e.g., 2025-01) or 'this'");
    };
    let year: i32 = caps[1].parse().context("failed to parse year")?;
    let month: u32 = caps[2].parse().context("failed to parse month")?;
    Period::month(year, month).with_context(|| format!("Invalid month: {s}"))
}

/// Resolve the report period from the `--date` / `--month` flags.
pub fn resolve_period(
    date: Option<&str>,
    month: Option<&str>,
    today: NaiveDate,
) -> anyhow::Result<Period> {
    match (date, month) {
        (_, Some(month)) => parse_month(month, today),
        (Some(date), None) => parse_date(date, today).map(Period::day),
        (None, None) => Ok(Period::day(today)),
    }
}

/// Normalize user input naming a domain into the key the tracker records.
///
/// Full URLs are classified like a tab location; bare domains are trimmed and
/// lowercased.
pub fn domain_key(input: &str, classifier: &Classifier) -> anyhow::Result<AttributionKey> {
    let input = input.trim();
    if input.contains("://") {
        return Ok(classifier.classify(Some(input)));
    }
    AttributionKey::new(input.trim_end_matches('/').to_ascii_lowercase())
        .with_context(|| format!("invalid domain: {input:?}"))
}

/// First day of the month after `date`'s month.
pub fn next_month_start(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}
