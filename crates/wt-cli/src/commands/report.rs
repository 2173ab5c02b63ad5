//! Report command for daily and monthly rollups.
//!
//! This module implements `wt report` with `--date` / `--month` period options
//! and output formats (human-readable, JSON).

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use wt_core::{KeyValueStore, Period, Rollup, load_rollup};

use super::util::next_month_start;

/// Number of domains listed individually before the rest are summarized.
const MAX_LISTED: usize = 15;

// ========== Duration Formatting ==========

/// Formats milliseconds as duration string.
/// Returns "Xh Ym" if >= 1 hour, "Xm" if >= 1 minute, "Xs" otherwise.
/// Negative durations are treated as 0s.
pub fn format_duration(ms: i64) -> String {
    if ms < 60_000 {
        return format!("{}s", ms.max(0) / 1000);
    }
    let total_minutes = ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

// ========== Progress Bar ==========

/// Generates a 10-character progress bar.
/// Values <5% of max get a single block for visibility.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn progress_bar(value: i64, max: i64) -> String {
    if max <= 0 {
        return "░░░░░░░░░░".to_string();
    }

    let ratio = value as f64 / max as f64;
    let filled = if ratio < 0.05 && value > 0 {
        1
    } else {
        (ratio * 10.0).round().clamp(0.0, 10.0) as usize
    };

    let empty = 10 - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

// ========== Human Output ==========

/// Formats the human-readable report output.
pub fn format_report(rollup: &Rollup) -> String {
    let mut output = String::new();

    writeln!(output, "WEB TIME REPORT: {}", rollup.period).unwrap();

    if rollup.is_empty() {
        let period_word = match rollup.period {
            Period::Day { .. } => "day",
            Period::Month { .. } => "month",
        };
        writeln!(output).unwrap();
        writeln!(output, "No time recorded this {period_word}.").unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Hint: Run 'wt status' to check the filter and database.").unwrap();
        return output;
    }

    // Bars are scaled to the largest entry
    let max = rollup.entries.first().map_or(0, |e| e.ms);
    let width = rollup
        .entries
        .iter()
        .take(MAX_LISTED)
        .map(|e| e.key.chars().count())
        .max()
        .unwrap_or(0)
        .max(24);

    writeln!(output).unwrap();
    for entry in rollup.entries.iter().take(MAX_LISTED) {
        let duration = format_duration(entry.ms);
        let bar = progress_bar(entry.ms, max);
        writeln!(output, "{:<width$}  {duration:>7}  {bar}", entry.key).unwrap();
    }

    let remaining = rollup.entries.len().saturating_sub(MAX_LISTED);
    if remaining > 0 {
        let rest: i64 = rollup.entries.iter().skip(MAX_LISTED).map(|e| e.ms).sum();
        writeln!(output, "... and {remaining} more ({})", format_duration(rest)).unwrap();
    }

    writeln!(output).unwrap();
    writeln!(output, "SUMMARY").unwrap();
    writeln!(output, "───────").unwrap();
    writeln!(output, "Total tracked:  {}", format_duration(rollup.total_ms)).unwrap();
    writeln!(output, "Domains:        {}", rollup.entries.len()).unwrap();
    if let Period::Month { .. } = rollup.period {
        writeln!(output, "Days tracked:   {}", rollup.days).unwrap();
    }

    output
}

// ========== JSON Output ==========

/// JSON report structure.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: String,
    pub timezone: String,
    pub period: JsonPeriod,
    pub entries: &'a [wt_core::RollupEntry],
    pub totals: JsonTotals,
}

#[derive(Debug, Serialize)]
pub struct JsonPeriod {
    pub start: String,
    pub end: String,
    #[serde(rename = "type")]
    pub period_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct JsonTotals {
    pub time_ms: i64,
    pub domain_count: usize,
    pub days_tracked: usize,
}

/// First and last day (inclusive) of the period.
fn period_bounds(period: Period) -> Option<(NaiveDate, NaiveDate)> {
    match period {
        Period::Day { date } => Some((date, date)),
        Period::Month { year, month } => {
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            let end = next_month_start(start)? - Duration::days(1);
            Some((start, end))
        }
    }
}

/// Formats the rollup as JSON.
pub fn format_report_json(
    rollup: &Rollup,
    generated_at: DateTime<Utc>,
    timezone: &str,
) -> Result<String> {
    let (start, end) = period_bounds(rollup.period)
        .ok_or_else(|| anyhow::anyhow!("invalid report period: {}", rollup.period))?;

    let report = JsonReport {
        generated_at: generated_at.to_rfc3339(),
        timezone: timezone.to_string(),
        period: JsonPeriod {
            start: start.format("%Y-%m-%d").to_string(),
            end: end.format("%Y-%m-%d").to_string(),
            period_type: match rollup.period {
                Period::Day { .. } => "day",
                Period::Month { .. } => "month",
            },
        },
        entries: &rollup.entries,
        totals: JsonTotals {
            time_ms: rollup.total_ms,
            domain_count: rollup.entries.len(),
            days_tracked: rollup.days,
        },
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

// ========== Public Interface ==========

/// Runs the report command.
pub async fn run<W: Write, S: KeyValueStore>(
    writer: &mut W,
    store: &S,
    period: Period,
    json: bool,
) -> Result<()> {
    let rollup = load_rollup(store, period).await?;

    if json {
        let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());
        let output = format_report_json(&rollup, Utc::now(), &timezone)?;
        writeln!(writer, "{output}")?;
    } else {
        write!(writer, "{}", format_report(&rollup))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use insta::assert_snapshot;
    use serde_json::json;
    use wt_core::{Items, MemoryStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn sample_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set(Items::from([
                (
                    "2025-01-28".to_string(),
                    json!({"github.com": 3_900_000, "news.ycombinator.com": 720_000}),
                ),
                (
                    "2025-01-29".to_string(),
                    json!({"github.com": 600_000, "Empty / New Tab": 45_000}),
                ),
                ("limits".to_string(), json!({"github.com": 60})),
            ]))
            .await
            .unwrap();
        store
    }

    // ========== Formatting Tests ==========

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(45_000), "45s");
        assert_eq!(format_duration(60_000), "1m");
        assert_eq!(format_duration(3_599_999), "59m");
        assert_eq!(format_duration(3_600_000), "1h 0m");
        assert_eq!(format_duration(3_900_000), "1h 5m");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 0), "░░░░░░░░░░");
        assert_eq!(progress_bar(100, 100), "██████████");
        assert_eq!(progress_bar(50, 100), "█████░░░░░");
        assert_eq!(progress_bar(1, 100), "█░░░░░░░░░");
        assert_eq!(progress_bar(200, 100), "██████████");
    }

    #[test]
    fn test_month_bounds() {
        let period = Period::month(2024, 2).unwrap();
        assert_eq!(
            period_bounds(period),
            Some((date(2024, 2, 1), date(2024, 2, 29)))
        );
    }

    // ========== Report Tests ==========

    #[tokio::test]
    async fn test_day_report() {
        let store = sample_store().await;
        let mut output = Vec::new();
        run(&mut output, &store, Period::day(date(2025, 1, 28)), false)
            .await
            .unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        WEB TIME REPORT: Tuesday, Jan 28, 2025

        github.com                  1h 5m  ██████████
        news.ycombinator.com          12m  ██░░░░░░░░

        SUMMARY
        ───────
        Total tracked:  1h 17m
        Domains:        2
        ");
    }

    #[tokio::test]
    async fn test_month_report_sums_days() {
        let store = sample_store().await;
        let rollup = load_rollup(&store, Period::month(2025, 1).unwrap())
            .await
            .unwrap();
        let output = format_report(&rollup);

        assert!(output.starts_with("WEB TIME REPORT: January 2025\n"));
        assert!(output.contains("github.com                 1h 15m  ██████████\n"));
        assert!(output.contains("Empty / New Tab               45s  █░░░░░░░░░\n"));
        assert!(output.contains("Days tracked:   2\n"));
    }

    #[tokio::test]
    async fn test_empty_report() {
        let store = MemoryStore::new();
        let mut output = Vec::new();
        run(&mut output, &store, Period::day(date(2025, 1, 29)), false)
            .await
            .unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        WEB TIME REPORT: Wednesday, Jan 29, 2025

        No time recorded this day.

        Hint: Run 'wt status' to check the filter and database.
        ");
    }

    #[tokio::test]
    async fn test_json_report() {
        let store = sample_store().await;
        let rollup = load_rollup(&store, Period::month(2025, 1).unwrap())
            .await
            .unwrap();
        let generated_at = Utc.with_ymd_and_hms(2025, 1, 30, 8, 0, 0).unwrap();
        let output = format_report_json(&rollup, generated_at, "Europe/Berlin").unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(
            value,
            json!({
                "generated_at": "2025-01-30T08:00:00+00:00",
                "timezone": "Europe/Berlin",
                "period": {"start": "2025-01-01", "end": "2025-01-31", "type": "month"},
                "entries": [
                    {"key": "github.com", "ms": 4_500_000},
                    {"key": "news.ycombinator.com", "ms": 720_000},
                    {"key": "Empty / New Tab", "ms": 45_000},
                ],
                "totals": {"time_ms": 5_265_000, "domain_count": 3, "days_tracked": 2},
            })
        );
    }
}
