//! Limit and block commands.

use std::io::Write;

use anyhow::Result;
use wt_core::policy::{self, load_policy};
use wt_core::{Classifier, KeyValueStore};

use super::util::domain_key;
use crate::cli::LimitAction;

/// Runs `wt limit set|remove`.
pub async fn run<W: Write, S: KeyValueStore>(
    writer: &mut W,
    store: &S,
    classifier: &Classifier,
    action: &LimitAction,
) -> Result<()> {
    match action {
        LimitAction::Set { domain, minutes } => {
            let key = domain_key(domain, classifier)?;
            policy::set_limit(store, &key, *minutes).await?;
            if *minutes == 0 {
                writeln!(writer, "Removed limit for {key}")?;
                return Ok(());
            }
            writeln!(writer, "Limit for {key}: {minutes}m/day")?;

            let blocking = load_policy(store).await?.blocking;
            if !blocking.get(key.as_str()).copied().unwrap_or(false) {
                writeln!(writer, "Tracking only. Run 'wt block {key} --on' to enforce it.")?;
            }
        }
        LimitAction::Remove { domain } => {
            let key = domain_key(domain, classifier)?;
            policy::remove_limit(store, &key).await?;
            writeln!(writer, "Removed limit for {key}")?;
        }
    }
    tracing::debug!(?action, "limit updated");
    Ok(())
}

/// Runs `wt block <domain> --on|--off`.
pub async fn block<W: Write, S: KeyValueStore>(
    writer: &mut W,
    store: &S,
    classifier: &Classifier,
    domain: &str,
    enabled: bool,
) -> Result<()> {
    let key = domain_key(domain, classifier)?;
    policy::set_blocking(store, &key, enabled).await?;

    if !enabled {
        writeln!(writer, "Blocking disabled for {key}")?;
        return Ok(());
    }
    writeln!(writer, "Blocking enabled for {key}")?;
    let has_limit = load_policy(store)
        .await?
        .limits
        .get(key.as_str())
        .is_some_and(|m| *m > 0);
    if !has_limit {
        writeln!(
            writer,
            "No limit set. Run 'wt limit set {key} <minutes>' to choose one."
        )?;
    }
    Ok(())
}
