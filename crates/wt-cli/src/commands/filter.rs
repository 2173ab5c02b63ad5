//! Filter commands: which domains get their time persisted.

use std::io::Write;

use anyhow::{Context, Result};
use wt_core::policy::{self, load_filter};
use wt_core::{Classifier, FilterMode, KeyValueStore};

use super::util::domain_key;
use crate::cli::FilterAction;

/// Runs `wt filter mode|add|remove`.
pub async fn run<W: Write, S: KeyValueStore>(
    writer: &mut W,
    store: &S,
    classifier: &Classifier,
    action: &FilterAction,
) -> Result<()> {
    match action {
        FilterAction::Mode { mode } => {
            let mode: FilterMode = mode.parse().context("expected all, include or exclude")?;
            policy::set_filter_mode(store, mode).await?;
            writeln!(writer, "Filter mode: {mode}")?;
            if mode == FilterMode::Include && load_filter(store).await?.list.is_empty() {
                writeln!(writer, "The filter list is empty, so nothing will be tracked.")?;
            }
        }
        FilterAction::Add { domain } => {
            let key = domain_key(domain, classifier)?;
            if policy::add_filter_domain(store, key.as_str()).await? {
                writeln!(writer, "Added {key} to the filter list")?;
            } else {
                writeln!(writer, "{key} is already in the filter list")?;
            }
        }
        FilterAction::Remove { domain } => {
            let key = domain_key(domain, classifier)?;
            if policy::remove_filter_domain(store, key.as_str()).await? {
                writeln!(writer, "Removed {key} from the filter list")?;
            } else {
                writeln!(writer, "{key} is not in the filter list")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use wt_core::MemoryStore;

    async fn exec(store: &MemoryStore, action: FilterAction) -> Result<String> {
        let mut out = Vec::new();
        run(&mut out, store, &Classifier::default(), &action).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn add_remove_and_mode() {
        let store = MemoryStore::new();

        let out = exec(&store, FilterAction::Add { domain: "Example.com".into() })
            .await
            .unwrap();
        assert_eq!(out, "Added example.com to the filter list\n");

        let out = exec(&store, FilterAction::Add { domain: "example.com".into() })
            .await
            .unwrap();
        assert_eq!(out, "example.com is already in the filter list\n");

        let out = exec(&store, FilterAction::Mode { mode: "exclude".into() })
            .await
            .unwrap();
        assert_eq!(out, "Filter mode: exclude\n");

        let filter = load_filter(&store).await.unwrap();
        assert_eq!(filter.mode, FilterMode::Exclude);
        assert_eq!(filter.list, vec!["example.com".to_string()]);

        let out = exec(&store, FilterAction::Remove { domain: "other.com".into() })
            .await
            .unwrap();
        assert_eq!(out, "other.com is not in the filter list\n");
    }

    #[tokio::test]
    async fn include_with_empty_list_warns() {
        let store = MemoryStore::new();
        let out = exec(&store, FilterAction::Mode { mode: "include".into() })
            .await
            .unwrap();
        assert!(out.contains("nothing will be tracked"));
    }

    #[tokio::test]
    async fn invalid_mode_is_rejected() {
        let store = MemoryStore::new();
        let err = exec(&store, FilterAction::Mode { mode: "some".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected all, include or exclude"));
        assert_eq!(load_filter(&store).await.unwrap().mode, FilterMode::All);
    }
}
