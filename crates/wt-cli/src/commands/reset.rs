//! Reset command: clears the whole store.

use std::io::Write;

use anyhow::Result;
use wt_core::KeyValueStore;

pub async fn run<W: Write, S: KeyValueStore>(writer: &mut W, store: &S, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("refusing to delete all tracked time and settings without --yes");
    }
    store.clear().await?;
    writeln!(writer, "Cleared all tracked time, limits and filter settings.")?;
    Ok(())
}
