use chrono::{TimeZone, Utc};

use crate::state::SharedState;

pub async fn cmd_status(state: &SharedState) -> anyhow::Result<()> {
    state.store.ping().await?;

    let titles = state.store.count_titles().await?;
    let ungrouped = state.store.count_ungrouped_titles().await?;
    let groups = state.store.count_groups().await?;
    let checkpoint = state.store.scan_checkpoint().await?;
    let last_pass = state.store.last_scan_pass_at().await?;

    println!("Anipush status");
    println!("{:-<70}", "");
    println!("  Titles:           {titles}");
    println!("  Ungrouped titles: {ungrouped}");
    println!("  Franchises:       {groups}");
    println!(
        "  Checkpoint:       {}",
        checkpoint
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map_or_else(|| "none".to_string(), |dt| dt.to_rfc3339())
    );
    println!(
        "  Last full pass:   {}",
        last_pass.unwrap_or_else(|| "never".to_string())
    );

    Ok(())
}
