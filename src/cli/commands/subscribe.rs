use crate::state::SharedState;

pub async fn cmd_subscribe(
    state: &SharedState,
    chat_id: i64,
    username: &str,
    sync: bool,
) -> anyhow::Result<()> {
    let subscriber = state.subscriptions.register(chat_id, username).await?;
    println!(
        "✓ Chat {} subscribed as AniList user {}",
        subscriber.chat_id, subscriber.anilist_username
    );

    if sync {
        let report = state.subscriptions.sync_pending().await?;
        println!(
            "  Imported {} subscriber(s), {} new watch record(s), {} title(s) fetched",
            report.imported, report.watch_records, report.titles_fetched
        );
        let watched = state.gateway.watch_set(subscriber.id).await?;
        println!("  Watching {} title(s)", watched.len());
    } else {
        println!("  Watched list will be imported on the next sync");
    }

    Ok(())
}
