use crate::state::SharedState;

pub async fn cmd_scan(state: &SharedState, json: bool) -> anyhow::Result<()> {
    let report = state.scanner.run_scan_pass().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{:-<70}", "");
    println!("Scan pass {} complete", report.run_id);
    println!("  Pages fetched:      {}", report.pages);
    if report.short_pages_accepted > 0 {
        println!("  Short pages kept:   {}", report.short_pages_accepted);
    }
    println!("  Titles seen:        {}", report.titles_seen);
    println!("  Titles stored:      {}", report.titles_stored);
    println!(
        "  Pagination:         {}",
        if report.pagination_complete {
            "complete"
        } else {
            "interrupted (checkpoint kept)"
        }
    );
    println!("  Groups applied:     {}", report.groups_applied);
    println!("  Notifications:      {}", report.notifications);
    println!("  Resolve failures:   {}", report.resolve_failures);
    println!("  Backlog fetched:    {}", report.backlog_fetched);
    println!("  Unavailable:        {}", report.unavailable);
    println!("  Duration:           {} ms", report.duration_ms);

    Ok(())
}
