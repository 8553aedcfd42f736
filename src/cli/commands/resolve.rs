use crate::domain::TitleId;
use crate::services::{ReadThroughLookup, Resolver};
use crate::state::SharedState;
use std::sync::Arc;

pub async fn cmd_resolve(state: &SharedState, id: i32, apply: bool) -> anyhow::Result<()> {
    let lookup = ReadThroughLookup::new(state.gateway.clone(), Arc::clone(&state.catalog));
    let group = Resolver::new(&lookup).resolve(TitleId::new(id)).await?;

    let members: Vec<TitleId> = group.members.iter().copied().collect();
    let titles = state.store.get_titles_by_ids(&members).await?;

    println!("Franchise of {id} (canonical {}):", group.canonical_id);
    println!("{:-<70}", "");
    for title in &titles {
        let marker = if title.id == group.canonical_id { "*" } else { " " };
        println!(
            "{marker} {:>7}  {:<40}  {:<10}  {}",
            title.id.value(),
            truncate(&title.name, 40),
            title.format.as_str(),
            title.status.label()
        );
    }

    if apply {
        let applied = state.gateway.apply_group(&group).await?;
        println!();
        println!(
            "Applied: {} notification(s), {} delivered, {} failed",
            applied.events, applied.delivered, applied.failed
        );
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
