use crate::domain::TitleId;
use crate::state::SharedState;

pub async fn cmd_watchers(state: &SharedState, title_id: i32) -> anyhow::Result<()> {
    let id = TitleId::new(title_id);

    if !state.gateway.title_in_store(id).await? {
        println!("Title {title_id} is not in the store yet");
        return Ok(());
    }

    let group = state.store.group_of(id).await?;
    match group {
        Some(canonical) => {
            let members = state.store.group_members(canonical).await?;
            println!(
                "Title {title_id} belongs to franchise {canonical} ({} members)",
                members.len()
            );
        }
        None => println!("Title {title_id} is not grouped yet"),
    }

    let baseline = state.gateway.baseline_status(id).await?;
    println!(
        "Baseline status: {}",
        baseline.map_or("none (never grouped)", |s| s.label())
    );

    let watchers = state.gateway.watchers(id).await?;
    if watchers.is_empty() {
        println!("No subscribers are notified about this title");
        return Ok(());
    }

    println!();
    println!("{:<8} {:<16} {:<24} {}", "ID", "Chat", "AniList user", "Since");
    println!("{:-<70}", "");
    for s in watchers {
        println!(
            "{:<8} {:<16} {:<24} {}",
            s.id, s.chat_id, s.anilist_username, s.created_at
        );
    }

    Ok(())
}
