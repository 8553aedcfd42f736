mod common;

use std::collections::BTreeSet;

use anipush::db::TitleWrite;
use anipush::domain::events::NotificationKind;
use anipush::domain::{Group, MediaStatus, RelationKind, TitleId};
use common::{Y2019, Y2020, entry, gateway, spawn_store, title};

fn group(canonical: i32, members: &[i32]) -> Group {
    Group {
        canonical_id: TitleId::new(canonical),
        members: members.iter().copied().map(TitleId::new).collect::<BTreeSet<_>>(),
    }
}

#[tokio::test]
async fn title_upsert_is_last_write_wins() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    let original = title(1, MediaStatus::Releasing, Y2020, 100);
    assert_eq!(
        gateway.upsert_title(&original).await.unwrap(),
        TitleWrite::Inserted
    );
    assert_eq!(
        gateway.upsert_title(&original).await.unwrap(),
        TitleWrite::Unchanged
    );

    let stale = title(1, MediaStatus::Cancelled, Y2020, 50);
    assert_eq!(
        gateway.upsert_title(&stale).await.unwrap(),
        TitleWrite::Unchanged
    );
    let stored = gateway.title(TitleId::new(1)).await.unwrap().unwrap();
    assert_eq!(stored.status, MediaStatus::Releasing);

    let newer = title(1, MediaStatus::Finished, Y2020, 200);
    assert_eq!(
        gateway.upsert_title(&newer).await.unwrap(),
        TitleWrite::Updated { regroup: true }
    );
    let stored = gateway.title(TitleId::new(1)).await.unwrap().unwrap();
    assert_eq!(stored.status, MediaStatus::Finished);
    assert_eq!(stored.updated_at, 200);
}

#[tokio::test]
async fn first_application_announces_new_exactly_once() {
    let store = spawn_store().await;
    let (gateway, recorder) = gateway(&store);

    gateway
        .upsert_title(&title(1, MediaStatus::Releasing, Y2020, 100))
        .await
        .unwrap();
    let subscriber = store.upsert_subscriber(42, "alice").await.unwrap();
    store
        .add_watch_records(subscriber.id, &[(TitleId::new(1), 0)])
        .await
        .unwrap();

    let applied = gateway.apply_group(&group(1, &[1])).await.unwrap();
    assert_eq!(applied.events, 1);
    assert_eq!(applied.delivered, 1);

    let sent = recorder.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::New);
    assert_eq!(sent[0].chat_id, 42);

    let again = gateway.apply_group(&group(1, &[1])).await.unwrap();
    assert_eq!(again.events, 0);
    assert!(recorder.take().is_empty());

    assert_eq!(
        gateway.baseline_status(TitleId::new(1)).await.unwrap(),
        Some(MediaStatus::Releasing)
    );
}

#[tokio::test]
async fn status_change_is_announced_and_clears_membership() {
    let store = spawn_store().await;
    let (gateway, recorder) = gateway(&store);

    gateway
        .upsert_title(&title(1, MediaStatus::Releasing, Y2020, 100))
        .await
        .unwrap();
    let subscriber = store.upsert_subscriber(42, "alice").await.unwrap();
    store
        .add_watch_records(subscriber.id, &[(TitleId::new(1), 0)])
        .await
        .unwrap();
    gateway.apply_group(&group(1, &[1])).await.unwrap();
    recorder.take();

    gateway
        .upsert_title(&title(1, MediaStatus::Finished, Y2020, 200))
        .await
        .unwrap();
    assert_eq!(store.group_of(TitleId::new(1)).await.unwrap(), None);

    let applied = gateway.apply_group(&group(1, &[1])).await.unwrap();
    assert_eq!(applied.events, 1);
    let sent = recorder.take();
    assert_eq!(sent[0].kind, NotificationKind::StatusChange);
    assert_eq!(sent[0].title.status, MediaStatus::Finished);
    assert_eq!(
        store.group_of(TitleId::new(1)).await.unwrap(),
        Some(TitleId::new(1))
    );
}

#[tokio::test]
async fn new_episodes_are_announced_once_per_watcher() {
    let store = spawn_store().await;
    let (gateway, recorder) = gateway(&store);

    let mut airing = title(1, MediaStatus::Releasing, Y2020, 100);
    airing.latest_aired_episode = Some(3);
    gateway.upsert_title(&airing).await.unwrap();
    gateway.apply_group(&group(1, &[1])).await.unwrap();

    let subscriber = store.upsert_subscriber(42, "alice").await.unwrap();
    store
        .add_watch_records(subscriber.id, &[(TitleId::new(1), 3)])
        .await
        .unwrap();

    airing.latest_aired_episode = Some(5);
    airing.updated_at = 200;
    gateway.upsert_title(&airing).await.unwrap();

    let applied = gateway.apply_group(&group(1, &[1])).await.unwrap();
    assert_eq!(applied.events, 1);
    let sent = recorder.take();
    assert_eq!(sent[0].kind, NotificationKind::EpisodeUpdate);
    assert_eq!(sent[0].title.latest_aired_episode, Some(5));

    let again = gateway.apply_group(&group(1, &[1])).await.unwrap();
    assert_eq!(again.events, 0);
}

#[tokio::test]
async fn group_watchers_hear_about_every_member_once() {
    let store = spawn_store().await;
    let (gateway, recorder) = gateway(&store);

    gateway
        .upsert_title(&title(1, MediaStatus::Finished, Y2019, 100))
        .await
        .unwrap();
    gateway
        .upsert_title(&title(2, MediaStatus::Releasing, Y2020, 100))
        .await
        .unwrap();

    let alice = store.upsert_subscriber(42, "alice").await.unwrap();
    store
        .add_watch_records(alice.id, &[(TitleId::new(1), 0), (TitleId::new(2), 0)])
        .await
        .unwrap();
    let bob = store.upsert_subscriber(43, "bob").await.unwrap();
    store
        .add_watch_records(bob.id, &[(TitleId::new(2), 0)])
        .await
        .unwrap();

    let applied = gateway.apply_group(&group(1, &[1, 2])).await.unwrap();
    assert_eq!(applied.events, 4);

    let mut sent: Vec<(i64, i32)> = recorder
        .take()
        .into_iter()
        .map(|n| (n.chat_id, n.title.id.value()))
        .collect();
    sent.sort_unstable();
    assert_eq!(sent, vec![(42, 1), (42, 2), (43, 1), (43, 2)]);

    let watchers = gateway.watchers(TitleId::new(1)).await.unwrap();
    assert_eq!(watchers.len(), 2);
}

#[tokio::test]
async fn newer_edges_invalidate_the_owning_group() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    let first = entry(
        title(1, MediaStatus::Finished, Y2019, 100),
        &[(2, RelationKind::Sequel)],
    );
    gateway.store_entry(&first).await.unwrap();
    gateway
        .upsert_title(&title(2, MediaStatus::Finished, Y2020, 100))
        .await
        .unwrap();
    gateway.apply_group(&group(1, &[1, 2])).await.unwrap();

    // Same observation again changes nothing.
    assert_eq!(gateway.upsert_edges(&first.relations).await.unwrap(), 0);
    assert_eq!(
        store.group_of(TitleId::new(1)).await.unwrap(),
        Some(TitleId::new(1))
    );

    let later = entry(
        title(1, MediaStatus::Finished, Y2019, 300),
        &[(2, RelationKind::Sequel)],
    );
    assert_eq!(gateway.upsert_edges(&later.relations).await.unwrap(), 1);
    assert_eq!(store.group_of(TitleId::new(1)).await.unwrap(), None);
    assert_eq!(
        store.group_of(TitleId::new(2)).await.unwrap(),
        Some(TitleId::new(1))
    );

    let edges = gateway.edges_from(TitleId::new(1)).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].discovered_at, 300);
}

#[tokio::test]
async fn merging_groups_dissolves_the_absorbed_one() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    for (id, start) in [(1, Y2019), (2, Y2020)] {
        gateway
            .upsert_title(&title(id, MediaStatus::Finished, start, 100))
            .await
            .unwrap();
    }
    gateway.apply_group(&group(1, &[1])).await.unwrap();
    gateway.apply_group(&group(2, &[2])).await.unwrap();
    assert_eq!(store.count_groups().await.unwrap(), 2);

    gateway.apply_group(&group(1, &[1, 2])).await.unwrap();
    assert_eq!(store.count_groups().await.unwrap(), 1);
    assert_eq!(
        store.group_members(TitleId::new(1)).await.unwrap(),
        vec![TitleId::new(1), TitleId::new(2)]
    );
}

#[tokio::test]
async fn newer_record_replaces_the_reported_edge_set() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    gateway
        .store_entry(&entry(
            title(1, MediaStatus::Finished, Y2019, 100),
            &[(2, RelationKind::Sequel)],
        ))
        .await
        .unwrap();
    gateway
        .upsert_title(&title(2, MediaStatus::Finished, Y2020, 100))
        .await
        .unwrap();
    gateway.apply_group(&group(1, &[1, 2])).await.unwrap();

    // The catalog retargeted the sequel edge from 2 to 3.
    gateway
        .store_entry(&entry(
            title(1, MediaStatus::Finished, Y2019, 200),
            &[(3, RelationKind::Sequel)],
        ))
        .await
        .unwrap();

    let targets: Vec<TitleId> = gateway
        .edges_from(TitleId::new(1))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.target)
        .collect();
    assert_eq!(targets, vec![TitleId::new(3)]);
    assert!(gateway.edges_into(TitleId::new(2)).await.unwrap().is_empty());
    assert_eq!(store.group_of(TitleId::new(1)).await.unwrap(), None);

    // An older record neither restores nor adds edges.
    let write = gateway
        .store_entry(&entry(
            title(1, MediaStatus::Finished, Y2019, 50),
            &[(4, RelationKind::Sequel)],
        ))
        .await
        .unwrap();
    assert_eq!(write, TitleWrite::Unchanged);
    let edges = gateway.edges_from(TitleId::new(1)).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].target, TitleId::new(3));
    assert_eq!(edges[0].discovered_at, 200);
}
