mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use anipush::domain::{MediaStatus, RelationKind, TitleId};
use anipush::services::{ReadThroughLookup, ResolveError, Resolver, StoreLookup};
use common::{FakeCatalog, Y2019, Y2020, Y2021, entry, gateway, spawn_store, title};

fn ids(raw: &[i32]) -> BTreeSet<TitleId> {
    raw.iter().copied().map(TitleId::new).collect()
}

#[tokio::test]
async fn stored_franchise_resolves_from_every_member() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    for e in [
        entry(
            title(100, MediaStatus::Finished, Y2020, 10),
            &[(101, RelationKind::Parent), (102, RelationKind::Sequel)],
        ),
        entry(
            title(101, MediaStatus::Finished, Y2019, 10),
            &[(100, RelationKind::SideStory)],
        ),
        entry(
            title(102, MediaStatus::Releasing, Y2021, 10),
            &[(100, RelationKind::Prequel)],
        ),
    ] {
        gateway.store_entry(&e).await.unwrap();
    }

    let lookup = StoreLookup::new(gateway.clone());
    for seed in [100, 101, 102] {
        let group = Resolver::new(&lookup)
            .resolve(TitleId::new(seed))
            .await
            .unwrap();
        assert_eq!(group.canonical_id, TitleId::new(101), "seed {seed}");
        assert_eq!(group.members, ids(&[100, 101, 102]), "seed {seed}");
    }
}

#[tokio::test]
async fn mutual_parents_are_rejected() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    gateway
        .store_entry(&entry(
            title(1, MediaStatus::Finished, Y2019, 10),
            &[(2, RelationKind::Parent)],
        ))
        .await
        .unwrap();
    gateway
        .store_entry(&entry(
            title(2, MediaStatus::Finished, Y2020, 10),
            &[(1, RelationKind::Parent)],
        ))
        .await
        .unwrap();

    let lookup = StoreLookup::new(gateway);
    let err = Resolver::new(&lookup)
        .resolve(TitleId::new(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::InconsistentParents { .. }));
}

#[tokio::test]
async fn store_lookup_reports_titles_not_yet_fetched() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    gateway
        .store_entry(&entry(
            title(1, MediaStatus::Finished, Y2019, 10),
            &[(2, RelationKind::Sequel), (3, RelationKind::SideStory)],
        ))
        .await
        .unwrap();

    let lookup = StoreLookup::new(gateway);
    match Resolver::new(&lookup).resolve(TitleId::new(1)).await {
        Err(ResolveError::Unresolved { missing }) => {
            assert_eq!(missing, vec![TitleId::new(2), TitleId::new(3)]);
        }
        other => panic!("expected unresolved, got {other:?}"),
    }
}

#[tokio::test]
async fn read_through_lookup_persists_fetched_titles() {
    let store = spawn_store().await;
    let (gateway, _) = gateway(&store);

    let catalog = Arc::new(FakeCatalog::default());
    catalog.add_known(entry(
        title(100, MediaStatus::Finished, Y2020, 10),
        &[(101, RelationKind::Parent), (102, RelationKind::Sequel)],
    ));
    catalog.add_known(entry(title(101, MediaStatus::Finished, Y2019, 10), &[]));
    catalog.add_known(entry(
        title(102, MediaStatus::Releasing, Y2021, 10),
        &[(100, RelationKind::Prequel)],
    ));

    let lookup = ReadThroughLookup::new(gateway.clone(), catalog);
    let group = Resolver::new(&lookup)
        .resolve(TitleId::new(100))
        .await
        .unwrap();

    assert_eq!(group.canonical_id, TitleId::new(101));
    assert_eq!(group.members, ids(&[100, 101, 102]));
    assert_eq!(store.count_titles().await.unwrap(), 3);
    assert_eq!(gateway.edges_from(TitleId::new(100)).await.unwrap().len(), 2);
}
