//! Franchise resolution over the relation graph.
//!
//! The graph is whatever the catalog reports: directed, possibly cyclic, and
//! occasionally self-contradictory. Resolution first climbs `PARENT` edges to
//! a root, rejecting chains that loop back on themselves, then walks every
//! traversable edge from the root with an explicit stack. Edges are followed
//! in both directions, so titles that only name a shared neighbour still end
//! up in one group whichever of them is the seed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::clients::{CatalogError, CatalogSource};
use crate::domain::{CatalogEntry, Group, RelationEdge, TitleId};
use crate::services::gateway::{GatewayError, PersistenceGateway};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("referenced titles are not stored yet: {missing:?}")]
    Unresolved { missing: Vec<TitleId> },

    #[error("titles claim each other as parent: {chain:?}")]
    InconsistentParents { chain: Vec<TitleId> },

    #[error("title {0} is a literary work and never joins a franchise")]
    Excluded(TitleId),

    #[error(transparent)]
    Store(#[from] GatewayError),
}

/// Source of titles and their edges during one resolution.
#[async_trait::async_trait]
pub trait RelationLookup: Send + Sync {
    /// `Ok(None)` when the title is unknown to this source.
    async fn node(&self, id: TitleId) -> Result<Option<CatalogEntry>, ResolveError>;

    /// Edges reported by other titles that point at `id`.
    async fn referrers(&self, id: TitleId) -> Result<Vec<RelationEdge>, ResolveError>;
}

/// Reads only what is already stored. Used by the scan driver.
pub struct StoreLookup {
    gateway: PersistenceGateway,
}

impl StoreLookup {
    #[must_use]
    pub const fn new(gateway: PersistenceGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl RelationLookup for StoreLookup {
    async fn node(&self, id: TitleId) -> Result<Option<CatalogEntry>, ResolveError> {
        let Some(title) = self.gateway.title(id).await? else {
            return Ok(None);
        };
        let relations = self.gateway.edges_from(id).await?;
        Ok(Some(CatalogEntry { title, relations }))
    }

    async fn referrers(&self, id: TitleId) -> Result<Vec<RelationEdge>, ResolveError> {
        Ok(self.gateway.edges_into(id).await?)
    }
}

/// Reads from the store and falls back to the catalog, persisting whatever it
/// fetches. Used for on-demand resolution.
pub struct ReadThroughLookup {
    gateway: PersistenceGateway,
    catalog: Arc<dyn CatalogSource>,
}

impl ReadThroughLookup {
    #[must_use]
    pub fn new(gateway: PersistenceGateway, catalog: Arc<dyn CatalogSource>) -> Self {
        Self { gateway, catalog }
    }
}

#[async_trait::async_trait]
impl RelationLookup for ReadThroughLookup {
    async fn node(&self, id: TitleId) -> Result<Option<CatalogEntry>, ResolveError> {
        if let Some(title) = self.gateway.title(id).await? {
            let relations = self.gateway.edges_from(id).await?;
            return Ok(Some(CatalogEntry { title, relations }));
        }

        let Some(entry) = self.catalog.media_with_relations(id).await? else {
            return Ok(None);
        };
        self.gateway.store_entry(&entry).await?;
        Ok(Some(entry))
    }

    async fn referrers(&self, id: TitleId) -> Result<Vec<RelationEdge>, ResolveError> {
        Ok(self.gateway.edges_into(id).await?)
    }
}

pub struct Resolver<'a> {
    lookup: &'a dyn RelationLookup,
    /// Ids known to be unavailable upstream; edges into them are ignored.
    ignored: Option<&'a BTreeSet<TitleId>>,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(lookup: &'a dyn RelationLookup) -> Self {
        Self {
            lookup,
            ignored: None,
        }
    }

    #[must_use]
    pub fn ignoring(mut self, ids: &'a BTreeSet<TitleId>) -> Self {
        self.ignored = Some(ids);
        self
    }

    fn is_ignored(&self, id: TitleId) -> bool {
        self.ignored.is_some_and(|set| set.contains(&id))
    }

    /// Resolves the franchise containing `seed`.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::Unresolved`] when visited titles are unknown to the lookup
    /// - [`ResolveError::InconsistentParents`] when the parent chain loops
    /// - [`ResolveError::Excluded`] when the seed is a literary work
    /// - [`ResolveError::Catalog`] / [`ResolveError::Store`] when the lookup fails
    pub async fn resolve(&self, seed: TitleId) -> Result<Group, ResolveError> {
        let mut cache: HashMap<TitleId, Option<CatalogEntry>> = HashMap::new();

        let Some(seed_entry) = self.fetch(&mut cache, seed).await? else {
            return Err(ResolveError::Unresolved {
                missing: vec![seed],
            });
        };
        if seed_entry.title.format.is_literary() {
            return Err(ResolveError::Excluded(seed));
        }

        let root = self.find_root(&mut cache, seed).await?;

        let mut stack = vec![seed, root];
        let mut visited = BTreeSet::new();
        let mut missing = BTreeSet::new();
        let mut members: Vec<(i64, TitleId)> = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }

            let Some(entry) = self.fetch(&mut cache, id).await? else {
                missing.insert(id);
                continue;
            };
            if entry.title.format.is_literary() {
                continue;
            }

            for edge in entry.relations.iter().filter(|e| e.is_traversable()) {
                if !visited.contains(&edge.target) && !self.is_ignored(edge.target) {
                    stack.push(edge.target);
                }
            }

            for edge in self.lookup.referrers(id).await? {
                if edge.is_traversable()
                    && !visited.contains(&edge.source)
                    && !self.is_ignored(edge.source)
                {
                    stack.push(edge.source);
                }
            }

            members.push((entry.title.start_at, id));
        }

        if !missing.is_empty() {
            return Err(ResolveError::Unresolved {
                missing: missing.into_iter().collect(),
            });
        }

        // Earliest start wins, ties go to the smallest id.
        let canonical_id = members
            .iter()
            .min()
            .map(|(_, id)| *id)
            .unwrap_or(seed);

        let group = Group {
            canonical_id,
            members: members.into_iter().map(|(_, id)| id).collect(),
        };

        debug!(
            seed = %seed,
            root = %root,
            canonical_id = %group.canonical_id,
            members = group.len(),
            "Resolved franchise"
        );
        Ok(group)
    }

    /// Follows `PARENT` edges upward until a title without one. Climbing
    /// stops below a parent that is not stored; the traversal reports it
    /// together with anything else missing.
    async fn find_root(
        &self,
        cache: &mut HashMap<TitleId, Option<CatalogEntry>>,
        seed: TitleId,
    ) -> Result<TitleId, ResolveError> {
        let mut chain = vec![seed];
        let mut guard = BTreeSet::from([seed]);
        let mut current = seed;

        loop {
            let Some(entry) = self.fetch(cache, current).await? else {
                return Err(ResolveError::Unresolved {
                    missing: vec![current],
                });
            };

            let parent = entry
                .relations
                .iter()
                .find(|e| e.is_parent() && e.is_traversable() && !self.is_ignored(e.target))
                .map(|e| e.target);

            let Some(parent) = parent else {
                return Ok(current);
            };

            chain.push(parent);
            if !guard.insert(parent) {
                warn!(seed = %seed, chain = ?chain, "Parent chain loops back on itself");
                return Err(ResolveError::InconsistentParents { chain });
            }
            if self.fetch(cache, parent).await?.is_none() {
                return Ok(current);
            }
            current = parent;
        }
    }

    async fn fetch(
        &self,
        cache: &mut HashMap<TitleId, Option<CatalogEntry>>,
        id: TitleId,
    ) -> Result<Option<CatalogEntry>, ResolveError> {
        if let Some(cached) = cache.get(&id) {
            return Ok(cached.clone());
        }
        let node = self.lookup.node(id).await?;
        cache.insert(id, node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MediaFormat, MediaStatus, RelationKind, Title};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemoryLookup {
        nodes: BTreeMap<TitleId, CatalogEntry>,
    }

    impl MemoryLookup {
        fn add(&mut self, id: i32, start_at: i64, format: MediaFormat, edges: &[(i32, RelationKind)]) {
            let id = TitleId::new(id);
            self.nodes.insert(
                id,
                CatalogEntry {
                    title: Title {
                        id,
                        name: format!("Title {id}"),
                        format,
                        status: MediaStatus::Finished,
                        episodes: Some(12),
                        latest_aired_episode: Some(12),
                        cover_url: None,
                        start_at,
                        updated_at: 1,
                    },
                    relations: edges
                        .iter()
                        .map(|(target, kind)| RelationEdge {
                            source: id,
                            target: TitleId::new(*target),
                            kind: *kind,
                            target_format: MediaFormat::Tv,
                            discovered_at: 1,
                        })
                        .collect(),
                },
            );
        }

        fn tv(&mut self, id: i32, start_at: i64, edges: &[(i32, RelationKind)]) {
            self.add(id, start_at, MediaFormat::Tv, edges);
        }
    }

    #[async_trait::async_trait]
    impl RelationLookup for MemoryLookup {
        async fn node(&self, id: TitleId) -> Result<Option<CatalogEntry>, ResolveError> {
            Ok(self.nodes.get(&id).cloned())
        }

        async fn referrers(&self, id: TitleId) -> Result<Vec<RelationEdge>, ResolveError> {
            Ok(self
                .nodes
                .values()
                .flat_map(|entry| entry.relations.iter())
                .filter(|edge| edge.target == id)
                .cloned()
                .collect())
        }
    }

    fn ids(raw: &[i32]) -> BTreeSet<TitleId> {
        raw.iter().copied().map(TitleId::new).collect()
    }

    const Y2019: i64 = 1_546_300_800;
    const Y2020: i64 = 1_577_836_800;
    const Y2021: i64 = 1_609_459_200;

    #[tokio::test]
    async fn parent_chain_resolves_to_earliest_member() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(100, Y2020, &[(101, RelationKind::Parent), (102, RelationKind::Sequel)]);
        lookup.tv(101, Y2019, &[(100, RelationKind::SideStory)]);
        lookup.tv(102, Y2021, &[(100, RelationKind::Prequel)]);

        for seed in [100, 101, 102] {
            let group = Resolver::new(&lookup)
                .resolve(TitleId::new(seed))
                .await
                .unwrap();
            assert_eq!(group.canonical_id, TitleId::new(101));
            assert_eq!(group.members, ids(&[100, 101, 102]));
        }
    }

    #[tokio::test]
    async fn mutual_parents_are_rejected() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(1, Y2020, &[(2, RelationKind::Parent)]);
        lookup.tv(2, Y2019, &[(1, RelationKind::Parent)]);

        let err = Resolver::new(&lookup)
            .resolve(TitleId::new(1))
            .await
            .unwrap_err();
        match err {
            ResolveError::InconsistentParents { chain } => {
                assert_eq!(chain, vec![TitleId::new(1), TitleId::new(2), TitleId::new(1)]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cyclic_narrative_edges_terminate() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(1, Y2021, &[(2, RelationKind::Sequel)]);
        lookup.tv(2, Y2020, &[(3, RelationKind::Sequel)]);
        lookup.tv(3, Y2019, &[(1, RelationKind::Sequel)]);

        let group = Resolver::new(&lookup).resolve(TitleId::new(1)).await.unwrap();
        assert_eq!(group.canonical_id, TitleId::new(3));
        assert_eq!(group.len(), 3);
    }

    #[tokio::test]
    async fn excluded_edges_do_not_join_groups() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(1, Y2020, &[(2, RelationKind::Character), (3, RelationKind::Adaptation)]);
        lookup.tv(2, Y2019, &[]);
        lookup.add(3, Y2019, MediaFormat::Manga, &[]);
        // the adaptation edge points at a manga
        if let Some(entry) = lookup.nodes.get_mut(&TitleId::new(1)) {
            entry.relations[1].target_format = MediaFormat::Manga;
        }

        let group = Resolver::new(&lookup).resolve(TitleId::new(1)).await.unwrap();
        assert_eq!(group.members, ids(&[1]));
        assert_eq!(group.canonical_id, TitleId::new(1));
    }

    #[tokio::test]
    async fn missing_nodes_are_reported_together() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(1, Y2020, &[(5, RelationKind::Sequel), (6, RelationKind::SideStory)]);

        let err = Resolver::new(&lookup)
            .resolve(TitleId::new(1))
            .await
            .unwrap_err();
        match err {
            ResolveError::Unresolved { missing } => {
                assert_eq!(missing, vec![TitleId::new(5), TitleId::new(6)]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let unavailable = ids(&[5, 6]);
        let group = Resolver::new(&lookup)
            .ignoring(&unavailable)
            .resolve(TitleId::new(1))
            .await
            .unwrap();
        assert_eq!(group.members, ids(&[1]));
    }

    #[tokio::test]
    async fn literary_seed_is_excluded() {
        let mut lookup = MemoryLookup::default();
        lookup.add(9, Y2020, MediaFormat::Novel, &[]);

        let err = Resolver::new(&lookup)
            .resolve(TitleId::new(9))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Excluded(id) if id == TitleId::new(9)));
    }

    #[tokio::test]
    async fn ties_break_on_smallest_id() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(8, Y2020, &[(4, RelationKind::Alternative)]);
        lookup.tv(4, Y2020, &[(8, RelationKind::Alternative)]);

        let group = Resolver::new(&lookup).resolve(TitleId::new(8)).await.unwrap();
        assert_eq!(group.canonical_id, TitleId::new(4));
    }

    #[tokio::test]
    async fn seed_below_one_directional_parent_stays_in_group() {
        let mut lookup = MemoryLookup::default();
        // 20 names 10 as parent, 10 does not list 20 back
        lookup.tv(20, Y2021, &[(10, RelationKind::Parent)]);
        lookup.tv(10, Y2020, &[]);

        let group = Resolver::new(&lookup).resolve(TitleId::new(20)).await.unwrap();
        assert_eq!(group.members, ids(&[10, 20]));
        assert_eq!(group.canonical_id, TitleId::new(10));
    }

    #[tokio::test]
    async fn siblings_naming_only_a_shared_prequel_resolve_together() {
        let mut lookup = MemoryLookup::default();
        // 2 and 3 both follow 1, 1 lists neither of them
        lookup.tv(1, Y2019, &[]);
        lookup.tv(2, Y2020, &[(1, RelationKind::Prequel)]);
        lookup.tv(3, Y2021, &[(1, RelationKind::Prequel)]);

        for seed in [1, 2, 3] {
            let group = Resolver::new(&lookup)
                .resolve(TitleId::new(seed))
                .await
                .unwrap();
            assert_eq!(group.canonical_id, TitleId::new(1));
            assert_eq!(group.members, ids(&[1, 2, 3]));
        }
    }

    #[tokio::test]
    async fn character_referrers_stay_outside() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(1, Y2019, &[]);
        lookup.tv(2, Y2020, &[(1, RelationKind::Character)]);

        let group = Resolver::new(&lookup).resolve(TitleId::new(1)).await.unwrap();
        assert_eq!(group.members, ids(&[1]));
    }

    #[tokio::test]
    async fn missing_parent_is_reported_with_other_gaps() {
        let mut lookup = MemoryLookup::default();
        lookup.tv(1, Y2020, &[(2, RelationKind::Parent), (3, RelationKind::Sequel)]);

        let err = Resolver::new(&lookup)
            .resolve(TitleId::new(1))
            .await
            .unwrap_err();
        match err {
            ResolveError::Unresolved { missing } => {
                assert_eq!(missing, vec![TitleId::new(2), TitleId::new(3)]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
