//! Identity-mapped LRU caches of entity wrappers.
//!
//! At most one wrapper per identity is resident at a time. Wrappers leaving a
//! cache, by eviction or explicit expunge, are marked stale so that any holder
//! refetches before its next read.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use nodal_core::config::CacheConfig;
use nodal_core::{EntityKind, Identity};

use crate::entity::Entity;
use crate::session::{NodeData, RelationshipData};

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

/// Snapshot of one cache's occupancy.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    entries: LruCache<Identity, Arc<Entity>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Occupancy of both caches.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CacheSummary {
    pub nodes: CacheStats,
    pub relationships: CacheStats,
}

/// LRU cache of one entity kind.
pub struct EntityCache {
    kind: EntityKind,
    inner: Mutex<Inner>,
}

impl EntityCache {
    pub fn new(kind: EntityKind, capacity_hint: usize) -> Self {
        Self {
            kind,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity(capacity_hint)),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn get(&self, identity: Identity) -> Option<Arc<Entity>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(&identity).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.inner.lock().entries.contains(&identity)
    }

    /// Insert or replace the wrapper for its identity.
    pub fn put(&self, entity: Arc<Entity>) {
        let identity = entity.identity();
        let displaced = self.inner.lock().entries.push(identity, entity.clone());
        if let Some((_, old)) = displaced {
            if !Arc::ptr_eq(&old, &entity) {
                self.removed(old);
            }
        }
    }

    /// The resident wrapper for `identity`, or a new one from `make`.
    pub fn get_or_insert_with(&self, identity: Identity, make: impl FnOnce() -> Entity) -> Arc<Entity> {
        let (entity, displaced) = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.entries.get(&identity).cloned() {
                inner.hits += 1;
                return existing;
            }
            inner.misses += 1;
            let entity = Arc::new(make());
            let displaced = inner.entries.push(identity, entity.clone());
            (entity, displaced)
        };
        if let Some((_, old)) = displaced {
            self.removed(old);
        }
        entity
    }

    pub fn expunge(&self, identity: Identity) -> Option<Arc<Entity>> {
        let removed = self.inner.lock().entries.pop(&identity);
        if let Some(entity) = &removed {
            entity.on_removed_from_cache();
        }
        removed
    }

    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            let mut drained = Vec::with_capacity(inner.entries.len());
            while let Some((_, entity)) = inner.entries.pop_lru() {
                drained.push(entity);
            }
            drained
        };
        for entity in drained {
            entity.on_removed_from_cache();
        }
    }

    /// Change the capacity, evicting least-recently-used wrappers as needed.
    pub fn resize(&self, capacity_hint: usize) {
        let target = capacity(capacity_hint);
        let evicted: Vec<_> = {
            let mut inner = self.inner.lock();
            let mut evicted = Vec::new();
            while inner.entries.len() > target.get() {
                match inner.entries.pop_lru() {
                    Some((_, entity)) => evicted.push(entity),
                    None => break,
                }
            }
            inner.entries.resize(target);
            inner.evictions += evicted.len() as u64;
            evicted
        };
        for entity in evicted {
            entity.on_removed_from_cache();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    fn removed(&self, entity: Arc<Entity>) {
        self.inner.lock().evictions += 1;
        tracing::trace!(kind = %self.kind, id = %entity.identity(), "Evicted from cache");
        entity.on_removed_from_cache();
    }
}

/// The node and relationship caches of one database service.
pub struct GraphCaches {
    nodes: EntityCache,
    relationships: EntityCache,
}

impl GraphCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            nodes: EntityCache::new(EntityKind::Node, config.node_capacity),
            relationships: EntityCache::new(EntityKind::Relationship, config.relationship_capacity),
        }
    }

    pub fn nodes(&self) -> &EntityCache {
        &self.nodes
    }

    pub fn relationships(&self) -> &EntityCache {
        &self.relationships
    }

    pub fn for_kind(&self, kind: EntityKind) -> &EntityCache {
        match kind {
            EntityKind::Node => &self.nodes,
            EntityKind::Relationship => &self.relationships,
        }
    }

    pub fn get(&self, kind: EntityKind, identity: Identity) -> Option<Arc<Entity>> {
        self.for_kind(kind).get(identity)
    }

    /// The unique wrapper for a fetched node.
    pub(crate) fn resolve_node(&self, data: NodeData) -> Arc<Entity> {
        if let Some(existing) = self.nodes.get(data.identity) {
            existing.absorb(data.properties);
            return existing;
        }
        self.nodes
            .get_or_insert_with(data.identity, move || Entity::from_node(data))
    }

    /// The unique wrapper for a fetched relationship.
    pub(crate) fn resolve_relationship(&self, data: RelationshipData) -> Arc<Entity> {
        if let Some(existing) = self.relationships.get(data.identity) {
            existing.absorb(data.properties);
            return existing;
        }
        self.relationships
            .get_or_insert_with(data.identity, move || Entity::from_relationship(data))
    }

    pub fn expunge(&self, kind: EntityKind, identity: Identity) {
        if let Some(entity) = self.for_kind(kind).expunge(identity) {
            self.invalidate_dependents(&entity);
        }
    }

    pub fn expunge_all(&self, kind: EntityKind, identities: impl IntoIterator<Item = Identity>) {
        for identity in identities {
            self.expunge(kind, identity);
        }
    }

    /// Drop caches derived from `entity`, including its endpoints' adjacency.
    pub fn invalidate_dependents(&self, entity: &Entity) {
        entity.clear_adjacency();
        for endpoint in [entity.start(), entity.end()].into_iter().flatten() {
            if let Some(node) = self.nodes.get(endpoint) {
                node.clear_adjacency();
            }
        }
    }

    /// Mark a different resident wrapper for the same identity as stale.
    pub(crate) fn supersede(&self, entity: &Arc<Entity>) {
        if let Some(resident) = self.get(entity.kind(), entity.identity()) {
            if !Arc::ptr_eq(&resident, entity) {
                resident.mark_stale();
            }
        }
    }

    pub fn clear(&self) {
        self.nodes.clear();
        self.relationships.clear();
    }

    pub fn stats(&self) -> CacheSummary {
        CacheSummary {
            nodes: self.nodes.stats(),
            relationships: self.relationships.stats(),
        }
    }
}
