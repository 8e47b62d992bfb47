//! Persistent graph cache API and implementation

pub mod cache;
pub mod traversal;
pub mod id_gen;

pub use cache::{SledGraphCache, now_secs};
pub use id_gen::compute_entity_id;

use crate::error::Result;
use crate::storage::{CacheStats, DeltaLog, EntityKind, EntityRecord, SearchRecord};

/// A path found in the cache.
///
/// `entities` holds only endpoint-kind vertices; evidence vertices crossed on
/// the way are collected in `provenance`, in path order.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPath {
    pub entities: Vec<EntityRecord>,
    pub provenance: Vec<EntityRecord>,
}

impl CachedPath {
    /// Hops between endpoint-kind entities
    pub fn len(&self) -> usize {
        self.entities.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_ids(&self) -> Vec<u128> {
        self.entities.iter().map(|e| e.id).collect()
    }
}

/// Durable store of discovered entities and edges.
///
/// Implementations must tolerate concurrent readers and writers: entity
/// writes are last-writer-wins and edge writes are idempotent. Every error
/// is a `CacheUnavailable` and is fatal for the search that hit it.
pub trait GraphCache: Send + Sync {
    // === QUERIES ===

    /// Whether a path of at most `max_length` logical hops exists.
    /// Evidence hops are accounted for through `kind.hop_factor()`.
    fn path_exists(&self, kind: EntityKind, start: u128, end: u128, max_length: usize) -> Result<bool>;

    /// All shortest paths up to `max_length` logical hops, deduplicated by
    /// entity sequence.
    fn shortest_paths(&self, kind: EntityKind, start: u128, end: u128, max_length: usize) -> Result<Vec<CachedPath>>;

    /// Whether the entity's neighbor set has been fetched completely
    fn is_fully_expanded(&self, id: u128) -> Result<bool>;

    /// Direct cached neighbors of the same kind, looking through evidence
    fn find_neighbors(&self, id: u128) -> Result<Vec<EntityRecord>>;

    fn get(&self, id: u128) -> Result<Option<EntityRecord>>;

    // === WRITES ===

    /// Apply a batch of writes. Entities are written before edges and
    /// expansion marks last.
    fn apply(&self, log: &mut DeltaLog) -> Result<()>;

    fn upsert(&self, record: EntityRecord) -> Result<()> {
        let mut log = DeltaLog::new();
        log.upsert_entity(record);
        self.apply(&mut log)
    }

    fn upsert_edge(&self, a: &EntityRecord, b: &EntityRecord, provenance: Option<&EntityRecord>) -> Result<()> {
        let mut log = DeltaLog::new();
        log.upsert_edge(a, b, provenance, now_secs());
        self.apply(&mut log)
    }

    fn mark_fully_expanded(&self, id: u128) -> Result<()> {
        let mut log = DeltaLog::new();
        log.mark_expanded(id, now_secs());
        self.apply(&mut log)
    }

    // === HISTORY ===

    fn record_search(&self, record: &SearchRecord) -> Result<()>;

    /// Newest first
    fn recent_searches(&self, limit: usize) -> Result<Vec<SearchRecord>>;

    // === MAINTENANCE ===

    fn flush(&self) -> Result<()>;

    fn stats(&self) -> Result<CacheStats>;
}
