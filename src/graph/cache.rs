//! sled-backed persistent graph cache

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sled::{Batch, Db, Tree};

use super::id_gen::{edge_key, id_key};
use super::{traversal, CachedPath, GraphCache};
use crate::error::Result;
use crate::storage::{CacheDelta, CacheStats, DeltaLog, EdgeRecord, EntityKind, EntityRecord, SearchRecord};

const TREE_ENTITIES: &str = "entities";
const TREE_ADJACENCY: &str = "adjacency";
const TREE_EXPANDED: &str = "expanded";
const TREE_HISTORY: &str = "history";

/// Default cap on shortest paths returned per query
pub const DEFAULT_MAX_PATHS: usize = 64;

/// Raw paths enumerated per returned path; evidence variants of the same
/// entity sequence collapse during dedup.
const RAW_PATHS_PER_PATH: usize = 16;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Normalize database path ensuring .degrees extension
///
/// Examples:
/// - `/path/to/db` -> `/path/to/db.degrees`
/// - `/path/to/db.db` -> `/path/to/db.degrees`
/// - `/path/to/db.degrees` -> `/path/to/db.degrees` (unchanged)
fn normalize_db_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();

    if path.extension().and_then(|s| s.to_str()) == Some("degrees") {
        return path.to_path_buf();
    }

    if path.extension().is_some() {
        return path.with_extension("degrees");
    }

    let mut new_path = path.to_path_buf();
    let new_filename = format!(
        "{}.degrees",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("db")
    );
    new_path.set_file_name(new_filename);
    new_path
}

/// Can `neighbor` be crossed while searching between entities of `kind`?
fn traversable(kind: EntityKind, neighbor: EntityKind) -> bool {
    neighbor == kind || (neighbor.is_evidence() && kind.hop_factor() > 1)
}

/// Graph cache persisted in sled trees
pub struct SledGraphCache {
    path: Option<PathBuf>,
    db: Db,
    entities: Tree,
    adjacency: Tree,
    expanded: Tree,
    history: Tree,
    max_paths: usize,
}

impl SledGraphCache {
    /// Open (or create) a cache at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = normalize_db_path(path);
        fs::create_dir_all(&path)?;

        let db = sled::open(&path)?;
        let cache = Self::from_db(db, Some(path))?;

        let stats = cache.stats()?;
        tracing::info!(
            "Opened graph cache at {:?}: {} entities, {} edges, {} expanded",
            cache.path,
            stats.entity_count,
            stats.edge_count,
            stats.expanded_count
        );

        Ok(cache)
    }

    /// In-memory cache discarded on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, None)
    }

    fn from_db(db: Db, path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            entities: db.open_tree(TREE_ENTITIES)?,
            adjacency: db.open_tree(TREE_ADJACENCY)?,
            expanded: db.open_tree(TREE_EXPANDED)?,
            history: db.open_tree(TREE_HISTORY)?,
            db,
            path,
            max_paths: DEFAULT_MAX_PATHS,
        })
    }

    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Outgoing edge records of `id` (both directions are stored)
    fn edges_of(&self, id: u128) -> Result<Vec<EdgeRecord>> {
        let mut result = Vec::new();
        for item in self.adjacency.scan_prefix(id_key(id)) {
            let (_, value) = item?;
            result.push(bincode::deserialize::<EdgeRecord>(&value)?);
        }
        Ok(result)
    }

    fn traversal_neighbors(&self, kind: EntityKind, id: u128) -> Result<Vec<u128>> {
        Ok(self
            .edges_of(id)?
            .into_iter()
            .filter(|e| traversable(kind, e.dst_kind))
            .map(|e| e.dst)
            .collect())
    }

    fn merge_entity(&self, record: EntityRecord) -> Result<()> {
        self.entities.fetch_and_update(id_key(record.id), |old| {
            let merged = match old.and_then(|bytes| bincode::deserialize::<EntityRecord>(bytes).ok()) {
                Some(existing) => existing.merged_with(record.clone()),
                None => record.clone(),
            };
            // Returning None would delete the entry
            bincode::serialize(&merged)
                .ok()
                .or_else(|| old.map(|bytes| bytes.to_vec()))
        })?;
        Ok(())
    }

    /// Insert one edge direction unless it already exists
    fn insert_edge(&self, edge: &EdgeRecord) -> Result<bool> {
        let value = bincode::serialize(edge)?;
        let inserted = self
            .adjacency
            .compare_and_swap(edge_key(edge.src, edge.dst), None::<&[u8]>, Some(value))?
            .is_ok();
        Ok(inserted)
    }

    fn load_path(&self, ids: &[u128]) -> Result<Option<CachedPath>> {
        let mut entities = Vec::with_capacity(ids.len());
        let mut provenance = Vec::new();

        for &id in ids {
            let Some(record) = self.get(id)? else {
                tracing::warn!("Cached edge points at missing entity {}", id);
                return Ok(None);
            };
            if record.kind.is_evidence() {
                provenance.push(record);
            } else {
                entities.push(record);
            }
        }

        Ok(Some(CachedPath { entities, provenance }))
    }
}

impl GraphCache for SledGraphCache {
    fn path_exists(&self, kind: EntityKind, start: u128, end: u128, max_length: usize) -> Result<bool> {
        let max_hops = max_length * kind.hop_factor();
        let distance = traversal::bfs_distance(start, end, max_hops, |id| {
            self.traversal_neighbors(kind, id)
        })?;
        Ok(distance.is_some())
    }

    fn shortest_paths(&self, kind: EntityKind, start: u128, end: u128, max_length: usize) -> Result<Vec<CachedPath>> {
        let max_hops = max_length * kind.hop_factor();
        let raw = traversal::shortest_paths(
            start,
            end,
            max_hops,
            self.max_paths.saturating_mul(RAW_PATHS_PER_PATH),
            |id| self.traversal_neighbors(kind, id),
        )?;

        let mut seen: HashSet<Vec<u128>> = HashSet::new();
        let mut result = Vec::new();

        for ids in raw {
            let Some(path) = self.load_path(&ids)? else { continue };
            if !seen.insert(path.entity_ids()) {
                continue;
            }
            result.push(path);
            if result.len() >= self.max_paths {
                break;
            }
        }

        tracing::debug!(
            "shortest_paths({:x} -> {:x}, max_length={}): {} paths",
            start, end, max_length, result.len()
        );

        Ok(result)
    }

    fn is_fully_expanded(&self, id: u128) -> Result<bool> {
        Ok(self.expanded.contains_key(id_key(id))?)
    }

    fn find_neighbors(&self, id: u128) -> Result<Vec<EntityRecord>> {
        let mut seen = HashSet::from([id]);
        let mut neighbor_ids = Vec::new();

        for edge in self.edges_of(id)? {
            if edge.dst_kind.is_evidence() {
                for through in self.edges_of(edge.dst)? {
                    if !through.dst_kind.is_evidence() && seen.insert(through.dst) {
                        neighbor_ids.push(through.dst);
                    }
                }
            } else if seen.insert(edge.dst) {
                neighbor_ids.push(edge.dst);
            }
        }

        let mut result = Vec::with_capacity(neighbor_ids.len());
        for neighbor in neighbor_ids {
            if let Some(record) = self.get(neighbor)? {
                result.push(record);
            }
        }
        Ok(result)
    }

    fn get(&self, id: u128) -> Result<Option<EntityRecord>> {
        match self.entities.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn apply(&self, log: &mut DeltaLog) -> Result<()> {
        if log.is_empty() {
            return Ok(());
        }

        let mut entities = Vec::new();
        let mut edges = Vec::new();
        let mut marks = Batch::default();
        let mut mark_count = 0;

        for delta in log.drain() {
            match delta {
                CacheDelta::UpsertEntity(record) => entities.push(record),
                CacheDelta::UpsertEdge(edge) => edges.push(edge),
                CacheDelta::MarkExpanded { id, at } => {
                    marks.insert(id_key(id).to_vec(), at.to_be_bytes().to_vec());
                    mark_count += 1;
                }
            }
        }

        let entity_count = entities.len();
        for record in entities {
            self.merge_entity(record)?;
        }

        let mut new_edges = 0;
        for edge in &edges {
            if self.insert_edge(edge)? {
                new_edges += 1;
            }
            self.insert_edge(&edge.reversed())?;
        }

        // Only after the edges are in, so an expanded entity always has them
        self.expanded.apply_batch(marks)?;

        tracing::debug!(
            "Applied cache delta: {} entities, {} edges ({} new), {} expansion marks",
            entity_count, edges.len(), new_edges, mark_count
        );

        Ok(())
    }

    fn record_search(&self, record: &SearchRecord) -> Result<()> {
        let seq = self.db.generate_id()?;
        self.history.insert(seq.to_be_bytes(), bincode::serialize(record)?)?;
        Ok(())
    }

    fn recent_searches(&self, limit: usize) -> Result<Vec<SearchRecord>> {
        let mut result = Vec::new();
        for item in self.history.iter().rev().take(limit) {
            let (_, value) = item?;
            result.push(bincode::deserialize(&value)?);
        }
        Ok(result)
    }

    fn flush(&self) -> Result<()> {
        let bytes = self.db.flush()?;
        tracing::info!("Flush complete: {} bytes", bytes);
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            entity_count: self.entities.len(),
            edge_count: self.adjacency.len() / 2,
            expanded_count: self.expanded.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hashtag(tag: &str) -> EntityRecord {
        EntityRecord::new(EntityKind::Hashtag, tag)
    }

    fn user(id: u64) -> EntityRecord {
        EntityRecord::new(EntityKind::User, id.to_string())
    }

    fn post(id: u64) -> EntityRecord {
        EntityRecord::new(EntityKind::Post, id.to_string())
    }

    fn seed_users(cache: &SledGraphCache, edges: &[(u64, u64)]) {
        for &(a, b) in edges {
            cache.upsert_edge(&user(a), &user(b), None).unwrap();
        }
    }

    fn seed_hashtags(cache: &SledGraphCache, edges: &[(&str, &str, u64)]) {
        for &(a, b, p) in edges {
            cache.upsert_edge(&hashtag(a), &hashtag(b), Some(&post(p))).unwrap();
        }
    }

    #[test]
    fn test_normalize_db_path_no_extension() {
        let path = normalize_db_path("/path/to/db");
        assert_eq!(path, PathBuf::from("/path/to/db.degrees"));
    }

    #[test]
    fn test_normalize_db_path_with_degrees_extension() {
        let path = normalize_db_path("/path/to/db.degrees");
        assert_eq!(path, PathBuf::from("/path/to/db.degrees"));
    }

    #[test]
    fn test_normalize_db_path_with_other_extension() {
        let path = normalize_db_path("/path/to/db.db");
        assert_eq!(path, PathBuf::from("/path/to/db.degrees"));
    }

    #[test]
    fn test_normalize_db_path_relative() {
        let path = normalize_db_path("mydb");
        assert_eq!(path, PathBuf::from("mydb.degrees"));
    }

    #[test]
    fn test_user_path_exists_within_length() {
        let cache = SledGraphCache::temporary().unwrap();
        seed_users(&cache, &[(1, 2), (2, 3)]);

        assert!(cache.path_exists(EntityKind::User, user(1).id, user(3).id, 2).unwrap());
        assert!(!cache.path_exists(EntityKind::User, user(1).id, user(3).id, 1).unwrap());
    }

    #[test]
    fn test_hashtag_path_length_counts_evidence_hops() {
        // rust -post1- wasm -post2- web: two logical hops, four persisted
        let cache = SledGraphCache::temporary().unwrap();
        seed_hashtags(&cache, &[("rust", "wasm", 1), ("wasm", "web", 2)]);

        let (rust, web) = (hashtag("rust").id, hashtag("web").id);
        assert!(cache.path_exists(EntityKind::Hashtag, rust, web, 2).unwrap());
        assert!(!cache.path_exists(EntityKind::Hashtag, rust, web, 1).unwrap());

        let paths = cache.shortest_paths(EntityKind::Hashtag, rust, web, 2).unwrap();
        assert_eq!(paths.len(), 1);
        let keys: Vec<_> = paths[0].entities.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["rust", "wasm", "web"]);
        assert_eq!(paths[0].provenance.len(), 2);
        assert_eq!(paths[0].len(), 2);
    }

    #[test]
    fn test_shortest_paths_dedup_by_entity_sequence() {
        // Two different posts evidence the same rust-wasm hop
        let cache = SledGraphCache::temporary().unwrap();
        seed_hashtags(&cache, &[("rust", "wasm", 1), ("rust", "wasm", 2)]);

        let paths = cache
            .shortest_paths(EntityKind::Hashtag, hashtag("rust").id, hashtag("wasm").id, 3)
            .unwrap();
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_shortest_paths_keeps_ties() {
        let cache = SledGraphCache::temporary().unwrap();
        seed_users(&cache, &[(1, 2), (2, 4), (1, 3), (3, 4)]);

        let paths = cache.shortest_paths(EntityKind::User, user(1).id, user(4).id, 3).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.len() == 2));
    }

    #[test]
    fn test_upsert_edge_is_idempotent() {
        let cache = SledGraphCache::temporary().unwrap();
        seed_users(&cache, &[(1, 2), (1, 2), (2, 1)]);

        assert_eq!(cache.stats().unwrap().edge_count, 1);
        assert_eq!(cache.find_neighbors(user(1).id).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_edge_stores_endpoints() {
        let cache = SledGraphCache::temporary().unwrap();
        let (a, c, b) = (
            EntityRecord::provisional(EntityKind::User, "1"),
            EntityRecord::provisional(EntityKind::User, "3"),
            EntityRecord::provisional(EntityKind::User, "2"),
        );
        cache.upsert_edge(&a, &c, None).unwrap();
        cache.upsert_edge(&c, &b, None).unwrap();

        assert_eq!(cache.get(c.id).unwrap(), Some(c.clone()));
        assert_eq!(cache.stats().unwrap().entity_count, 3);

        let paths = cache.shortest_paths(EntityKind::User, a.id, b.id, 3).unwrap();
        assert_eq!(paths.len(), 1);
        let keys: Vec<_> = paths[0].entities.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "3", "2"]);
    }

    #[test]
    fn test_find_neighbors_looks_through_evidence() {
        let cache = SledGraphCache::temporary().unwrap();
        seed_hashtags(&cache, &[("rust", "wasm", 1), ("rust", "tokio", 1), ("rust", "wasm", 2)]);

        let mut keys: Vec<_> = cache
            .find_neighbors(hashtag("rust").id)
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["tokio".to_string(), "wasm".to_string()]);

        // wasm and tokio co-occur in post 1
        let wasm: Vec<_> = cache.find_neighbors(hashtag("wasm").id).unwrap().into_iter().map(|r| r.key).collect();
        assert!(wasm.contains(&"tokio".to_string()));
        assert!(!wasm.contains(&"wasm".to_string()));
    }

    #[test]
    fn test_provisional_write_does_not_clobber_resolved_entity() {
        let cache = SledGraphCache::temporary().unwrap();
        let resolved = user(7).with_metadata(r#"{"screen_name":"seven"}"#);
        cache.upsert(resolved.clone()).unwrap();
        cache.upsert(EntityRecord::provisional(EntityKind::User, "7")).unwrap();

        assert_eq!(cache.get(resolved.id).unwrap(), Some(resolved));
    }

    #[test]
    fn test_mark_fully_expanded() {
        let cache = SledGraphCache::temporary().unwrap();
        let id = user(1).id;
        assert!(!cache.is_fully_expanded(id).unwrap());
        cache.mark_fully_expanded(id).unwrap();
        assert!(cache.is_fully_expanded(id).unwrap());
    }

    #[test]
    fn test_recent_searches_newest_first() {
        let cache = SledGraphCache::temporary().unwrap();
        for i in 0..3 {
            cache
                .record_search(&SearchRecord {
                    kind: EntityKind::User,
                    start: format!("{}", i),
                    end: "x".into(),
                    found: i % 2 == 0,
                    calls_made: i,
                    elapsed_ms: 1,
                    finished_at: 0,
                })
                .unwrap();
        }

        let recent = cache.recent_searches(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].start, "2");
        assert_eq!(recent[1].start, "1");
    }

    #[test]
    fn test_cache_persists_after_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("social");

        {
            let cache = SledGraphCache::open(&db_path).unwrap();
            seed_users(&cache, &[(1, 2)]);
            cache.mark_fully_expanded(user(1).id).unwrap();
            cache.flush().unwrap();
            assert_eq!(
                cache.path().and_then(|p| p.extension()).and_then(|s| s.to_str()),
                Some("degrees")
            );
        }

        {
            let cache = SledGraphCache::open(&db_path).unwrap();
            assert!(cache.is_fully_expanded(user(1).id).unwrap());
            assert!(cache.path_exists(EntityKind::User, user(1).id, user(2).id, 1).unwrap());
        }
    }
}
