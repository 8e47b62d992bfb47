//! Search results and their assembly

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::frontier::ConnectionSet;
use super::node::Node;
use crate::discovery::{DiscoveryContext, NeighborSource};
use crate::error::Result;
use crate::graph::CachedPath;
use crate::storage::{EntityKind, EntityRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Found,
    Exhausted,
}

/// Record that evidenced a hop, e.g. the post two hashtags appeared in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EntityKind,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl From<&EntityRecord> for Evidence {
    fn from(record: &EntityRecord) -> Self {
        Self {
            kind: record.kind,
            key: record.key.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

/// Entities from start to end, plus the evidence crossed on the way
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path<T> {
    pub entities: Vec<T>,
    pub provenance: Vec<Evidence>,
}

impl<T> Path<T> {
    /// Hops
    pub fn len(&self) -> usize {
        self.entities.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchMetadata {
    pub elapsed_ms: u64,
    /// Expansions that spent upstream budget
    pub calls_made: u32,
    /// Lookups spent resolving provisional path entities
    pub resolution_calls: u32,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult<T> {
    /// Entity key to the keys of its neighbors
    pub connections: BTreeMap<String, Vec<String>>,
    pub paths: Vec<Path<T>>,
    pub metadata: SearchMetadata,
}

impl<T> SearchResult<T> {
    pub fn is_found(&self) -> bool {
        self.metadata.outcome == Outcome::Found
    }
}

/// Cached path in entity form; `None` when a vertex does not decode.
pub(crate) fn to_path<S: NeighborSource>(source: &S, cached: &CachedPath) -> Option<Path<S::Entity>> {
    let entities = cached
        .entities
        .iter()
        .map(|record| source.from_record(record))
        .collect::<Option<Vec<_>>>()?;

    Some(Path {
        entities,
        provenance: cached.provenance.iter().map(Evidence::from).collect(),
    })
}

/// Cached neighbors of every path entity.
///
/// Path entities are always reported as keys; neighbors are added until
/// `max_reported_nodes` distinct entities have been reported overall.
pub(crate) fn path_connections<S: NeighborSource>(
    source: &S,
    ctx: &DiscoveryContext<'_>,
    paths: &[Path<S::Entity>],
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut reported: HashSet<String> = HashSet::new();
    let mut on_paths: Vec<&S::Entity> = Vec::new();
    for entity in paths.iter().flat_map(|p| p.entities.iter()) {
        if reported.insert(source.cache_key_of(entity)) {
            on_paths.push(entity);
        }
    }

    let neighbor_lists = on_paths
        .par_iter()
        .map(|entity| Ok((source.cache_key_of(entity), source.cached_neighbors(ctx, entity)?)))
        .collect::<Result<Vec<_>>>()?;

    let max_nodes = ctx.config.max_reported_nodes;
    let mut connections = BTreeMap::new();
    for (key, neighbors) in neighbor_lists {
        let mut keys = Vec::new();
        for neighbor in &neighbors {
            let neighbor_key = source.cache_key_of(neighbor);
            if reported.contains(&neighbor_key) {
                keys.push(neighbor_key);
            } else if reported.len() < max_nodes {
                reported.insert(neighbor_key.clone());
                keys.push(neighbor_key);
            }
        }
        connections.insert(key, keys);
    }

    Ok(connections)
}

/// Adjacency of every expanded node that discovered something
pub(crate) fn partial_connections<S: NeighborSource>(
    source: &S,
    discovered: &[(Node<S::Entity>, ConnectionSet<S::Entity>)],
) -> BTreeMap<String, Vec<String>> {
    discovered
        .iter()
        .filter(|(_, set)| !set.is_empty())
        .map(|(node, set)| {
            let neighbors = set.nodes().map(|n| source.cache_key_of(&n.value)).collect();
            (source.cache_key_of(&node.value), neighbors)
        })
        .collect()
}
