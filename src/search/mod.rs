//! Bidirectional, budget-bounded path search
//!
//! A search first asks the cache for a path. On a miss it alternates
//! expansions between a start-side and an end-side frontier, writing every
//! discovery back to the cache and re-checking the cache after each step.
//! It stops when the cache holds a path, when the call budget is spent, or
//! when either frontier runs dry.

pub mod frontier;
pub mod node;
pub mod result;

use std::collections::HashSet;
use std::time::Instant;

pub use frontier::{ConnectionSet, SearchFrontier};
pub use node::{heuristic, Node};
pub use result::{Evidence, Outcome, Path, SearchMetadata, SearchResult};

use crate::discovery::{DiscoveryContext, NeighborSource};
use crate::error::{Result, SearchError};
use crate::graph::{now_secs, CachedPath};
use crate::storage::SearchRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest<T> {
    pub start: T,
    pub end: T,
    /// Longest acceptable path, in hops
    pub max_degrees: usize,
    /// Budget-spending expansions allowed
    pub max_api_calls: u32,
}

impl<T> SearchRequest<T> {
    pub fn new(start: T, end: T, max_degrees: usize, max_api_calls: u32) -> Self {
        Self {
            start,
            end,
            max_degrees,
            max_api_calls,
        }
    }
}

fn validate<S: NeighborSource>(source: &S, request: &SearchRequest<S::Entity>) -> Result<()> {
    if source.cache_key_of(&request.start) == source.cache_key_of(&request.end) {
        return Err(SearchError::validation("start and end must differ"));
    }
    if request.max_api_calls < 1 {
        return Err(SearchError::validation("maxAPICalls must be at least 1"));
    }
    if request.max_degrees < 1 {
        return Err(SearchError::validation("maxDegrees must be at least 1"));
    }
    Ok(())
}

/// Find the shortest connections between `request.start` and `request.end`.
///
/// Validation and cache errors are returned; upstream failures only shrink
/// what the search can discover.
pub fn find_path<S: NeighborSource>(
    source: &S,
    ctx: &DiscoveryContext<'_>,
    request: &SearchRequest<S::Entity>,
) -> Result<SearchResult<S::Entity>> {
    validate(source, request)?;

    let started = Instant::now();
    let kind = source.kind();
    let start_key = source.cache_key_of(&request.start);
    let end_key = source.cache_key_of(&request.end);
    let span = tracing::info_span!("find_path", %kind, start = %start_key, end = %end_key);
    let _guard = span.enter();

    let start_id = source.entity_id(&request.start);
    let end_id = source.entity_id(&request.end);
    let max_degrees = request.max_degrees;

    // CacheLookup
    let cached = ctx.cache.shortest_paths(kind, start_id, end_id, max_degrees)?;
    let paths = decode_paths(source, &cached);
    if !paths.is_empty() {
        tracing::info!("Cache hit: {} paths", paths.len());
        return finish_found(source, ctx, request, paths, 0, started);
    }
    if !cached.is_empty() {
        tracing::warn!("None of {} cached paths could be decoded, searching", cached.len());
    }

    // Searching
    let op = source.operation();
    let mut frontiers = [
        SearchFrontier::new(Node::new(request.start.clone(), 0)),
        SearchFrontier::new(Node::new(request.end.clone(), 0)),
    ];
    let mut external_allowed = [true, true];
    let mut seen: HashSet<S::Entity> = HashSet::from([request.start.clone(), request.end.clone()]);
    let mut discovered: Vec<(Node<S::Entity>, ConnectionSet<S::Entity>)> = Vec::new();
    let mut calls_made: u32 = 0;
    let mut found_link = false;
    let mut side = 0;

    tracing::debug!("Cache miss, searching (max_degrees={}, max_api_calls={})", max_degrees, request.max_api_calls);

    while !found_link
        && (calls_made == 0 || calls_made < request.max_api_calls)
        && !frontiers[0].is_empty()
        && !frontiers[1].is_empty()
    {
        let Some(node) = frontiers[side].pop() else { break };
        let expansion = source.expand(ctx, &node.value, external_allowed[side])?;
        if expansion.budget_spent {
            calls_made += 1;
        }
        if external_allowed[side] && ctx.allocator.minimum_budget(op, ctx.auth) == 0 {
            tracing::warn!("{:?} budget exhausted, side {} continues from cache only", op, side);
            external_allowed[side] = false;
        }

        let mut connections = ConnectionSet::new(ctx.config.max_connections_per_node);
        let distance = node.distance + 1;
        for (neighbor, sightings) in expansion.neighbors {
            if !seen.insert(neighbor.clone()) {
                continue;
            }
            let recorded = connections.add(Node::new(neighbor.clone(), distance), sightings);
            if recorded && distance < max_degrees.saturating_sub(1) {
                frontiers[side].push(Node::new(neighbor, distance));
            }
        }
        frontiers[side].sort_by_heuristic(max_degrees);
        discovered.push((node, connections));

        if ctx.cache.path_exists(kind, start_id, end_id, max_degrees)? {
            found_link = true;
        }
        side = 1 - side;
    }

    if found_link {
        let cached = ctx.cache.shortest_paths(kind, start_id, end_id, max_degrees)?;
        let paths = decode_paths(source, &cached);
        if !paths.is_empty() {
            tracing::info!("Link found after {} calls", calls_made);
            return finish_found(source, ctx, request, paths, calls_made, started);
        }
        tracing::warn!(
            "Cache reports a link but yielded no usable path ({} cached), reporting exhausted",
            cached.len()
        );
    }

    tracing::info!(
        "Exhausted after {} calls, {} nodes expanded",
        calls_made,
        discovered.len()
    );
    let result = SearchResult {
        connections: result::partial_connections(source, &discovered),
        paths: Vec::new(),
        metadata: SearchMetadata {
            elapsed_ms: started.elapsed().as_millis() as u64,
            calls_made,
            resolution_calls: 0,
            outcome: Outcome::Exhausted,
        },
    };
    record_history(source, ctx, request, &result);
    Ok(result)
}

/// Cached paths as entity paths, deduplicated by key sequence. Paths with
/// an entity the source cannot decode are dropped.
fn decode_paths<S: NeighborSource>(source: &S, cached: &[CachedPath]) -> Vec<Path<S::Entity>> {
    let mut paths: Vec<Path<S::Entity>> = Vec::with_capacity(cached.len());
    let mut sequences: HashSet<Vec<String>> = HashSet::new();
    for path in cached.iter().filter_map(|c| result::to_path(source, c)) {
        let sequence = path.entities.iter().map(|e| source.cache_key_of(e)).collect();
        if sequences.insert(sequence) {
            paths.push(path);
        }
    }
    paths
}

/// `paths` must not be empty
fn finish_found<S: NeighborSource>(
    source: &S,
    ctx: &DiscoveryContext<'_>,
    request: &SearchRequest<S::Entity>,
    mut paths: Vec<Path<S::Entity>>,
    calls_made: u32,
    started: Instant,
) -> Result<SearchResult<S::Entity>> {
    let resolution_calls = source.ensure_link_provenance(ctx, &mut paths)?;
    let connections = result::path_connections(source, ctx, &paths)?;

    let result = SearchResult {
        connections,
        paths,
        metadata: SearchMetadata {
            elapsed_ms: started.elapsed().as_millis() as u64,
            calls_made,
            resolution_calls,
            outcome: Outcome::Found,
        },
    };
    record_history(source, ctx, request, &result);
    Ok(result)
}

fn record_history<S: NeighborSource>(
    source: &S,
    ctx: &DiscoveryContext<'_>,
    request: &SearchRequest<S::Entity>,
    result: &SearchResult<S::Entity>,
) {
    let record = SearchRecord {
        kind: source.kind(),
        start: source.cache_key_of(&request.start),
        end: source.cache_key_of(&request.end),
        found: result.is_found(),
        calls_made: result.metadata.calls_made,
        elapsed_ms: result.metadata.elapsed_ms,
        finished_at: now_secs(),
    };
    if let Err(e) = ctx.cache.record_search(&record) {
        tracing::warn!("Failed to record search history: {}", e);
    }
}
