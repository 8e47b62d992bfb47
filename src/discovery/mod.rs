//! Neighbor discovery: cache first, then the rate-limited upstream
//!
//! A [`NeighborSource`] describes one entity type: how its cache key is
//! derived, how one upstream page is fetched and how provisional entities
//! are resolved. The shared expansion logic (cache shortcut, billing,
//! retries, write-back, self-loop and duplicate filtering) lives in the
//! provided [`NeighborSource::expand`].

pub mod hashtag;
pub mod user;
pub mod fixture;
pub mod timeout;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use fixture::StaticUpstream;
pub use hashtag::{Hashtag, HashtagApi, HashtagSource, Post};
pub use user::{User, UserApi, UserSource};

use crate::config::SearchConfig;
use crate::error::{Result, UpstreamError};
use crate::graph::{compute_entity_id, now_secs, GraphCache};
use crate::ratelimit::{AuthContext, Operation, RateLimitAllocator, RateLimitStatus, Scope};
use crate::search::Path;
use crate::storage::{DeltaLog, EntityKind, EntityRecord};

/// One page of results from an upstream listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitStatus>,
}

impl<T> Page<T> {
    pub fn single(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            rate_limit: None,
        }
    }
}

/// A discovered neighbor and the record that evidenced it
#[derive(Debug, Clone)]
pub struct Link<T> {
    pub neighbor: T,
    pub provenance: Option<EntityRecord>,
}

/// Upstream resource hit by a call and its reported counts, if any
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    pub resource: &'static str,
    pub status: Option<RateLimitStatus>,
}

#[derive(Debug, Clone)]
pub struct FetchedPage<T> {
    pub links: Vec<Link<T>>,
    pub next_cursor: Option<String>,
    pub usage: Vec<ResourceUsage>,
}

/// Neighbors of one expansion and whether it cost upstream budget
#[derive(Debug, Clone)]
pub struct Expansion<T> {
    /// Distinct neighbors, each with the number of links that produced it
    pub neighbors: Vec<(T, u32)>,
    pub budget_spent: bool,
}

impl<T> Expansion<T> {
    pub fn entities(&self) -> impl Iterator<Item = &T> {
        self.neighbors.iter().map(|(n, _)| n)
    }
}

/// Shared collaborators of one search
#[derive(Clone, Copy)]
pub struct DiscoveryContext<'a> {
    pub cache: &'a dyn GraphCache,
    pub allocator: &'a RateLimitAllocator,
    pub config: &'a SearchConfig,
    pub auth: Option<&'a AuthContext>,
}

pub trait NeighborSource: Send + Sync {
    type Entity: Clone + Eq + Hash + fmt::Debug + Send + Sync;

    fn kind(&self) -> EntityKind;

    /// Operation billed for one expansion
    fn operation(&self) -> Operation;

    fn cache_key_of(&self, entity: &Self::Entity) -> String;

    fn to_record(&self, entity: &Self::Entity) -> EntityRecord;

    fn from_record(&self, record: &EntityRecord) -> Option<Self::Entity>;

    /// One upstream page of neighbors of `entity`
    fn fetch_page(
        &self,
        entity: &Self::Entity,
        scope: &Scope,
        cursor: Option<&str>,
        timeout: Duration,
    ) -> std::result::Result<FetchedPage<Self::Entity>, UpstreamError>;

    /// Replace provisionally known entities on `paths` with resolved ones.
    /// Returns the number of upstream calls spent.
    fn ensure_link_provenance(&self, _ctx: &DiscoveryContext<'_>, _paths: &mut [Path<Self::Entity>]) -> Result<u32> {
        Ok(0)
    }

    fn entity_id(&self, entity: &Self::Entity) -> u128 {
        compute_entity_id(self.kind(), &self.cache_key_of(entity))
    }

    /// Cached neighbors only, no upstream call
    fn cached_neighbors(&self, ctx: &DiscoveryContext<'_>, entity: &Self::Entity) -> Result<Vec<Self::Entity>> {
        let records = ctx.cache.find_neighbors(self.entity_id(entity))?;
        let neighbors = records.iter().filter_map(|r| self.from_record(r)).collect();
        Ok(self.collapse_neighbors(entity, neighbors).into_iter().map(|(n, _)| n).collect())
    }

    /// Drop self-loops and collapse duplicates into sighting counts,
    /// keeping first-seen order
    fn collapse_neighbors(&self, entity: &Self::Entity, neighbors: Vec<Self::Entity>) -> Vec<(Self::Entity, u32)> {
        let own_key = self.cache_key_of(entity);
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut collapsed: Vec<(Self::Entity, u32)> = Vec::new();
        for neighbor in neighbors {
            let key = self.cache_key_of(&neighbor);
            if key == own_key {
                continue;
            }
            match index.get(&key) {
                Some(&i) => collapsed[i].1 += 1,
                None => {
                    index.insert(key, collapsed.len());
                    collapsed.push((neighbor, 1));
                }
            }
        }
        collapsed
    }

    fn cached_expansion(&self, ctx: &DiscoveryContext<'_>, entity: &Self::Entity) -> Result<Expansion<Self::Entity>> {
        let neighbors = self.cached_neighbors(ctx, entity)?;
        Ok(Expansion {
            neighbors: neighbors.into_iter().map(|n| (n, 1)).collect(),
            budget_spent: false,
        })
    }

    /// Neighbors of `entity`, from the cache when it is fully expanded or
    /// external calls are not allowed, from the upstream otherwise.
    ///
    /// Upstream failures yield an empty neighbor set and write nothing.
    /// Cache failures are returned.
    fn expand(&self, ctx: &DiscoveryContext<'_>, entity: &Self::Entity, allow_external: bool) -> Result<Expansion<Self::Entity>> {
        let id = self.entity_id(entity);

        if !allow_external || ctx.cache.is_fully_expanded(id)? {
            return self.cached_expansion(ctx, entity);
        }

        let op = self.operation();
        let Some((scope, budget_before)) = ctx.allocator.best_scope(op, ctx.auth) else {
            tracing::warn!("No {:?} budget left, serving {} from cache", op, self.cache_key_of(entity));
            return self.cached_expansion(ctx, entity);
        };

        let mut links = Vec::new();
        let mut cursor: Option<String> = None;
        let max_pages = ctx.config.max_pages_per_expand.max(1);

        for page_no in 0..max_pages {
            match self.call_upstream(ctx, entity, &scope, cursor.as_deref()) {
                Ok(page) => {
                    links.extend(page.links);
                    cursor = page.next_cursor;
                }
                Err(e) => {
                    tracing::warn!(
                        "Upstream expansion of {} failed on page {}: {}",
                        self.cache_key_of(entity), page_no, e
                    );
                    return Ok(Expansion {
                        neighbors: Vec::new(),
                        budget_spent: ctx.allocator.scope_budget(op, &scope) < budget_before,
                    });
                }
            }
            if cursor.is_none() || ctx.allocator.scope_budget(op, &scope) == 0 {
                break;
            }
        }

        let own = self.to_record(entity);
        let now = now_secs();
        let mut log = DeltaLog::new();
        log.upsert_entity(own.clone());
        for link in &links {
            let neighbor = self.to_record(&link.neighbor);
            if neighbor.id == own.id {
                continue;
            }
            log.upsert_edge(&own, &neighbor, link.provenance.as_ref(), now);
        }
        log.mark_expanded(own.id, now);
        ctx.cache.apply(&mut log)?;

        let budget_spent = ctx.allocator.scope_budget(op, &scope) < budget_before;
        let neighbors = self.collapse_neighbors(entity, links.into_iter().map(|l| l.neighbor).collect());

        tracing::debug!(
            "Expanded {} {} via upstream: {} neighbors (scope {:?}, spent: {})",
            self.kind(), own.key, neighbors.len(), scope, budget_spent
        );

        Ok(Expansion { neighbors, budget_spent })
    }

    /// One billed upstream call with retries of that call only
    fn call_upstream(
        &self,
        ctx: &DiscoveryContext<'_>,
        entity: &Self::Entity,
        scope: &Scope,
        cursor: Option<&str>,
    ) -> std::result::Result<FetchedPage<Self::Entity>, UpstreamError> {
        let timeout = ctx.config.external_call_timeout();
        let mut attempt = 0;

        loop {
            match self.fetch_page(entity, scope, cursor, timeout) {
                Ok(page) => {
                    bill(ctx.allocator, scope, &page.usage);
                    return Ok(page);
                }
                Err(e) => {
                    bill_failure(ctx.allocator, scope, self.operation(), &e);
                    if e.is_retryable() && attempt < ctx.config.external_retries {
                        attempt += 1;
                        tracing::debug!("Retrying {} (attempt {}): {}", self.cache_key_of(entity), attempt + 1, e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Apply reported counts, or decrement by one where none were reported
pub(crate) fn bill(allocator: &RateLimitAllocator, scope: &Scope, usage: &[ResourceUsage]) {
    for used in usage {
        match used.status {
            Some(status) => allocator.update(used.resource, scope, status),
            None => allocator.record_call(used.resource, scope),
        }
    }
}

pub(crate) fn bill_failure(allocator: &RateLimitAllocator, scope: &Scope, op: Operation, error: &UpstreamError) {
    for resource in op.resources() {
        match error {
            UpstreamError::RateLimited { until_reset } => allocator.update(
                resource,
                scope,
                RateLimitStatus { remaining: 0, until_reset: *until_reset },
            ),
            _ => allocator.record_call(resource, scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SledGraphCache;
    use crate::ratelimit::{resources, ManualClock};
    use std::sync::Arc;

    struct Fixture {
        cache: SledGraphCache,
        allocator: RateLimitAllocator,
        config: SearchConfig,
    }

    impl Fixture {
        fn new(config: SearchConfig) -> Self {
            Self {
                cache: SledGraphCache::temporary().unwrap(),
                allocator: RateLimitAllocator::new(config.rate_limits.clone(), Arc::new(ManualClock::new())),
                config,
            }
        }

        fn ctx(&self) -> DiscoveryContext<'_> {
            DiscoveryContext {
                cache: &self.cache,
                allocator: &self.allocator,
                config: &self.config,
                auth: None,
            }
        }
    }

    fn keys(expansion: &Expansion<Hashtag>) -> Vec<&str> {
        expansion.entities().map(|h| h.as_str()).collect()
    }

    #[test]
    fn test_expand_writes_back_and_marks_expanded() {
        let fx = Fixture::new(SearchConfig::default());
        let upstream = Arc::new(StaticUpstream::new().with_post(1, "#rust #wasm #rust").with_post(2, "#rust #wasm"));
        let source = HashtagSource::new(upstream.clone());
        let rust = Hashtag::new("rust");

        let expansion = source.expand(&fx.ctx(), &rust, true).unwrap();
        assert_eq!(keys(&expansion), vec!["wasm"]);
        // Both posts link rust to wasm
        assert_eq!(expansion.neighbors[0].1, 2);
        assert!(expansion.budget_spent);
        assert!(fx.cache.is_fully_expanded(source.entity_id(&rust)).unwrap());

        // Served from the cache the second time
        let again = source.expand(&fx.ctx(), &rust, true).unwrap();
        assert_eq!(keys(&again), vec!["wasm"]);
        assert!(!again.budget_spent);
        assert_eq!(upstream.calls(), 1);
    }

    #[test]
    fn test_expand_without_external_calls_uses_cache_only() {
        let fx = Fixture::new(SearchConfig::default());
        let upstream = Arc::new(StaticUpstream::new().with_post(1, "#a #b"));
        let source = HashtagSource::new(upstream.clone());

        let expansion = source.expand(&fx.ctx(), &Hashtag::new("a"), false).unwrap();
        assert!(expansion.neighbors.is_empty());
        assert_eq!(upstream.calls(), 0);
    }

    #[test]
    fn test_expand_follows_cursor_up_to_page_limit() {
        let config = SearchConfig { max_pages_per_expand: 2, ..SearchConfig::default() };
        let fx = Fixture::new(config);
        let upstream = StaticUpstream::new()
            .with_post(1, "#a #b")
            .with_post(2, "#a #c")
            .with_post(3, "#a #d")
            .with_page_size(1);
        let source = HashtagSource::new(Arc::new(upstream));

        let expansion = source.expand(&fx.ctx(), &Hashtag::new("a"), true).unwrap();
        assert_eq!(keys(&expansion), vec!["b", "c"]);
        assert_eq!(fx.allocator.remaining(resources::SEARCH_POSTS, &Scope::AppWide), 448);
    }

    #[test]
    fn test_failed_expansion_writes_nothing() {
        let config = SearchConfig { external_retries: 2, ..SearchConfig::default() };
        let fx = Fixture::new(config);
        let upstream = Arc::new(StaticUpstream::new().with_post(1, "#a #b").failing_on("a"));
        let source = HashtagSource::new(upstream.clone());

        let expansion = source.expand(&fx.ctx(), &Hashtag::new("a"), true).unwrap();
        assert!(expansion.neighbors.is_empty());
        assert!(expansion.budget_spent);
        assert_eq!(upstream.calls(), 3);
        assert!(!fx.cache.is_fully_expanded(source.entity_id(&Hashtag::new("a"))).unwrap());
        assert_eq!(fx.cache.stats().unwrap().entity_count, 0);
    }

    #[test]
    fn test_authoritative_counts_replace_decrement() {
        let fx = Fixture::new(SearchConfig::default());
        let status = RateLimitStatus { remaining: 7, until_reset: Duration::from_secs(100) };
        let upstream = Arc::new(StaticUpstream::new().with_post(1, "#a #b").reporting(status));
        let source = HashtagSource::new(upstream);

        source.expand(&fx.ctx(), &Hashtag::new("a"), true).unwrap();
        assert_eq!(fx.allocator.remaining(resources::SEARCH_POSTS, &Scope::AppWide), 7);
    }
}
