//! Search engine: one cache, one allocator, both entity sources

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::discovery::{DiscoveryContext, Hashtag, HashtagApi, HashtagSource, User, UserApi, UserSource};
use crate::error::{Result, SearchError};
use crate::graph::{GraphCache, SledGraphCache};
use crate::ratelimit::{AuthContext, Clock, PoolStatus, RateLimitAllocator, RateLimitStatus, Scope, SystemClock};
use crate::search::{find_path, SearchRequest, SearchResult};
use crate::storage::{DeltaLog, EntityKind, EntityRecord};

/// An edge to pre-load into the cache. Hashtag edges need the key of the
/// post that links them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedEdge {
    pub a: String,
    pub b: String,
    #[serde(default)]
    pub evidence: Option<String>,
}

pub struct SearchEngine {
    cache: Arc<dyn GraphCache>,
    allocator: Arc<RateLimitAllocator>,
    config: SearchConfig,
    hashtags: HashtagSource,
    users: UserSource,
}

impl SearchEngine {
    pub fn new(
        cache: Arc<dyn GraphCache>,
        allocator: Arc<RateLimitAllocator>,
        config: SearchConfig,
        hashtag_api: Arc<dyn HashtagApi>,
        user_api: Arc<dyn UserApi>,
    ) -> Self {
        Self {
            cache,
            allocator,
            config,
            hashtags: HashtagSource::new(hashtag_api),
            users: UserSource::new(user_api),
        }
    }

    /// Open the sled cache at `path` and serve both entity kinds from `upstream`
    pub fn open<P, U>(path: P, config: SearchConfig, upstream: Arc<U>) -> Result<Self>
    where
        P: AsRef<Path>,
        U: HashtagApi + UserApi + 'static,
    {
        Self::open_with_clock(path, config, upstream, Arc::new(SystemClock::new()))
    }

    pub fn open_with_clock<P, U>(path: P, config: SearchConfig, upstream: Arc<U>, clock: Arc<dyn Clock>) -> Result<Self>
    where
        P: AsRef<Path>,
        U: HashtagApi + UserApi + 'static,
    {
        let cache = SledGraphCache::open(path)?.with_max_paths(config.max_cached_paths);
        let allocator = RateLimitAllocator::new(config.rate_limits.clone(), clock);
        let hashtag_api: Arc<dyn HashtagApi> = upstream.clone();
        let user_api: Arc<dyn UserApi> = upstream;
        Ok(Self::new(Arc::new(cache), Arc::new(allocator), config, hashtag_api, user_api))
    }

    fn context<'a>(&'a self, auth: Option<&'a AuthContext>) -> DiscoveryContext<'a> {
        DiscoveryContext {
            cache: self.cache.as_ref(),
            allocator: &self.allocator,
            config: &self.config,
            auth,
        }
    }

    pub fn find_hashtag_path(
        &self,
        request: &SearchRequest<Hashtag>,
        auth: Option<&AuthContext>,
    ) -> Result<SearchResult<Hashtag>> {
        find_path(&self.hashtags, &self.context(auth), request)
    }

    pub fn find_user_path(&self, request: &SearchRequest<User>, auth: Option<&AuthContext>) -> Result<SearchResult<User>> {
        find_path(&self.users, &self.context(auth), request)
    }

    /// Write edges straight into the cache. Returns the number written.
    pub fn seed_edges(&self, kind: EntityKind, edges: &[SeedEdge]) -> Result<usize> {
        let mut log = DeltaLog::new();
        let now = crate::graph::now_secs();

        for edge in edges {
            let (a, b, evidence) = match kind {
                EntityKind::Hashtag => {
                    let evidence = edge.evidence.as_deref().ok_or_else(|| {
                        SearchError::validation(format!("hashtag edge {}-{} needs evidence", edge.a, edge.b))
                    })?;
                    (
                        EntityRecord::new(kind, Hashtag::new(&edge.a).as_str()),
                        EntityRecord::new(kind, Hashtag::new(&edge.b).as_str()),
                        Some(EntityRecord::new(EntityKind::Post, evidence)),
                    )
                }
                EntityKind::User => {
                    let parse = |key: &str| {
                        key.parse::<u64>()
                            .map_err(|_| SearchError::validation(format!("user id {:?} is not numeric", key)))
                    };
                    (
                        EntityRecord::provisional(kind, parse(&edge.a)?.to_string()),
                        EntityRecord::provisional(kind, parse(&edge.b)?.to_string()),
                        None,
                    )
                }
                EntityKind::Post => return Err(SearchError::validation("posts cannot be seeded as endpoints")),
            };
            if a.id == b.id {
                continue;
            }
            log.upsert_edge(&a, &b, evidence.as_ref(), now);
        }

        let written = edges.len();
        self.cache.apply(&mut log)?;
        tracing::info!("Seeded {} {} edges", written, kind);
        Ok(written)
    }

    /// Authoritative counts reported out of band
    pub fn update_rate_limit(&self, resource: &str, scope: &Scope, status: RateLimitStatus) {
        self.allocator.update(resource, scope, status);
    }

    pub fn rate_limit_status(&self) -> Vec<PoolStatus> {
        self.allocator.snapshot()
    }

    pub fn cache(&self) -> &Arc<dyn GraphCache> {
        &self.cache
    }

    pub fn allocator(&self) -> &Arc<RateLimitAllocator> {
        &self.allocator
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}
