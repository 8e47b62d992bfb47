//! Degrees - shortest-connection discovery over a lazily discovered social graph
//!
//! # Architecture
//!
//! - **Persistent graph cache**: sled trees of entities, undirected edges,
//!   expansion marks and search history
//! - **Deterministic IDs**: BLAKE3(kind|key)
//! - **Rate-limit allocator**: per-resource, per-scope budget pools
//! - **Neighbor discovery**: cache first, then the rate-limited upstream,
//!   with every discovery written back
//! - **Bidirectional search**: alternating frontiers, stopped by the cache,
//!   the call budget or exhaustion
//!
//! # Usage example
//!
//! ```no_run
//! use std::sync::Arc;
//! use degrees::{Hashtag, SearchConfig, SearchEngine, SearchRequest, StaticUpstream};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream = StaticUpstream::new()
//!     .with_post(1, "#rust meets #wasm")
//!     .with_post(2, "#wasm in the #browser");
//! let engine = SearchEngine::open("./social.degrees", SearchConfig::default(), Arc::new(upstream))?;
//!
//! let request = SearchRequest::new(Hashtag::new("rust"), Hashtag::new("browser"), 3, 10);
//! let result = engine.find_hashtag_path(&request, None)?;
//! println!("{} paths, {} calls", result.paths.len(), result.metadata.calls_made);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ratelimit;
pub mod search;
pub mod storage;
pub mod worker;

pub use config::{RateLimitConfig, ResourceLimit, SearchConfig};
pub use discovery::{Hashtag, HashtagApi, NeighborSource, Post, StaticUpstream, User, UserApi};
pub use engine::{SearchEngine, SeedEdge};
pub use error::{Result, SearchError, UpstreamError};
pub use graph::{compute_entity_id, GraphCache, SledGraphCache};
pub use ratelimit::{AuthContext, RateLimitAllocator, Scope};
pub use search::{find_path, Outcome, Path, SearchRequest, SearchResult};
pub use storage::{EntityKind, EntityRecord};
pub use worker::SearchService;
