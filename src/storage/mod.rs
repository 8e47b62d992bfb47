//! Persisted record types for the graph cache

pub mod delta;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::compute_entity_id;

pub use delta::{CacheDelta, DeltaLog};

/// Kind of a cached vertex.
///
/// `Post` is the evidence kind: it is never a search endpoint, it only sits
/// between two hashtags that were seen together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Hashtag,
    User,
    Post,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Hashtag => "hashtag",
            EntityKind::User => "user",
            EntityKind::Post => "post",
        }
    }

    /// Persisted hops per logical hop between two entities of this kind.
    pub fn hop_factor(&self) -> usize {
        match self {
            EntityKind::Hashtag => 2,
            EntityKind::User | EntityKind::Post => 1,
        }
    }

    pub fn is_evidence(&self) -> bool {
        matches!(self, EntityKind::Post)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity record as stored in the `entities` tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Deterministic ID (BLAKE3 of kind|key)
    pub id: u128,

    pub kind: EntityKind,

    /// Cache key: normalized hashtag text, decimal user id, or post id
    pub key: String,

    /// Known only by key, attributes not fetched yet
    pub provisional: bool,

    /// JSON attributes (screen name, post text, ...)
    pub metadata: Option<String>,
}

impl EntityRecord {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: compute_entity_id(kind, &key),
            kind,
            key,
            provisional: false,
            metadata: None,
        }
    }

    pub fn provisional(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            provisional: true,
            ..Self::new(kind, key)
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Merge an incoming write into the stored record.
    ///
    /// Attributes are last-writer-wins, except that a provisional write never
    /// replaces a resolved record.
    pub fn merged_with(self, incoming: EntityRecord) -> EntityRecord {
        if incoming.provisional && !self.provisional {
            return self;
        }
        EntityRecord {
            metadata: incoming.metadata.or(self.metadata),
            ..incoming
        }
    }
}

/// One direction of an undirected cached edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub src: u128,
    pub dst: u128,
    pub src_kind: EntityKind,
    pub dst_kind: EntityKind,

    /// Unix seconds of the first write; re-upserting keeps the original
    pub first_seen: u64,
}

impl EdgeRecord {
    pub fn between(a: &EntityRecord, b: &EntityRecord, first_seen: u64) -> Self {
        Self {
            src: a.id,
            dst: b.id,
            src_kind: a.kind,
            dst_kind: b.kind,
            first_seen,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            src_kind: self.dst_kind,
            dst_kind: self.src_kind,
            first_seen: self.first_seen,
        }
    }
}

/// Summary of one finished search, kept in the `history` tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub kind: EntityKind,
    pub start: String,
    pub end: String,
    pub found: bool,
    pub calls_made: u32,
    pub elapsed_ms: u64,
    pub finished_at: u64,
}

/// Entity and edge counts of a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entity_count: usize,
    /// Undirected edges
    pub edge_count: usize,
    pub expanded_count: usize,
}
