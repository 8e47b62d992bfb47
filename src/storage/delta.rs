//! Delta log for batched cache writes

use super::{EdgeRecord, EntityRecord};
use serde::{Deserialize, Serialize};

/// Operation in delta log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheDelta {
    UpsertEntity(EntityRecord),
    UpsertEdge(EdgeRecord),
    MarkExpanded { id: u128, at: u64 },
}

/// Writes collected during one expansion, committed together
#[derive(Debug, Default)]
pub struct DeltaLog {
    operations: Vec<CacheDelta>,
}

impl DeltaLog {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    pub fn push(&mut self, delta: CacheDelta) {
        self.operations.push(delta);
    }

    pub fn upsert_entity(&mut self, record: EntityRecord) {
        self.push(CacheDelta::UpsertEntity(record));
    }

    /// Link `a` and `b`, through the evidence record when one is given.
    /// Both endpoints are upserted too, so every cached edge resolves to
    /// stored entities.
    pub fn upsert_edge(
        &mut self,
        a: &EntityRecord,
        b: &EntityRecord,
        provenance: Option<&EntityRecord>,
        now: u64,
    ) {
        self.push(CacheDelta::UpsertEntity(a.clone()));
        self.push(CacheDelta::UpsertEntity(b.clone()));
        match provenance {
            Some(evidence) => {
                self.push(CacheDelta::UpsertEntity(evidence.clone()));
                self.push(CacheDelta::UpsertEdge(EdgeRecord::between(a, evidence, now)));
                self.push(CacheDelta::UpsertEdge(EdgeRecord::between(evidence, b, now)));
            }
            None => {
                self.push(CacheDelta::UpsertEdge(EdgeRecord::between(a, b, now)));
            }
        }
    }

    pub fn mark_expanded(&mut self, id: u128, now: u64) {
        self.push(CacheDelta::MarkExpanded { id, at: now });
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheDelta> {
        self.operations.iter()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    pub fn drain(&mut self) -> impl Iterator<Item = CacheDelta> + '_ {
        self.operations.drain(..)
    }
}
