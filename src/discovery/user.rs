//! User entities: neighbors are friends and followers

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::timeout::call_with_timeout;
use super::{bill, bill_failure, DiscoveryContext, FetchedPage, Link, NeighborSource, Page, ResourceUsage};
use crate::error::{Result, UpstreamError};
use crate::ratelimit::{resources, Operation, Scope};
use crate::search::Path;
use crate::storage::{DeltaLog, EntityKind, EntityRecord};

/// Users per lookup call
pub const LOOKUP_BATCH_SIZE: usize = 100;

/// A social-graph account. Equality and hashing use `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub screen_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub followers_count: u64,
    /// Known by ID only
    #[serde(default)]
    pub provisional: bool,
}

impl User {
    pub fn new(id: u64, screen_name: impl Into<String>) -> Self {
        Self {
            id,
            screen_name: screen_name.into(),
            name: String::new(),
            followers_count: 0,
            provisional: false,
        }
    }

    pub fn provisional(id: u64) -> Self {
        Self {
            id,
            screen_name: String::new(),
            name: String::new(),
            followers_count: 0,
            provisional: true,
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Serialize, Deserialize)]
struct UserAttributes {
    screen_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    followers_count: u64,
}

/// Upstream social graph
pub trait UserApi: Send + Sync {
    /// Accounts `user_id` follows
    fn friend_ids(&self, user_id: u64, scope: &Scope, cursor: Option<&str>) -> std::result::Result<Page<u64>, UpstreamError>;

    /// Accounts following `user_id`
    fn follower_ids(&self, user_id: u64, scope: &Scope, cursor: Option<&str>) -> std::result::Result<Page<u64>, UpstreamError>;

    /// Full records for up to [`LOOKUP_BATCH_SIZE`] IDs; unknown IDs are left out
    fn lookup(&self, ids: &[u64], scope: &Scope) -> std::result::Result<Page<User>, UpstreamError>;
}

pub struct UserSource {
    api: Arc<dyn UserApi>,
}

impl UserSource {
    pub fn new(api: Arc<dyn UserApi>) -> Self {
        Self { api }
    }

    /// One billed lookup call; `None` when it failed or no budget is left.
    fn lookup_batch(&self, ctx: &DiscoveryContext<'_>, ids: &[u64]) -> Option<Vec<User>> {
        let op = Operation::ResolveUsers;
        let Some((scope, _)) = ctx.allocator.best_scope(op, ctx.auth) else {
            tracing::warn!("No {:?} budget left, {} users stay provisional", op, ids.len());
            return None;
        };

        let api = Arc::clone(&self.api);
        let batch = ids.to_vec();
        let call_scope = scope.clone();
        let result = call_with_timeout(ctx.config.external_call_timeout(), move || {
            api.lookup(&batch, &call_scope)
        });

        match result {
            Ok(page) => {
                bill(
                    ctx.allocator,
                    &scope,
                    &[ResourceUsage { resource: resources::USERS_LOOKUP, status: page.rate_limit }],
                );
                Some(page.items)
            }
            Err(e) => {
                bill_failure(ctx.allocator, &scope, op, &e);
                tracing::warn!("User lookup of {} ids failed: {}", ids.len(), e);
                None
            }
        }
    }
}

impl NeighborSource for UserSource {
    type Entity = User;

    fn kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn operation(&self) -> Operation {
        Operation::ExpandUser
    }

    fn cache_key_of(&self, entity: &User) -> String {
        entity.id.to_string()
    }

    fn to_record(&self, entity: &User) -> EntityRecord {
        if entity.provisional {
            return EntityRecord::provisional(EntityKind::User, entity.id.to_string());
        }
        let record = EntityRecord::new(EntityKind::User, entity.id.to_string());
        let attributes = UserAttributes {
            screen_name: entity.screen_name.clone(),
            name: entity.name.clone(),
            followers_count: entity.followers_count,
        };
        match serde_json::to_string(&attributes) {
            Ok(json) => record.with_metadata(json),
            Err(_) => record,
        }
    }

    fn from_record(&self, record: &EntityRecord) -> Option<User> {
        if record.kind != EntityKind::User {
            return None;
        }
        let id = record.key.parse::<u64>().ok()?;
        let attributes = record
            .metadata
            .as_deref()
            .and_then(|json| serde_json::from_str::<UserAttributes>(json).ok());

        match attributes {
            Some(attrs) if !record.provisional => Some(User {
                id,
                screen_name: attrs.screen_name,
                name: attrs.name,
                followers_count: attrs.followers_count,
                provisional: false,
            }),
            _ => Some(User::provisional(id)),
        }
    }

    /// First page of friends and of followers. Both lists are fetched in one
    /// bounded call; the cursor is not used.
    fn fetch_page(
        &self,
        entity: &User,
        scope: &Scope,
        _cursor: Option<&str>,
        timeout: Duration,
    ) -> std::result::Result<FetchedPage<User>, UpstreamError> {
        let api = Arc::clone(&self.api);
        let user_id = entity.id;
        let scope = scope.clone();
        let (friends, followers) = call_with_timeout(timeout, move || {
            let friends = api.friend_ids(user_id, &scope, None)?;
            let followers = api.follower_ids(user_id, &scope, None)?;
            Ok((friends, followers))
        })?;

        let usage = vec![
            ResourceUsage { resource: resources::FRIENDS, status: friends.rate_limit },
            ResourceUsage { resource: resources::FOLLOWERS, status: followers.rate_limit },
        ];
        let links = friends
            .items
            .into_iter()
            .chain(followers.items)
            .map(|id| Link { neighbor: User::provisional(id), provenance: None })
            .collect();

        Ok(FetchedPage { links, next_cursor: None, usage })
    }

    fn ensure_link_provenance(&self, ctx: &DiscoveryContext<'_>, paths: &mut [Path<User>]) -> Result<u32> {
        let mut resolved: HashMap<u64, User> = HashMap::new();
        let mut pending: Vec<u64> = Vec::new();

        for user in paths.iter().flat_map(|p| p.entities.iter()) {
            if !user.provisional || resolved.contains_key(&user.id) || pending.contains(&user.id) {
                continue;
            }
            let cached = ctx.cache.get(self.entity_id(user))?.and_then(|r| self.from_record(&r));
            match cached {
                Some(found) if !found.provisional => {
                    resolved.insert(found.id, found);
                }
                _ => pending.push(user.id),
            }
        }

        let mut calls = 0;
        for batch in pending.chunks(LOOKUP_BATCH_SIZE) {
            let Some(users) = self.lookup_batch(ctx, batch) else {
                continue;
            };
            calls += 1;

            let mut log = DeltaLog::new();
            for user in users {
                if !batch.contains(&user.id) {
                    continue;
                }
                let user = User { provisional: false, ..user };
                log.upsert_entity(self.to_record(&user));
                resolved.insert(user.id, user);
            }
            ctx.cache.apply(&mut log)?;
        }

        for entity in paths.iter_mut().flat_map(|p| p.entities.iter_mut()) {
            if let Some(user) = resolved.get(&entity.id) {
                *entity = user.clone();
            }
        }

        if calls > 0 {
            tracing::debug!("Resolved {} of {} provisional users in {} calls", resolved.len(), pending.len(), calls);
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> UserSource {
        UserSource::new(Arc::new(crate::discovery::StaticUpstream::new()))
    }

    #[test]
    fn test_user_equality_by_id() {
        let mut full = User::new(7, "seven");
        full.followers_count = 3;
        assert_eq!(full, User::provisional(7));
        assert_ne!(full, User::provisional(8));
    }

    #[test]
    fn test_record_round_trip_keeps_attributes() {
        let source = source();
        let mut user = User::new(42, "answer");
        user.name = "Deep Thought".into();

        let record = source.to_record(&user);
        assert!(!record.provisional);
        let back = source.from_record(&record).unwrap();
        assert_eq!(back.screen_name, "answer");
        assert_eq!(back.name, "Deep Thought");
        assert!(!back.provisional);
    }

    #[test]
    fn test_provisional_record_has_no_attributes() {
        let source = source();
        let record = source.to_record(&User::provisional(5));
        assert!(record.provisional);
        assert!(record.metadata.is_none());
        assert!(source.from_record(&record).unwrap().provisional);
    }

    #[test]
    fn test_from_record_rejects_other_kinds() {
        let record = EntityRecord::new(EntityKind::Hashtag, "rust");
        assert!(source().from_record(&record).is_none());
    }
}
