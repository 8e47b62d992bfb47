//! Budget allocator shared by all searches of a process

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{AuthContext, Clock, Operation, RateLimitPool, RateLimitStatus, Scope};
use crate::config::RateLimitConfig;

type PoolKey = (String, Scope);

/// Point-in-time view of a pool, for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub resource: String,
    pub scope: Scope,
    pub remaining: u32,
    pub ceiling: u32,
    pub reset_in_secs: u64,
}

/// Tracks remaining upstream allowance per resource and scope.
///
/// Pools are created lazily on first use and each sits behind its own
/// mutex, so concurrent searches only contend on the pool they touch.
pub struct RateLimitAllocator {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    pools: RwLock<HashMap<PoolKey, Arc<Mutex<RateLimitPool>>>>,
}

impl RateLimitAllocator {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> std::time::Duration {
        self.clock.now()
    }

    fn pool(&self, resource: &str, scope: &Scope) -> Arc<Mutex<RateLimitPool>> {
        let key = (resource.to_string(), scope.clone());
        if let Some(pool) = self.pools.read().get(&key) {
            return Arc::clone(pool);
        }

        let mut pools = self.pools.write();
        let pool = pools.entry(key).or_insert_with(|| {
            let limit = self.config.limit_for(resource);
            let ceiling = match scope {
                Scope::AppWide => limit.app_limit,
                Scope::PerUser(_) => limit.user_limit,
            };
            tracing::debug!("New rate-limit pool {} {:?}: ceiling {}", resource, scope, ceiling);
            Arc::new(Mutex::new(RateLimitPool::new(
                resource,
                scope.clone(),
                ceiling,
                limit.window(),
                self.clock.now(),
            )))
        });
        Arc::clone(pool)
    }

    /// Scopes usable with the given credentials, per-user first
    pub fn scopes(auth: Option<&AuthContext>) -> Vec<Scope> {
        match auth {
            Some(auth) => vec![auth.scope(), Scope::AppWide],
            None => vec![Scope::AppWide],
        }
    }

    pub fn remaining(&self, resource: &str, scope: &Scope) -> u32 {
        let now = self.clock.now();
        self.pool(resource, scope).lock().remaining(now)
    }

    pub fn is_available(&self, resource: &str, scope: &Scope) -> bool {
        let now = self.clock.now();
        self.pool(resource, scope).lock().available(now)
    }

    /// Usable budget of `op` within one scope: the lowest remaining count
    /// among the resources it touches.
    pub fn scope_budget(&self, op: Operation, scope: &Scope) -> u32 {
        op.resources()
            .iter()
            .map(|resource| self.remaining(resource, scope))
            .min()
            .unwrap_or(0)
    }

    /// Usable budget of `op`: the best scope's per-scope minimum
    pub fn minimum_budget(&self, op: Operation, auth: Option<&AuthContext>) -> u32 {
        Self::scopes(auth)
            .iter()
            .map(|scope| self.scope_budget(op, scope))
            .max()
            .unwrap_or(0)
    }

    /// Scope with the largest usable budget for `op`, if any is left
    pub fn best_scope(&self, op: Operation, auth: Option<&AuthContext>) -> Option<(Scope, u32)> {
        let mut best: Option<(Scope, u32)> = None;
        for scope in Self::scopes(auth) {
            let budget = self.scope_budget(op, &scope);
            if budget > 0 && best.as_ref().map_or(true, |(_, b)| budget > *b) {
                best = Some((scope, budget));
            }
        }
        best
    }

    /// Authoritative counts from the upstream
    pub fn update(&self, resource: &str, scope: &Scope, status: RateLimitStatus) {
        let now = self.clock.now();
        self.pool(resource, scope).lock().update(status, now);
        tracing::debug!(
            "Rate limit {} {:?}: {} remaining, reset in {:?}",
            resource, scope, status.remaining, status.until_reset
        );
    }

    /// Bill one call without authoritative counts
    pub fn record_call(&self, resource: &str, scope: &Scope) {
        let now = self.clock.now();
        self.pool(resource, scope).lock().consume(now);
    }

    pub fn snapshot(&self) -> Vec<PoolStatus> {
        let now = self.clock.now();
        let pools: Vec<_> = self.pools.read().values().cloned().collect();

        let mut result: Vec<PoolStatus> = pools
            .iter()
            .map(|pool| {
                let mut pool = pool.lock();
                let remaining = pool.remaining(now);
                let reset_at = pool.last_updated + pool.window;
                PoolStatus {
                    resource: pool.resource.clone(),
                    scope: pool.scope.clone(),
                    remaining,
                    ceiling: pool.ceiling,
                    reset_in_secs: reset_at.saturating_sub(now).as_secs(),
                }
            })
            .collect();
        result.sort_by(|a, b| (&a.resource, &a.scope).cmp(&(&b.resource, &b.scope)));
        result
    }
}
