//! Rate-limit pools and the budget allocator
//!
//! Every upstream resource has one pool per authentication scope: the
//! app-wide pool, plus one pool per authenticated user seen so far. A pool
//! is refilled to its nominal ceiling when its window elapses, and is
//! overwritten whenever the upstream reports authoritative counts.

pub mod allocator;
pub mod clock;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use allocator::{PoolStatus, RateLimitAllocator};
pub use clock::{Clock, ManualClock, SystemClock};

/// Upstream resource names
pub mod resources {
    pub const SEARCH_POSTS: &str = "search/tweets";
    pub const FRIENDS: &str = "friends/ids";
    pub const FOLLOWERS: &str = "followers/ids";
    pub const USERS_LOOKUP: &str = "users/lookup";
}

/// Authentication scope a call is billed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    AppWide,
    PerUser(String),
}

/// Per-user credentials handle; enables the per-user pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into() }
    }

    pub fn scope(&self) -> Scope {
        Scope::PerUser(self.user_id.clone())
    }
}

/// Logical operation, possibly spanning several resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    ExpandHashtag,
    ExpandUser,
    ResolveUsers,
}

impl Operation {
    pub fn resources(&self) -> &'static [&'static str] {
        match self {
            Operation::ExpandHashtag => &[resources::SEARCH_POSTS],
            Operation::ExpandUser => &[resources::FRIENDS, resources::FOLLOWERS],
            Operation::ResolveUsers => &[resources::USERS_LOOKUP],
        }
    }
}

/// Authoritative counts reported by the upstream (e.g. response headers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub until_reset: Duration,
}

/// Remaining allowance of one resource within one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPool {
    pub resource: String,
    pub scope: Scope,
    pub limit: u32,
    /// Nominal value `limit` is reset to
    pub ceiling: u32,
    /// Clock reading of the last reset or authoritative update
    pub last_updated: Duration,
    /// Time from `last_updated` until the next reset
    pub window: Duration,
    reset_interval: Duration,
}

impl RateLimitPool {
    pub fn new(resource: impl Into<String>, scope: Scope, ceiling: u32, reset_interval: Duration, now: Duration) -> Self {
        Self {
            resource: resource.into(),
            scope,
            limit: ceiling,
            ceiling,
            last_updated: now,
            window: reset_interval,
            reset_interval,
        }
    }

    fn window_elapsed(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_updated) > self.window
    }

    /// Refill when the window has elapsed.
    ///
    /// The next window is shortened by however long the reset check was
    /// overdue, modulo the reset interval, so late checks keep the pool on
    /// the upstream's reset grid instead of pushing it back.
    pub fn reset_if_needed(&mut self, now: Duration) -> bool {
        if !self.window_elapsed(now) {
            return false;
        }

        let overdue = now.saturating_sub(self.last_updated) - self.window;
        let interval = self.reset_interval.as_millis();
        self.window = if interval == 0 {
            self.reset_interval
        } else {
            let remainder = overdue.as_millis() % interval;
            Duration::from_millis((interval - remainder) as u64)
        };
        self.limit = self.ceiling;
        self.last_updated = now;
        true
    }

    /// Usable now: window elapsed (a reset is due) or allowance left
    pub fn available(&self, now: Duration) -> bool {
        self.window_elapsed(now) || self.limit > 0
    }

    pub fn remaining(&mut self, now: Duration) -> u32 {
        self.reset_if_needed(now);
        self.limit
    }

    pub fn update(&mut self, status: RateLimitStatus, now: Duration) {
        self.limit = status.remaining;
        self.window = status.until_reset;
        self.last_updated = now;
    }

    /// Pessimistic decrement when no authoritative count is known
    pub fn consume(&mut self, now: Duration) {
        self.reset_if_needed(now);
        self.limit = self.limit.saturating_sub(1);
    }
}
