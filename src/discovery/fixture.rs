//! In-memory upstream serving a fixed social graph.
//!
//! Used by the tests and by `degrees-server --upstream fixture.json`:
//!
//! ```json
//! {
//!   "posts":   [{ "id": 1, "text": "#rust meets #wasm" }],
//!   "follows": [[1, 2]],
//!   "users":   [{ "id": 1, "screen_name": "alice" }]
//! }
//! ```
//!
//! `follows` pairs are `[follower, followee]`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Hashtag, HashtagApi, Page, Post, User, UserApi};
use crate::error::{Result, UpstreamError};
use crate::ratelimit::{RateLimitStatus, Scope};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StaticUpstream {
    #[serde(default)]
    posts: Vec<Post>,
    #[serde(default)]
    follows: Vec<(u64, u64)>,
    #[serde(default)]
    users: Vec<User>,
    /// Posts per search page; everything on one page when unset
    #[serde(default)]
    page_size: Option<usize>,

    #[serde(skip)]
    failing: HashSet<String>,
    #[serde(skip)]
    delay: Duration,
    #[serde(skip)]
    reported: Option<RateLimitStatus>,
    #[serde(skip)]
    calls: AtomicU64,
}

impl StaticUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let upstream: StaticUpstream = serde_json::from_str(&content)?;
        tracing::info!(
            "Loaded upstream fixture {:?}: {} posts, {} follows, {} users",
            path.as_ref(), upstream.posts.len(), upstream.follows.len(), upstream.users.len()
        );
        Ok(upstream)
    }

    pub fn with_post(mut self, id: u64, text: &str) -> Self {
        self.posts.push(Post::new(id, text));
        self
    }

    pub fn with_follow(mut self, follower: u64, followee: u64) -> Self {
        self.follows.push((follower, followee));
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Every call about `key` (hashtag text or user id) fails transiently
    pub fn failing_on(mut self, key: impl Into<String>) -> Self {
        self.failing.insert(key.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Attach these counts to every page
    pub fn reporting(mut self, status: RateLimitStatus) -> Self {
        self.reported = Some(status);
        self
    }

    /// Upstream calls served so far, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self, key: &str) -> std::result::Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.failing.contains(key) {
            return Err(UpstreamError::Transient(format!("fixture failure for {}", key)));
        }
        Ok(())
    }

    fn page<T>(&self, items: Vec<T>, next_cursor: Option<String>) -> Page<T> {
        Page {
            items,
            next_cursor,
            rate_limit: self.reported,
        }
    }
}

impl HashtagApi for StaticUpstream {
    fn search_posts(&self, tag: &Hashtag, _scope: &Scope, cursor: Option<&str>) -> std::result::Result<Page<Post>, UpstreamError> {
        self.begin_call(tag.as_str())?;

        let matching: Vec<Post> = self.posts.iter().filter(|p| p.mentions(tag)).cloned().collect();
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| UpstreamError::Transient(format!("bad cursor {:?}", c)))?,
            None => 0,
        };
        let page_size = self.page_size.unwrap_or(usize::MAX);
        let end = offset.saturating_add(page_size).min(matching.len());
        let items = matching.get(offset..end).map(<[Post]>::to_vec).unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());

        Ok(self.page(items, next_cursor))
    }
}

impl UserApi for StaticUpstream {
    fn friend_ids(&self, user_id: u64, _scope: &Scope, _cursor: Option<&str>) -> std::result::Result<Page<u64>, UpstreamError> {
        self.begin_call(&user_id.to_string())?;
        let ids = self.follows.iter().filter(|(from, _)| *from == user_id).map(|(_, to)| *to).collect();
        Ok(self.page(ids, None))
    }

    fn follower_ids(&self, user_id: u64, _scope: &Scope, _cursor: Option<&str>) -> std::result::Result<Page<u64>, UpstreamError> {
        self.begin_call(&user_id.to_string())?;
        let ids = self.follows.iter().filter(|(_, to)| *to == user_id).map(|(from, _)| *from).collect();
        Ok(self.page(ids, None))
    }

    fn lookup(&self, ids: &[u64], _scope: &Scope) -> std::result::Result<Page<User>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ids.iter().any(|id| self.failing.contains(&id.to_string())) {
            return Err(UpstreamError::Transient("fixture lookup failure".into()));
        }
        let users = self
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .map(|u| User { provisional: false, ..u.clone() })
            .collect();
        Ok(self.page(users, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_search_posts_pages_with_cursor() {
        let upstream = StaticUpstream::new()
            .with_post(1, "#a #b")
            .with_post(2, "#a #c")
            .with_post(3, "#a #d")
            .with_page_size(2);
        let tag = Hashtag::new("a");

        let first = upstream.search_posts(&tag, &Scope::AppWide, None).unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let second = upstream.search_posts(&tag, &Scope::AppWide, first.next_cursor.as_deref()).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.next_cursor, None);
        assert_eq!(upstream.calls(), 2);
    }

    #[test]
    fn test_friends_and_followers() {
        let upstream = StaticUpstream::new().with_follow(1, 2).with_follow(3, 1);
        assert_eq!(upstream.friend_ids(1, &Scope::AppWide, None).unwrap().items, vec![2]);
        assert_eq!(upstream.follower_ids(1, &Scope::AppWide, None).unwrap().items, vec![3]);
    }

    #[test]
    fn test_failing_key_is_transient() {
        let upstream = StaticUpstream::new().failing_on("rust");
        let result = upstream.search_posts(&Hashtag::new("rust"), &Scope::AppWide, None);
        assert!(matches!(result, Err(UpstreamError::Transient(_))));
        assert_eq!(upstream.calls(), 1);
    }

    #[test]
    fn test_load_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r##"{{"posts": [{{"id": 1, "text": "#x #y"}}], "follows": [[1, 2]], "users": [{{"id": 2, "screen_name": "bob"}}]}}"##
        )
        .unwrap();

        let upstream = StaticUpstream::load(file.path()).unwrap();
        let page = upstream.lookup(&[2, 9], &Scope::AppWide).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].screen_name, "bob");
        assert_eq!(upstream.friend_ids(1, &Scope::AppWide, None).unwrap().items, vec![2]);
    }
}
