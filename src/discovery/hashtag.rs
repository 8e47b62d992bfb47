//! Hashtag entities: neighbors are hashtags co-occurring in a post

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::timeout::call_with_timeout;
use super::{FetchedPage, Link, NeighborSource, Page, ResourceUsage};
use crate::error::UpstreamError;
use crate::ratelimit::{resources, Operation, Scope};
use crate::storage::{EntityKind, EntityRecord};

/// Normalized hashtag: lowercase, without the leading `#`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hashtag(String);

impl Hashtag {
    pub fn new(tag: &str) -> Self {
        Hashtag(tag.trim().trim_start_matches('#').to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Hashtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A post returned by the upstream search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Parsed by the upstream; extracted from `text` when empty
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl Post {
    pub fn new(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            author: None,
            hashtags: Vec::new(),
        }
    }

    pub fn tags(&self) -> Vec<Hashtag> {
        if self.hashtags.is_empty() {
            extract_hashtags(&self.text)
        } else {
            self.hashtags.iter().map(|t| Hashtag::new(t)).filter(|t| !t.is_empty()).collect()
        }
    }

    pub fn mentions(&self, tag: &Hashtag) -> bool {
        self.tags().contains(tag)
    }

    /// Evidence record stored between the hashtags this post links
    pub fn to_record(&self) -> EntityRecord {
        let record = EntityRecord::new(EntityKind::Post, self.id.to_string());
        match serde_json::to_string(&PostAttributes { text: &self.text, author: self.author.as_deref() }) {
            Ok(json) => record.with_metadata(json),
            Err(_) => record,
        }
    }
}

#[derive(Serialize)]
struct PostAttributes<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
}

/// A tag runs until ASCII whitespace or ASCII punctuation other than `_`.
/// Non-ASCII letters are part of the tag; non-ASCII punctuation and
/// whitespace (`、`, U+3000) do not end one.
fn hashtag_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([^\s!-/:-@\[-^`{-~]+)").ok()).as_ref()
}

/// Hashtags in post text, in order of first appearance
pub fn extract_hashtags(text: &str) -> Vec<Hashtag> {
    let Some(re) = hashtag_regex() else {
        return Vec::new();
    };

    let mut tags: Vec<Hashtag> = Vec::new();
    for caps in re.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let tag = Hashtag::new(m.as_str());
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// Upstream post search
pub trait HashtagApi: Send + Sync {
    fn search_posts(&self, tag: &Hashtag, scope: &Scope, cursor: Option<&str>) -> Result<Page<Post>, UpstreamError>;
}

pub struct HashtagSource {
    api: Arc<dyn HashtagApi>,
}

impl HashtagSource {
    pub fn new(api: Arc<dyn HashtagApi>) -> Self {
        Self { api }
    }
}

impl NeighborSource for HashtagSource {
    type Entity = Hashtag;

    fn kind(&self) -> EntityKind {
        EntityKind::Hashtag
    }

    fn operation(&self) -> Operation {
        Operation::ExpandHashtag
    }

    fn cache_key_of(&self, entity: &Hashtag) -> String {
        entity.as_str().to_string()
    }

    fn to_record(&self, entity: &Hashtag) -> EntityRecord {
        EntityRecord::new(EntityKind::Hashtag, entity.as_str())
    }

    fn from_record(&self, record: &EntityRecord) -> Option<Hashtag> {
        (record.kind == EntityKind::Hashtag).then(|| Hashtag::new(&record.key))
    }

    fn fetch_page(
        &self,
        entity: &Hashtag,
        scope: &Scope,
        cursor: Option<&str>,
        timeout: Duration,
    ) -> Result<FetchedPage<Hashtag>, UpstreamError> {
        let api = Arc::clone(&self.api);
        let tag = entity.clone();
        let scope = scope.clone();
        let cursor = cursor.map(str::to_string);
        let page = call_with_timeout(timeout, move || api.search_posts(&tag, &scope, cursor.as_deref()))?;

        let mut links = Vec::new();
        for post in &page.items {
            let evidence = post.to_record();
            for tag in post.tags() {
                if &tag != entity {
                    links.push(Link {
                        neighbor: tag,
                        provenance: Some(evidence.clone()),
                    });
                }
            }
        }

        Ok(FetchedPage {
            links,
            next_cursor: page.next_cursor,
            usage: vec![ResourceUsage {
                resource: resources::SEARCH_POSTS,
                status: page.rate_limit,
            }],
        })
    }
}
