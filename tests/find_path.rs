//! End-to-end searches against an on-disk cache and an in-memory upstream

use std::sync::Arc;
use std::time::Duration;

use degrees::discovery::StaticUpstream;
use degrees::ratelimit::{resources, ManualClock, RateLimitStatus, Scope};
use degrees::{
    AuthContext, EntityKind, Hashtag, Outcome, SearchConfig, SearchEngine, SearchError, SearchRequest, SearchService,
    SeedEdge, User,
};
use tempfile::tempdir;

fn chain_upstream() -> StaticUpstream {
    StaticUpstream::new()
        .with_post(1, "#alpha #beta")
        .with_post(2, "#beta #gamma")
        .with_post(3, "#gamma #delta")
        .with_post(4, "#delta #epsilon")
}

#[test]
fn test_cache_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("social");
    let request = SearchRequest::new(Hashtag::new("alpha"), Hashtag::new("delta"), 3, 50);

    let upstream = Arc::new(chain_upstream());
    {
        let engine = SearchEngine::open(&path, SearchConfig::default(), upstream.clone()).unwrap();
        let first = engine.find_hashtag_path(&request, None).unwrap();
        assert!(first.is_found());
        assert!(first.metadata.calls_made > 0);
        engine.cache().flush().unwrap();
    }

    let calls_before = upstream.calls();
    let engine = SearchEngine::open(&path, SearchConfig::default(), upstream.clone()).unwrap();
    let second = engine.find_hashtag_path(&request, None).unwrap();

    assert!(second.is_found());
    assert_eq!(second.metadata.calls_made, 0);
    assert_eq!(upstream.calls(), calls_before);
    assert_eq!(
        second.paths[0].entities,
        ["alpha", "beta", "gamma", "delta"].map(Hashtag::new).to_vec()
    );
}

#[test]
fn test_budget_is_never_exceeded() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(dir.path().join("social"), SearchConfig::default(), Arc::new(chain_upstream())).unwrap();

    for budget in 1..=4 {
        let request = SearchRequest::new(Hashtag::new("alpha"), Hashtag::new("zeta"), 4, budget);
        let result = engine.find_hashtag_path(&request, None).unwrap();
        assert_eq!(result.metadata.outcome, Outcome::Exhausted);
        assert!(result.metadata.calls_made <= budget);
        assert!(result.paths.is_empty());
    }
}

#[test]
fn test_exhausted_pool_falls_back_to_cache() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let upstream = Arc::new(chain_upstream());
    let engine =
        SearchEngine::open_with_clock(dir.path().join("social"), SearchConfig::default(), upstream.clone(), clock.clone())
            .unwrap();

    engine.update_rate_limit(
        resources::SEARCH_POSTS,
        &Scope::AppWide,
        RateLimitStatus { remaining: 0, until_reset: Duration::from_secs(60) },
    );

    let request = SearchRequest::new(Hashtag::new("alpha"), Hashtag::new("beta"), 2, 5);
    let starved = engine.find_hashtag_path(&request, None).unwrap();
    assert_eq!(starved.metadata.outcome, Outcome::Exhausted);
    assert_eq!(starved.metadata.calls_made, 0);
    assert_eq!(upstream.calls(), 0);

    clock.advance(Duration::from_secs(61));
    let refilled = engine.find_hashtag_path(&request, None).unwrap();
    assert!(refilled.is_found());
    assert_eq!(refilled.metadata.calls_made, 1);
}

#[test]
fn test_per_user_scope_is_used_when_app_pool_is_empty() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open_with_clock(
        dir.path().join("social"),
        SearchConfig::default(),
        Arc::new(StaticUpstream::new().with_follow(1, 2)),
        Arc::new(ManualClock::new()),
    )
    .unwrap();

    for resource in [resources::FRIENDS, resources::FOLLOWERS] {
        engine.update_rate_limit(
            resource,
            &Scope::AppWide,
            RateLimitStatus { remaining: 0, until_reset: Duration::from_secs(900) },
        );
    }

    let auth = AuthContext::new("99");
    let request = SearchRequest::new(User::provisional(1), User::provisional(2), 2, 3);
    let result = engine.find_user_path(&request, Some(&auth)).unwrap();
    assert!(result.is_found());

    let per_user = engine
        .rate_limit_status()
        .into_iter()
        .find(|p| p.resource == resources::FRIENDS && p.scope == auth.scope())
        .unwrap();
    assert_eq!(per_user.remaining, per_user.ceiling - 1);
}

#[test]
fn test_service_runs_searches_and_records_history() {
    let dir = tempdir().unwrap();
    let engine = SearchEngine::open(dir.path().join("social"), SearchConfig::default(), Arc::new(StaticUpstream::new())).unwrap();
    engine
        .seed_edges(
            EntityKind::User,
            &[
                SeedEdge { a: "1".into(), b: "2".into(), evidence: None },
                SeedEdge { a: "2".into(), b: "3".into(), evidence: None },
            ],
        )
        .unwrap();

    let service = SearchService::start(Arc::new(engine), 2).unwrap();
    let result = service
        .find_user_path(SearchRequest::new(User::provisional(1), User::provisional(3), 2, 1), None)
        .unwrap();
    assert_eq!(result.paths[0].entities.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(result.connections.get("2").map(Vec::len), Some(2));

    let err = service
        .find_user_path(SearchRequest::new(User::provisional(1), User::provisional(1), 2, 1), None)
        .unwrap_err();
    assert!(matches!(err, SearchError::Validation(_)));

    let history = service.engine().cache().recent_searches(5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].end, "3");
}
