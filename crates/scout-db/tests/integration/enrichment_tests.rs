use chrono::{TimeDelta, Utc};
use scout_core::models::{EnrichmentCacheEntry, Platform, UNLIMITED};
use scout_core::traits::{EnrichmentStore, QuotaLimitProvider};
use scout_db::{EnrichmentRepository, PlanRepository};

use crate::integration::common::setup_test_db;

const PERIOD: &str = "2026-10";

fn entry(handle: &str, followers: u32) -> EnrichmentCacheEntry {
    let now = Utc::now();
    EnrichmentCacheEntry {
        platform: Platform::TikTok,
        handle: handle.to_string(),
        payload: serde_json::json!({ "followers": followers }),
        fetched_at: now,
        ttl_expiry: now + TimeDelta::days(7),
    }
}

#[tokio::test]
async fn cache_upsert_replaces_entry() {
    let (pool, _container) = setup_test_db().await;
    let repo = EnrichmentRepository::new(pool);

    assert!(repo.get_cached(Platform::TikTok, "catlady").await.unwrap().is_none());

    repo.put_cached(&entry("catlady", 100)).await.unwrap();
    repo.put_cached(&entry("catlady", 250)).await.unwrap();

    let cached = repo
        .get_cached(Platform::TikTok, "catlady")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.payload["followers"], 250);
    assert!(cached.is_fresh_at(Utc::now()));

    // Same handle on another platform is a different key.
    assert!(repo.get_cached(Platform::YouTube, "catlady").await.unwrap().is_none());
}

#[tokio::test]
async fn consumption_stops_at_limit() {
    let (pool, _container) = setup_test_db().await;
    let repo = EnrichmentRepository::new(pool);

    for expected in 1..=3 {
        let decision = repo.try_consume("owner-1", PERIOD, 3).await.unwrap();
        assert!(decision.accepted);
        assert_eq!(decision.used, expected);
    }

    let rejected = repo.try_consume("owner-1", PERIOD, 3).await.unwrap();
    assert!(!rejected.accepted);
    assert_eq!(rejected.used, 3);
    assert_eq!(rejected.limit, 3);
    assert_eq!(repo.usage("owner-1", PERIOD).await.unwrap(), 3);

    // New period starts from zero.
    assert!(repo.try_consume("owner-1", "2026-11", 3).await.unwrap().accepted);

    let counter = repo.counter("owner-1", PERIOD).await.unwrap().unwrap();
    assert_eq!(counter.count, 3);
    assert_eq!(counter.limit, 3);
}

#[tokio::test]
async fn zero_limit_rejects_without_creating_counter() {
    let (pool, _container) = setup_test_db().await;
    let repo = EnrichmentRepository::new(pool);

    let decision = repo.try_consume("owner-1", PERIOD, 0).await.unwrap();
    assert!(!decision.accepted);
    assert_eq!(decision.used, 0);
    assert!(repo.counter("owner-1", PERIOD).await.unwrap().is_none());
}

#[tokio::test]
async fn unlimited_never_rejects() {
    let (pool, _container) = setup_test_db().await;
    let repo = EnrichmentRepository::new(pool);

    for _ in 0..5 {
        assert!(repo.try_consume("vip", PERIOD, UNLIMITED).await.unwrap().accepted);
    }
    assert_eq!(repo.usage("vip", PERIOD).await.unwrap(), 5);
}

#[tokio::test]
async fn concurrent_consumption_never_exceeds_limit() {
    let (pool, _container) = setup_test_db().await;
    let repo = EnrichmentRepository::new(pool);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.try_consume("owner-1", PERIOD, 5).await.unwrap().accepted
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(repo.usage("owner-1", PERIOD).await.unwrap(), 5);
}

#[tokio::test]
async fn plan_limits_fall_back_to_default() {
    let (pool, _container) = setup_test_db().await;
    let plans = PlanRepository::new(pool, 100);

    assert_eq!(plans.limit_for("free-user").await.unwrap(), 100);

    plans.set_limit("pro-user", 1000).await.unwrap();
    plans.set_limit("agency", UNLIMITED).await.unwrap();
    plans.set_limit("pro-user", 2000).await.unwrap();

    assert_eq!(plans.limit_for("pro-user").await.unwrap(), 2000);
    assert_eq!(plans.limit_for("agency").await.unwrap(), UNLIMITED);
}
