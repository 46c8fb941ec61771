// tests/cache_dedup.rs
//! Digest cache properties: fetch deduplication within the validity
//! window, singleflight under concurrency, bypass semantics, and no
//! caching of failures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::CountingProvider;
use market_digest_bot::cache::DigestCache;
use market_digest_bot::types::{DigestRequest, Language, Topic};

fn finance_en() -> DigestRequest {
    DigestRequest {
        topic: Topic::Finance,
        language: Language::En,
    }
}

#[tokio::test(start_paused = true)]
async fn n_callers_within_window_share_one_fetch() {
    let provider = Arc::new(CountingProvider::new());
    let cache = DigestCache::new(provider.clone(), Duration::from_secs(600));

    let first = cache.get_or_fetch(finance_en(), false).await.unwrap();
    for _ in 0..4 {
        let again = cache.get_or_fetch(finance_en(), false).await.unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(provider.calls_for(&finance_en()), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_wait_for_the_inflight_fetch() {
    let provider = Arc::new(CountingProvider::with_delay(Duration::from_millis(200)));
    let cache = Arc::new(DigestCache::new(provider.clone(), Duration::from_secs(600)));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_fetch(finance_en(), false).await.unwrap() })
        })
        .collect();

    let mut bodies = Vec::new();
    for t in tasks {
        bodies.push(t.await.unwrap());
    }

    // One provider call, identical content for every caller.
    assert_eq!(provider.calls_for(&finance_en()), 1);
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(start_paused = true)]
async fn bypass_refetches_even_when_fresh() {
    let provider = Arc::new(CountingProvider::new());
    let cache = DigestCache::new(provider.clone(), Duration::from_secs(600));

    cache.get_or_fetch(finance_en(), false).await.unwrap();
    cache.get_or_fetch(finance_en(), true).await.unwrap();
    assert_eq!(provider.calls_for(&finance_en()), 2);

    // And the bypassed fetch refreshed the entry for later callers.
    cache.get_or_fetch(finance_en(), false).await.unwrap();
    assert_eq!(provider.calls_for(&finance_en()), 2);
}

#[tokio::test(start_paused = true)]
async fn failures_are_not_cached() {
    let provider = Arc::new(CountingProvider::new());
    let cache = DigestCache::new(provider.clone(), Duration::from_secs(600));

    provider.fail_topic(Topic::Finance);
    assert!(cache.get_or_fetch(finance_en(), false).await.is_err());

    // Next call retries the provider instead of serving a poisoned entry.
    provider.heal_topic(Topic::Finance);
    let body = cache.get_or_fetch(finance_en(), false).await.unwrap();
    assert!(body.contains("finance"));
    assert_eq!(provider.calls_for(&finance_en()), 2);
}

#[tokio::test(start_paused = true)]
async fn language_is_part_of_the_key() {
    let provider = Arc::new(CountingProvider::new());
    let cache = DigestCache::new(provider.clone(), Duration::from_secs(600));

    let ru = DigestRequest {
        topic: Topic::Finance,
        language: Language::Ru,
    };
    let en_body = cache.get_or_fetch(finance_en(), false).await.unwrap();
    let ru_body = cache.get_or_fetch(ru, false).await.unwrap();
    assert_ne!(en_body, ru_body);
    assert_eq!(provider.total_calls(), 2);
}
