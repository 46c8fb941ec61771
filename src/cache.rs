// src/cache.rs
//! Digest cache: deduplicates provider fetches per (topic, language) key
//! within a freshness window. Concurrent callers of the same key never
//! trigger duplicate provider calls; the later caller waits on the
//! per-key lock and reuses the in-flight result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::content::ContentProvider;
use crate::types::DigestRequest;

struct Entry {
    body: String,
    fetched_at: Instant,
}

pub struct DigestCache {
    provider: Arc<dyn ContentProvider>,
    ttl: Duration,
    // Outer lock is held only to look up the per-key slot; the fetch
    // itself runs under the per-key async lock.
    slots: Mutex<HashMap<DigestRequest, Arc<AsyncMutex<Option<Entry>>>>>,
}

impl DigestCache {
    pub fn new(provider: Arc<dyn ContentProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, request: DigestRequest) -> Arc<AsyncMutex<Option<Entry>>> {
        let mut slots = self.slots.lock().expect("cache mutex poisoned");
        slots
            .entry(request)
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Return a fresh-enough cached digest, or fetch one. `bypass` forces
    /// a provider call regardless of freshness (manual triggers). Fetch
    /// failures propagate and are never cached.
    pub async fn get_or_fetch(&self, request: DigestRequest, bypass: bool) -> Result<String> {
        let slot = self.slot(request);
        let mut entry = slot.lock().await;

        if !bypass {
            if let Some(cached) = entry.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    counter!("digest_cache_hit_total").increment(1);
                    return Ok(cached.body.clone());
                }
            }
        }

        counter!("digest_cache_miss_total").increment(1);
        let body = self
            .provider
            .fetch_digest(&request)
            .await
            .with_context(|| {
                format!(
                    "fetching digest topic={} lang={}",
                    request.topic.as_key(),
                    request.language.as_key()
                )
            })
            .inspect_err(|_| {
                counter!("digest_fetch_errors_total").increment(1);
            })?;

        *entry = Some(Entry {
            body: body.clone(),
            fetched_at: Instant::now(),
        });
        Ok(body)
    }
}
