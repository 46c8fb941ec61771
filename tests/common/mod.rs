// tests/common/mod.rs
//! Shared in-memory doubles for the store, transport, and content
//! provider seams.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use market_digest_bot::content::ContentProvider;
use market_digest_bot::store::PreferenceStore;
use market_digest_bot::transport::{SendError, Transport};
use market_digest_bot::types::{DigestRequest, Language, Recipient, RecipientId, Topic};

// --- Preference store ---

#[derive(Default)]
pub struct MemoryStore {
    recipients: Mutex<BTreeMap<RecipientId, Recipient>>,
    admins: Mutex<BTreeSet<RecipientId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients(recipients: impl IntoIterator<Item = Recipient>) -> Self {
        let store = Self::new();
        {
            let mut map = store.recipients.lock().unwrap();
            for r in recipients {
                map.insert(r.id, r);
            }
        }
        store
    }

    pub fn recipient(id: RecipientId, lang: Language, topics: &[Topic]) -> Recipient {
        Recipient {
            id,
            language: lang,
            topics: topics.iter().copied().collect(),
            active: true,
            last_delivery: None,
        }
    }
}

impl PreferenceStore for MemoryStore {
    fn upsert_recipient(&self, id: RecipientId) -> Result<Recipient> {
        let mut map = self.recipients.lock().unwrap();
        Ok(map.entry(id).or_insert_with(|| Recipient::new(id)).clone())
    }

    fn get(&self, id: RecipientId) -> Result<Option<Recipient>> {
        Ok(self.recipients.lock().unwrap().get(&id).cloned())
    }

    fn list_active_recipients(&self, topic: Option<Topic>) -> Result<Vec<Recipient>> {
        Ok(self
            .recipients
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.active && topic.map_or(true, |t| r.wants(t)))
            .cloned()
            .collect())
    }

    fn set_active(&self, id: RecipientId, active: bool) -> Result<()> {
        if let Some(r) = self.recipients.lock().unwrap().get_mut(&id) {
            r.active = active;
        }
        Ok(())
    }

    fn update_preferences(
        &self,
        id: RecipientId,
        language: Option<Language>,
        topics: Option<BTreeSet<Topic>>,
    ) -> Result<()> {
        if let Some(r) = self.recipients.lock().unwrap().get_mut(&id) {
            if let Some(lang) = language {
                r.language = lang;
            }
            if let Some(topics) = topics {
                r.topics = topics;
            }
        }
        Ok(())
    }

    fn mark_delivered(&self, id: RecipientId, at: DateTime<Utc>) -> Result<()> {
        if let Some(r) = self.recipients.lock().unwrap().get_mut(&id) {
            r.last_delivery = Some(at);
        }
        Ok(())
    }

    fn recipient_count(&self) -> Result<u64> {
        Ok(self.recipients.lock().unwrap().len() as u64)
    }

    fn active_count(&self) -> Result<u64> {
        Ok(self
            .recipients
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.active)
            .count() as u64)
    }

    fn add_admin(&self, id: RecipientId) -> Result<()> {
        self.admins.lock().unwrap().insert(id);
        Ok(())
    }

    fn is_admin(&self, id: RecipientId) -> Result<bool> {
        Ok(self.admins.lock().unwrap().contains(&id))
    }

    fn admin_count(&self) -> Result<u64> {
        Ok(self.admins.lock().unwrap().len() as u64)
    }
}

/// A store whose listing always fails, for fatal-path tests.
pub struct BrokenStore;

impl PreferenceStore for BrokenStore {
    fn upsert_recipient(&self, _id: RecipientId) -> Result<Recipient> {
        Err(anyhow!("store down"))
    }
    fn get(&self, _id: RecipientId) -> Result<Option<Recipient>> {
        Err(anyhow!("store down"))
    }
    fn list_active_recipients(&self, _topic: Option<Topic>) -> Result<Vec<Recipient>> {
        Err(anyhow!("store down"))
    }
    fn set_active(&self, _id: RecipientId, _active: bool) -> Result<()> {
        Err(anyhow!("store down"))
    }
    fn update_preferences(
        &self,
        _id: RecipientId,
        _language: Option<Language>,
        _topics: Option<BTreeSet<Topic>>,
    ) -> Result<()> {
        Err(anyhow!("store down"))
    }
    fn mark_delivered(&self, _id: RecipientId, _at: DateTime<Utc>) -> Result<()> {
        Err(anyhow!("store down"))
    }
    fn recipient_count(&self) -> Result<u64> {
        Err(anyhow!("store down"))
    }
    fn active_count(&self) -> Result<u64> {
        Err(anyhow!("store down"))
    }
    fn add_admin(&self, _id: RecipientId) -> Result<()> {
        Err(anyhow!("store down"))
    }
    fn is_admin(&self, _id: RecipientId) -> Result<bool> {
        Err(anyhow!("store down"))
    }
    fn admin_count(&self) -> Result<u64> {
        Err(anyhow!("store down"))
    }
}

// --- Transport ---

/// Transport double: every send attempt is recorded; outcomes can be
/// scripted per recipient (each entry consumed once, then success).
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<HashMap<RecipientId, VecDeque<SendError>>>,
    sent: Mutex<Vec<(RecipientId, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, id: RecipientId, err: SendError) {
        self.script
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(err);
    }

    /// All send attempts, including retried and failed ones.
    pub fn attempts(&self) -> Vec<(RecipientId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, id: RecipientId) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == id)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, recipient: RecipientId, text: &str) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient, text.to_string()));
        if let Some(queue) = self.script.lock().unwrap().get_mut(&recipient) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }
}

// --- Full delivery harness ---

use std::sync::Arc;

use market_digest_bot::cache::DigestCache;
use market_digest_bot::dispatch::{Dispatcher, RateLimiter};
use market_digest_bot::fanout::Orchestrator;
use tokio::sync::watch;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<ScriptedTransport>,
    pub provider: Arc<CountingProvider>,
    pub cache: Arc<DigestCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<Orchestrator>,
    pub shutdown_tx: watch::Sender<bool>,
}

pub struct HarnessOpts {
    pub send_gap: Duration,
    pub cache_ttl: Duration,
    pub cycle_budget: Duration,
}

impl Default for HarnessOpts {
    fn default() -> Self {
        Self {
            send_gap: Duration::from_millis(0),
            cache_ttl: Duration::from_secs(600),
            cycle_budget: Duration::from_secs(300),
        }
    }
}

pub fn harness(recipients: Vec<Recipient>, opts: HarnessOpts) -> Harness {
    let store = Arc::new(MemoryStore::with_recipients(recipients));
    let transport = Arc::new(ScriptedTransport::new());
    let provider = Arc::new(CountingProvider::new());
    let cache = Arc::new(DigestCache::new(provider.clone(), opts.cache_ttl));
    let limiter = Arc::new(RateLimiter::new(opts.send_gap));
    let dispatcher = Arc::new(Dispatcher::new(
        transport.clone(),
        store.clone(),
        limiter,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        cache.clone(),
        dispatcher.clone(),
        opts.cycle_budget,
        shutdown_rx,
    ));
    Harness {
        store,
        transport,
        provider,
        cache,
        dispatcher,
        orchestrator,
        shutdown_tx,
    }
}

// --- Content provider ---

/// Provider double: counts calls per request key; failures can be
/// scripted per topic; an optional artificial delay simulates a slow
/// upstream.
pub struct CountingProvider {
    calls: Mutex<HashMap<DigestRequest, usize>>,
    fail_topics: Mutex<BTreeSet<Topic>>,
    delay: Option<Duration>,
    seq: AtomicUsize,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            fail_topics: Mutex::new(BTreeSet::new()),
            delay: None,
            seq: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn fail_topic(&self, topic: Topic) {
        self.fail_topics.lock().unwrap().insert(topic);
    }

    pub fn heal_topic(&self, topic: Topic) {
        self.fail_topics.lock().unwrap().remove(&topic);
    }

    pub fn calls_for(&self, request: &DigestRequest) -> usize {
        self.calls.lock().unwrap().get(request).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl Default for CountingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentProvider for CountingProvider {
    async fn fetch_digest(&self, request: &DigestRequest) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        *self.calls.lock().unwrap().entry(*request).or_insert(0) += 1;
        if self.fail_topics.lock().unwrap().contains(&request.topic) {
            return Err(anyhow!("provider down for {}", request.topic.as_key()));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "digest {} {} #{n}",
            request.topic.as_key(),
            request.language.as_key()
        ))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}
