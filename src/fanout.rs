// src/fanout.rs
//! Fan-out orchestrator: one full dispatch cycle for a trigger firing or
//! a manual request. Failures are isolated per topic group and per
//! recipient; only an unavailable preference store aborts a cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::cache::DigestCache;
use crate::dispatch::Dispatcher;
use crate::metrics::ensure_metrics_described;
use crate::render::render_message;
use crate::store::PreferenceStore;
use crate::types::{
    DeliveryOutcome, DeliveryReport, DigestRequest, FanoutShape, Recipient, Topic,
};

pub struct Orchestrator {
    store: Arc<dyn PreferenceStore>,
    cache: Arc<DigestCache>,
    dispatcher: Arc<Dispatcher>,
    cycle_budget: Duration,
    shutdown: watch::Receiver<bool>,
    last_report: RwLock<Option<DeliveryReport>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        cache: Arc<DigestCache>,
        dispatcher: Arc<Dispatcher>,
        cycle_budget: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            cycle_budget,
            shutdown,
            last_report: RwLock::new(None),
        }
    }

    /// Manual fan-out: skips schedule matching upstream and always forces
    /// fresh content.
    pub async fn trigger_manual(&self, shape: FanoutShape) -> Result<DeliveryReport> {
        self.run_cycle(shape, true).await
    }

    pub fn last_report(&self) -> Option<DeliveryReport> {
        self.last_report
            .read()
            .expect("report lock poisoned")
            .clone()
    }

    /// Execute one cycle: resolve recipients, fetch one digest per
    /// (topic, language) group, render, and dispatch sequentially behind
    /// the shared rate limiter. Returns the cycle's DeliveryReport.
    pub async fn run_cycle(&self, shape: FanoutShape, bypass_cache: bool) -> Result<DeliveryReport> {
        ensure_metrics_described();
        let started = Instant::now();
        let mut report = DeliveryReport::new(shape, Utc::now());

        // The only fatal failure: no recipient list, no cycle.
        let recipients = self
            .store
            .list_active_recipients(shape.topic_filter())
            .context("resolving recipient list")?;

        if recipients.is_empty() {
            tracing::info!(shape = shape.describe(), "fan-out skipped, no active recipients");
            self.finish(&mut report, started);
            return Ok(report);
        }

        // Group: one provider fetch per distinct (topic, language).
        let requests: BTreeSet<DigestRequest> = recipients
            .iter()
            .flat_map(|r| cycle_requests(r, shape))
            .collect();

        let mut fetched: BTreeMap<DigestRequest, String> = BTreeMap::new();
        let mut failed_topics: BTreeSet<Topic> = BTreeSet::new();
        for request in requests {
            match self.cache.get_or_fetch(request, bypass_cache).await {
                Ok(body) => {
                    fetched.insert(request, body);
                }
                Err(e) => {
                    tracing::warn!(
                        topic = request.topic.as_key(),
                        language = request.language.as_key(),
                        error = ?e,
                        "digest fetch failed, skipping topic group"
                    );
                    failed_topics.insert(request.topic);
                }
            }
        }
        report.failed_topics = failed_topics.into_iter().collect();

        let now = Utc::now();
        for recipient in &recipients {
            let digests = recipient_view(recipient, shape, &fetched);
            let Some(message) = render_message(recipient, &digests, now) else {
                report.skipped += 1;
                counter!("fanout_skipped_recipients_total").increment(1);
                continue;
            };

            // Budget or shutdown: stop dispatching, report the rest as
            // transient so the next cycle retries them.
            if started.elapsed() >= self.cycle_budget {
                tracing::warn!(recipient = recipient.id, "cycle budget exceeded, deferring");
                report.record(DeliveryOutcome::TransientError);
                continue;
            }
            if *self.shutdown.borrow() {
                tracing::info!(recipient = recipient.id, "shutdown requested, deferring");
                report.record(DeliveryOutcome::TransientError);
                continue;
            }

            let outcome = self.dispatcher.dispatch(recipient.id, &message).await;
            if outcome == DeliveryOutcome::Delivered {
                if let Err(e) = self.store.mark_delivered(recipient.id, Utc::now()) {
                    tracing::warn!(recipient = recipient.id, error = ?e, "failed to record delivery");
                }
            }
            report.record(outcome);
        }

        self.finish(&mut report, started);
        debug_assert!(report.is_consistent());
        tracing::info!(
            shape = shape.describe(),
            attempted = report.attempted,
            delivered = report.delivered,
            unreachable = report.unreachable,
            transient = report.transient,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "fan-out cycle finished"
        );
        Ok(report)
    }

    fn finish(&self, report: &mut DeliveryReport, started: Instant) {
        report.duration_ms = started.elapsed().as_millis() as u64;
        counter!("fanout_cycles_total").increment(1);
        gauge!("fanout_last_run_ts").set(Utc::now().timestamp() as f64);
        histogram!("fanout_cycle_ms").record(report.duration_ms as f64);
        *self.last_report.write().expect("report lock poisoned") = Some(report.clone());
    }
}

/// The digest requests one recipient contributes to this cycle. A
/// topic-shaped cycle narrows everyone to that topic; a full cycle uses
/// the recipient's own subscriptions.
fn cycle_requests(recipient: &Recipient, shape: FanoutShape) -> Vec<DigestRequest> {
    match shape {
        FanoutShape::AllActive => recipient.digest_requests(),
        FanoutShape::Topic(topic) => vec![DigestRequest {
            topic,
            language: recipient.language,
        }],
    }
}

/// Project the fetched digests into this recipient's language.
fn recipient_view(
    recipient: &Recipient,
    shape: FanoutShape,
    fetched: &BTreeMap<DigestRequest, String>,
) -> BTreeMap<Topic, String> {
    cycle_requests(recipient, shape)
        .into_iter()
        .filter_map(|req| fetched.get(&req).map(|body| (req.topic, body.clone())))
        .collect()
}
