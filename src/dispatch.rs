// src/dispatch.rs
//! Rate-limited dispatcher: the single delivery primitive. One message to
//! one recipient, spaced behind a transport-wide rate ceiling, with the
//! outcome classified for the cycle report.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::store::PreferenceStore;
use crate::transport::{SendError, Transport};
use crate::types::{DeliveryOutcome, RecipientId};

/// Shared minimum-gap limiter. The gap applies across ALL recipients and
/// all concurrent cycles; callers serialize on the internal lock, which
/// makes this the single point of mutual exclusion between a scheduled
/// cycle and a concurrent manual one.
pub struct RateLimiter {
    min_gap: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait until a send slot is available and reserve the next one.
    pub async fn acquire(&self) {
        let mut slot = self.next_slot.lock().await;
        let now = Instant::now();
        if *slot > now {
            tokio::time::sleep_until(*slot).await;
        }
        *slot = Instant::now().max(*slot) + self.min_gap;
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn PreferenceStore>,
    limiter: Arc<RateLimiter>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn PreferenceStore>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            transport,
            store,
            limiter,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Send one message. A transient failure earns exactly one immediate
    /// retry; an unreachable recipient is deactivated so future cycles
    /// skip them until they re-engage.
    pub async fn dispatch(&self, recipient: RecipientId, text: &str) -> DeliveryOutcome {
        self.limiter.acquire().await;
        match self.transport.send(recipient, text).await {
            Ok(()) => delivered(),
            Err(SendError::Unreachable(desc)) => self.deactivate(recipient, &desc),
            Err(SendError::Transient(first)) => {
                tracing::debug!(recipient, error = %first, "transient send failure, retrying once");
                self.limiter.acquire().await;
                match self.transport.send(recipient, text).await {
                    Ok(()) => delivered(),
                    Err(SendError::Unreachable(desc)) => self.deactivate(recipient, &desc),
                    Err(SendError::Transient(second)) => {
                        tracing::warn!(recipient, error = %second, "send failed after retry");
                        counter!("dispatch_transient_total").increment(1);
                        DeliveryOutcome::TransientError
                    }
                }
            }
        }
    }

    fn deactivate(&self, recipient: RecipientId, desc: &str) -> DeliveryOutcome {
        tracing::warn!(recipient, reason = %desc, "recipient unreachable, deactivating");
        if let Err(e) = self.store.set_active(recipient, false) {
            tracing::error!(recipient, error = ?e, "failed to deactivate recipient");
        }
        counter!("dispatch_unreachable_total").increment(1);
        DeliveryOutcome::RecipientUnreachable
    }
}

fn delivered() -> DeliveryOutcome {
    counter!("dispatch_delivered_total").increment(1);
    DeliveryOutcome::Delivered
}
