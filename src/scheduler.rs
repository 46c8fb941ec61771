// src/scheduler.rs
//! Wall-clock trigger scheduler. Triggers are static configuration; the
//! loop polls well inside a minute and fires each trigger at most once
//! per matching minute.
//!
//! All trigger times are interpreted in a fixed reference offset (UTC-5,
//! the original deployment's US-Eastern reference, deliberately without
//! DST adjustment) so the schedule does not drift with the host zone.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc, Weekday};
use serde::Deserialize;
use tokio::sync::watch;

use crate::fanout::Orchestrator;
use crate::types::FanoutShape;

const REFERENCE_OFFSET_SECS: i32 = -5 * 3600;

pub fn reference_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&reference_offset())
}

pub fn reference_offset() -> FixedOffset {
    FixedOffset::east_opt(REFERENCE_OFFSET_SECS).expect("valid reference offset")
}

/// Which days a trigger fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayMask {
    Daily,
    Weekdays,
}

impl DayMask {
    pub fn matches(&self, day: Weekday) -> bool {
        match self {
            DayMask::Daily => true,
            DayMask::Weekdays => !matches!(day, Weekday::Sat | Weekday::Sun),
        }
    }
}

/// Raw trigger entry as read from `config/triggers.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerSpec {
    pub name: String,
    /// "HH:MM" in the reference offset.
    pub at: String,
    #[serde(default = "default_days")]
    pub days: DayMask,
    /// "all" or a topic key.
    pub shape: String,
}

fn default_days() -> DayMask {
    DayMask::Weekdays
}

/// A compiled recurring trigger with its once-per-minute fire guard.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub name: String,
    hour: u32,
    minute: u32,
    days: DayMask,
    shape: FanoutShape,
    last_fired: Option<(NaiveDate, u32, u32)>,
}

impl Trigger {
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self> {
        let (hour, minute) = parse_hhmm(&spec.at)
            .with_context(|| format!("trigger '{}': bad fire time '{}'", spec.name, spec.at))?;
        let shape = FanoutShape::parse(&spec.shape)
            .ok_or_else(|| anyhow!("trigger '{}': unknown shape '{}'", spec.name, spec.shape))?;
        Ok(Self {
            name: spec.name.clone(),
            hour,
            minute,
            days: spec.days,
            shape,
            last_fired: None,
        })
    }

    pub fn shape(&self) -> FanoutShape {
        self.shape
    }

    /// True exactly once per matching minute, however often the tick
    /// loop polls within it.
    pub fn due(&mut self, now: DateTime<FixedOffset>) -> bool {
        if !self.days.matches(now.weekday()) {
            return false;
        }
        if now.hour() != self.hour || now.minute() != self.minute {
            return false;
        }
        let key = (now.date_naive(), now.hour(), now.minute());
        if self.last_fired == Some(key) {
            return false;
        }
        self.last_fired = Some(key);
        true
    }
}

fn parse_hhmm(s: &str) -> Result<(u32, u32)> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected HH:MM, got '{s}'"))?;
    let hour: u32 = h.trim().parse().context("hour")?;
    let minute: u32 = m.trim().parse().context("minute")?;
    if hour > 23 || minute > 59 {
        return Err(anyhow!("time out of range: '{s}'"));
    }
    Ok((hour, minute))
}

pub struct Scheduler {
    triggers: Vec<Trigger>,
    orchestrator: Arc<Orchestrator>,
    tick: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        triggers: Vec<Trigger>,
        orchestrator: Arc<Orchestrator>,
        tick: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        // Anything above a minute could skip a matching minute entirely.
        let tick = tick.min(Duration::from_secs(60));
        Self {
            triggers,
            orchestrator,
            tick,
            shutdown,
        }
    }

    /// Cooperative polling loop. Cycles run to completion before the
    /// next tick is evaluated; a failed cycle never stops the loop.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            triggers = self.triggers.len(),
            tick_secs = self.tick.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    // A closed channel means the process is going down.
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("scheduler stopping");
                        return;
                    }
                }
            }
            if *self.shutdown.borrow() {
                tracing::info!("scheduler stopping");
                return;
            }

            let now = reference_now();
            let due: Vec<(String, FanoutShape)> = self
                .triggers
                .iter_mut()
                .filter_map(|t| t.due(now).then(|| (t.name.clone(), t.shape)))
                .collect();

            for (name, shape) in due {
                tracing::info!(trigger = %name, shape = shape.describe(), "trigger fired");
                match self.orchestrator.run_cycle(shape, false).await {
                    Ok(report) => {
                        tracing::info!(trigger = %name, delivered = report.delivered, "trigger cycle done");
                    }
                    Err(e) => {
                        // Isolated: the next trigger still fires.
                        tracing::error!(trigger = %name, error = ?e, "trigger cycle failed");
                    }
                }
            }
        }
    }
}
