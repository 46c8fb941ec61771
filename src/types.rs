// src/types.rs
//! Core domain types shared across the scheduler, cache, and delivery path.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram chat id doubles as the recipient identity.
pub type RecipientId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Ru,
}

impl Language {
    pub fn as_key(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Language::En),
            "ru" => Some(Language::Ru),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Ru => "Русский",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Ru
    }
}

/// Content topics a recipient can subscribe to. Declaration order is the
/// rendering precedence when a recipient subscribes to several topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    All,
    OilGas,
    MetalsMining,
    Technology,
    Finance,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::All,
        Topic::OilGas,
        Topic::MetalsMining,
        Topic::Technology,
        Topic::Finance,
    ];

    pub fn as_key(&self) -> &'static str {
        match self {
            Topic::All => "all",
            Topic::OilGas => "oil_gas",
            Topic::MetalsMining => "metals_mining",
            Topic::Technology => "technology",
            Topic::Finance => "finance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Topic::All),
            "oil_gas" | "oil" | "gas" => Some(Topic::OilGas),
            "metals_mining" | "metals" | "mining" => Some(Topic::MetalsMining),
            "technology" | "tech" => Some(Topic::Technology),
            "finance" | "banking" => Some(Topic::Finance),
            _ => None,
        }
    }

    pub fn label(&self, lang: Language) -> &'static str {
        match (self, lang) {
            (Topic::All, Language::En) => "All Topics",
            (Topic::All, Language::Ru) => "Все темы",
            (Topic::OilGas, Language::En) => "Oil & Gas",
            (Topic::OilGas, Language::Ru) => "Нефть и газ",
            (Topic::MetalsMining, Language::En) => "Metals & Mining",
            (Topic::MetalsMining, Language::Ru) => "Металлы и добыча",
            (Topic::Technology, Language::En) => "Technology",
            (Topic::Technology, Language::Ru) => "Технологии",
            (Topic::Finance, Language::En) => "Finance & Banking",
            (Topic::Finance, Language::Ru) => "Финансы и банкинг",
        }
    }
}

/// A subscriber record as held by the preference store. The delivery core
/// only keeps these for the duration of one fan-out cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: RecipientId,
    pub language: Language,
    pub topics: BTreeSet<Topic>,
    pub active: bool,
    pub last_delivery: Option<DateTime<Utc>>,
}

impl Recipient {
    pub fn new(id: RecipientId) -> Self {
        let mut topics = BTreeSet::new();
        topics.insert(Topic::All);
        Self {
            id,
            language: Language::default(),
            topics,
            active: true,
            last_delivery: None,
        }
    }

    /// Whether this recipient should receive content for `topic`.
    /// Subscribing to `All` means every topic is of interest.
    pub fn wants(&self, topic: Topic) -> bool {
        self.topics.contains(&Topic::All) || self.topics.contains(&topic)
    }

    /// The distinct digests this recipient needs in one full cycle.
    /// An `All` subscription collapses to the single cross-market digest.
    pub fn digest_requests(&self) -> Vec<DigestRequest> {
        if self.topics.is_empty() || self.topics.contains(&Topic::All) {
            return vec![DigestRequest {
                topic: Topic::All,
                language: self.language,
            }];
        }
        self.topics
            .iter()
            .map(|t| DigestRequest {
                topic: *t,
                language: self.language,
            })
            .collect()
    }
}

/// One unit of fetchable content. Constructed transiently per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DigestRequest {
    pub topic: Topic,
    pub language: Language,
}

/// What a fan-out cycle covers: everyone, or only recipients interested
/// in one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutShape {
    AllActive,
    Topic(Topic),
}

impl FanoutShape {
    pub fn topic_filter(&self) -> Option<Topic> {
        match self {
            FanoutShape::AllActive => None,
            FanoutShape::Topic(t) => Some(*t),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "all_active" => Some(FanoutShape::AllActive),
            other => Topic::parse(other).map(FanoutShape::Topic),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            FanoutShape::AllActive => "all",
            FanoutShape::Topic(t) => t.as_key(),
        }
    }
}

/// Per-recipient result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    RecipientUnreachable,
    TransientError,
}

/// Aggregate of one fan-out cycle. `delivered + unreachable + transient`
/// always equals `attempted`; recipients that had no renderable content
/// this cycle are counted in `skipped` instead.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub shape: String,
    pub attempted: usize,
    pub delivered: usize,
    pub unreachable: usize,
    pub transient: usize,
    pub skipped: usize,
    pub failed_topics: Vec<Topic>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl DeliveryReport {
    pub fn new(shape: FanoutShape, started_at: DateTime<Utc>) -> Self {
        Self {
            shape: shape.describe().to_string(),
            attempted: 0,
            delivered: 0,
            unreachable: 0,
            transient: 0,
            skipped: 0,
            failed_topics: Vec::new(),
            started_at,
            duration_ms: 0,
        }
    }

    pub fn record(&mut self, outcome: DeliveryOutcome) {
        self.attempted += 1;
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::RecipientUnreachable => self.unreachable += 1,
            DeliveryOutcome::TransientError => self.transient += 1,
        }
    }

    /// Invariant: outcome counts partition the attempted set.
    pub fn is_consistent(&self) -> bool {
        self.delivered + self.unreachable + self.transient == self.attempted
    }
}
