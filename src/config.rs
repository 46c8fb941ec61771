// src/config.rs
//! Runtime configuration: environment variables for secrets and knobs,
//! TOML for the trigger schedule.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::scheduler::{Trigger, TriggerSpec};

const ENV_TRIGGERS_PATH: &str = "TRIGGERS_PATH";
const DEFAULT_TRIGGERS_PATH: &str = "config/triggers.toml";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_token: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Minimum gap between any two outbound sends.
    pub send_gap_ms: u64,
    /// How long a cached digest stays fresh for scheduled cycles.
    pub cache_ttl_secs: u64,
    /// Wall-clock budget for one fan-out cycle.
    pub cycle_budget_secs: u64,
    /// Scheduler polling tick; clamped to 60s upstream.
    pub tick_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let telegram_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow!("TELEGRAM_BOT_TOKEN is not set"))?;
        let openai_api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        Ok(Self {
            telegram_token,
            openai_api_key,
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            db_path: PathBuf::from(env_or("BOT_DB_PATH", "state/digest_bot.db")),
            http_port: env_parsed("HTTP_PORT", 8000)?,
            send_gap_ms: env_parsed("SEND_GAP_MS", 50)?,
            cache_ttl_secs: env_parsed("DIGEST_TTL_SECS", 900)?,
            cycle_budget_secs: env_parsed("CYCLE_BUDGET_SECS", 300)?,
            tick_secs: env_parsed("SCHED_TICK_SECS", 30)?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Deserialize)]
struct TriggerFile {
    triggers: Vec<TriggerSpec>,
}

/// Load triggers from an explicit TOML file.
pub fn load_triggers_from(path: &Path) -> Result<Vec<Trigger>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading triggers from {}", path.display()))?;
    let file: TriggerFile = toml::from_str(&content)
        .with_context(|| format!("parsing triggers from {}", path.display()))?;
    file.triggers.iter().map(Trigger::from_spec).collect()
}

/// Load triggers using env var + fallbacks:
/// 1) $TRIGGERS_PATH
/// 2) config/triggers.toml
/// 3) built-in defaults
pub fn load_triggers_default() -> Result<Vec<Trigger>> {
    if let Ok(p) = std::env::var(ENV_TRIGGERS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_triggers_from(&pb);
        }
        return Err(anyhow!("TRIGGERS_PATH points to a non-existent path"));
    }
    let default = PathBuf::from(DEFAULT_TRIGGERS_PATH);
    if default.exists() {
        return load_triggers_from(&default);
    }
    default_triggers()
}

/// The built-in schedule: weekday morning highlights for everyone plus
/// pre-open digests for the sector topics.
pub fn default_triggers() -> Result<Vec<Trigger>> {
    let specs = [
        ("morning-highlights", "08:00", "all"),
        ("metals-pre-open", "07:45", "metals_mining"),
        ("energy-pre-open", "08:45", "oil_gas"),
        ("us-markets-pre-open", "09:15", "finance"),
    ];
    specs
        .iter()
        .map(|(name, at, shape)| {
            Trigger::from_spec(&TriggerSpec {
                name: name.to_string(),
                at: at.to_string(),
                days: crate::scheduler::DayMask::Weekdays,
                shape: shape.to_string(),
            })
        })
        .collect()
}
