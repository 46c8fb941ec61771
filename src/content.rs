// src/content.rs
//! Content provider seam. The production implementation researches a
//! digest through the OpenAI Chat Completions API; everything downstream
//! treats the provider as an untrusted, possibly-slow dependency.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::types::{DigestRequest, Language, Topic};

/// Telegram caps messages at 4096 chars; leave room for the rendered
/// header and footer.
const MAX_DIGEST_CHARS: usize = 3800;

#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Produce the digest body for one (topic, language) pair.
    /// Errors propagate to the caller; nothing is cached on failure.
    async fn fetch_digest(&self, request: &DigestRequest) -> Result<String>;

    /// Provider name for diagnostics/logs.
    fn name(&self) -> &'static str;
}

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("market-digest-bot/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ContentProvider for OpenAiProvider {
    async fn fetch_digest(&self, request: &DigestRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(anyhow!("OPENAI_API_KEY is not configured"));
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let user_prompt = format!(
            "Research the most important developments for {} as of {}. \
             Cover 3-5 key stories with their market impact, the main price moves, \
             and what to watch next. Attribute reputable sources where possible.",
            topic_focus(request.topic, request.language),
            today
        );

        let system = system_prompt(request.language);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            max_tokens: 1200,
            temperature: 0.3,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("openai request")?
            .error_for_status()
            .context("openai non-2xx")?;

        let parsed: ChatResponse = resp.json().await.context("openai response body")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("openai returned no choices"))?;

        let clean = sanitize_digest(&content);
        if clean.is_empty() {
            return Err(anyhow!("openai returned an empty digest"));
        }
        Ok(clean)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Research focus per topic, phrased in the digest language.
fn topic_focus(topic: Topic, lang: Language) -> &'static str {
    match (topic, lang) {
        (Topic::All, Language::En) => {
            "general financial markets: major indices, large companies, and global market trends"
        }
        (Topic::All, Language::Ru) => {
            "общие финансовые рынки: основные индексы, крупные компании и глобальные тренды"
        }
        (Topic::OilGas, Language::En) => {
            "oil and natural gas markets: prices, energy companies, OPEC decisions, energy policy"
        }
        (Topic::OilGas, Language::Ru) => {
            "нефтегазовые рынки: цены, энергетические компании, решения ОПЕК, энергетическая политика"
        }
        (Topic::MetalsMining, Language::En) => {
            "precious and industrial metals, mining companies, and commodity supply chains"
        }
        (Topic::MetalsMining, Language::Ru) => {
            "драгоценные и промышленные металлы, горнодобывающие компании и товарные цепочки поставок"
        }
        (Topic::Technology, Language::En) => {
            "the technology sector: major tech stocks, AI developments, and the semiconductor industry"
        }
        (Topic::Technology, Language::Ru) => {
            "технологический сектор: крупные технологические акции, развитие ИИ и полупроводники"
        }
        (Topic::Finance, Language::En) => {
            "banking and financial services: central bank decisions, interest rates, regulation"
        }
        (Topic::Finance, Language::Ru) => {
            "банки и финансовые услуги: решения центральных банков, процентные ставки, регулирование"
        }
    }
}

fn system_prompt(lang: Language) -> &'static str {
    match lang {
        Language::En => {
            "You are a financial markets analyst writing a concise briefing in English. \
             Structure it as: top news, key asset moves, outlook. \
             Be factual, professional, and easy to scan."
        }
        Language::Ru => {
            "Ты аналитик финансовых рынков и пишешь краткий обзор на русском языке. \
             Структура: главные новости, ключевые движения активов, прогноз. \
             Пиши фактологично, профессионально и удобно для быстрого чтения."
        }
    }
}

/// Normalize provider output: collapse runaway blank lines, trim, and cap
/// the length below the transport message limit.
pub fn sanitize_digest(s: &str) -> String {
    static RE_BLANKS: OnceCell<regex::Regex> = OnceCell::new();
    let re_blanks = RE_BLANKS.get_or_init(|| regex::Regex::new(r"\n{3,}").unwrap());

    let mut out = s.replace('\r', "");
    out = re_blanks.replace_all(&out, "\n\n").to_string();
    out = out.trim().to_string();

    if out.chars().count() > MAX_DIGEST_CHARS {
        out = out.chars().take(MAX_DIGEST_CHARS).collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_blank_runs_and_trims() {
        let raw = "\n\nTop news\n\n\n\n- item one\r\n- item two\n\n";
        assert_eq!(sanitize_digest(raw), "Top news\n\n- item one\n- item two");
    }

    #[test]
    fn sanitize_caps_length() {
        let raw = "x".repeat(MAX_DIGEST_CHARS + 500);
        assert_eq!(sanitize_digest(&raw).chars().count(), MAX_DIGEST_CHARS);
    }

    #[test]
    fn every_topic_has_focus_text_in_both_languages() {
        for t in Topic::ALL {
            assert!(!topic_focus(t, Language::En).is_empty());
            assert!(!topic_focus(t, Language::Ru).is_empty());
        }
    }
}
