// src/render.rs
//! Per-recipient message assembly. A recipient subscribed to several
//! topics gets one merged message with a section per topic, ordered by
//! the fixed `Topic` declaration order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::i18n::{phrase, Phrase};
use crate::types::{Recipient, Topic};

/// Keep the final payload under Telegram's 4096-char message cap.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Assemble the outgoing message for one recipient from the digests
/// fetched this cycle. Returns `None` when no subscribed topic has
/// content (that recipient is skipped for the cycle).
pub fn render_message(
    recipient: &Recipient,
    digests: &BTreeMap<Topic, String>,
    now: DateTime<Utc>,
) -> Option<String> {
    let wanted: Vec<Topic> = Topic::ALL
        .iter()
        .copied()
        .filter(|t| digests.contains_key(t) && recipient.wants(*t))
        .collect();
    if wanted.is_empty() {
        return None;
    }

    let lang = recipient.language;
    let mut out = format!(
        "*{}* — {}\n",
        phrase(lang, Phrase::DigestHeader),
        now.format("%Y-%m-%d")
    );

    let label_sections = wanted.len() > 1;
    for topic in &wanted {
        let body = &digests[topic];
        out.push('\n');
        if label_sections {
            out.push_str(&format!("*{}*\n", topic.label(lang)));
        }
        out.push_str(body);
        out.push('\n');
    }

    out.push('\n');
    out.push_str(phrase(lang, Phrase::DigestFooter));

    if out.chars().count() > MAX_MESSAGE_CHARS {
        out = out.chars().take(MAX_MESSAGE_CHARS).collect();
    }
    Some(out)
}
