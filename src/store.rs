// src/store.rs
//! Recipient preference store. The delivery core talks to the
//! `PreferenceStore` trait only; `SqliteStore` is the production backend.
//!
//! Recipients are never hard-deleted: delivery failures and /unsubscribe
//! both flip the active flag, and /subscribe re-engages.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{Language, Recipient, RecipientId, Topic};

pub trait PreferenceStore: Send + Sync {
    /// Create the recipient on first contact; existing preferences are
    /// preserved on repeat calls.
    fn upsert_recipient(&self, id: RecipientId) -> Result<Recipient>;

    fn get(&self, id: RecipientId) -> Result<Option<Recipient>>;

    /// Active recipients, optionally narrowed to those interested in
    /// `topic` (an `All` subscription matches every topic).
    fn list_active_recipients(&self, topic: Option<Topic>) -> Result<Vec<Recipient>>;

    fn set_active(&self, id: RecipientId, active: bool) -> Result<()>;

    fn update_preferences(
        &self,
        id: RecipientId,
        language: Option<Language>,
        topics: Option<BTreeSet<Topic>>,
    ) -> Result<()>;

    fn mark_delivered(&self, id: RecipientId, at: DateTime<Utc>) -> Result<()>;

    fn recipient_count(&self) -> Result<u64>;
    fn active_count(&self) -> Result<u64>;

    fn add_admin(&self, id: RecipientId) -> Result<()>;
    fn is_admin(&self, id: RecipientId) -> Result<bool>;
    fn admin_count(&self) -> Result<u64>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().context("opening :memory:")?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS recipients (
                id INTEGER PRIMARY KEY,
                language TEXT NOT NULL DEFAULT 'ru',
                topics TEXT NOT NULL DEFAULT 'all',
                active INTEGER NOT NULL DEFAULT 1,
                joined_at TEXT NOT NULL,
                last_delivery_at TEXT
            );
            CREATE TABLE IF NOT EXISTS admins (
                id INTEGER PRIMARY KEY,
                added_at TEXT NOT NULL
            );",
        )
        .context("creating schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}

fn topics_to_column(topics: &BTreeSet<Topic>) -> String {
    if topics.is_empty() {
        return Topic::All.as_key().to_string();
    }
    topics
        .iter()
        .map(|t| t.as_key())
        .collect::<Vec<_>>()
        .join(",")
}

fn topics_from_column(raw: &str) -> BTreeSet<Topic> {
    let parsed: BTreeSet<Topic> = raw.split(',').filter_map(Topic::parse).collect();
    if parsed.is_empty() {
        let mut fallback = BTreeSet::new();
        fallback.insert(Topic::All);
        fallback
    } else {
        parsed
    }
}

fn row_to_recipient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipient> {
    let id: i64 = row.get(0)?;
    let language: String = row.get(1)?;
    let topics: String = row.get(2)?;
    let active: i64 = row.get(3)?;
    let last_delivery: Option<String> = row.get(4)?;
    Ok(Recipient {
        id,
        language: Language::parse(&language).unwrap_or_default(),
        topics: topics_from_column(&topics),
        active: active != 0,
        last_delivery: last_delivery
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

const SELECT_COLS: &str = "id, language, topics, active, last_delivery_at";

impl PreferenceStore for SqliteStore {
    fn upsert_recipient(&self, id: RecipientId) -> Result<Recipient> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO recipients (id, joined_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![id, Utc::now().to_rfc3339()],
        )
        .context("upsert recipient")?;
        let rec = conn
            .query_row(
                &format!("SELECT {SELECT_COLS} FROM recipients WHERE id = ?1"),
                params![id],
                row_to_recipient,
            )
            .context("read back recipient")?;
        Ok(rec)
    }

    fn get(&self, id: RecipientId) -> Result<Option<Recipient>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {SELECT_COLS} FROM recipients WHERE id = ?1"),
            params![id],
            row_to_recipient,
        )
        .optional()
        .context("get recipient")
    }

    fn list_active_recipients(&self, topic: Option<Topic>) -> Result<Vec<Recipient>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLS} FROM recipients WHERE active = 1 ORDER BY id"
            ))
            .context("prepare active list")?;
        let rows = stmt
            .query_map([], row_to_recipient)
            .context("query active recipients")?;
        let mut out = Vec::new();
        for row in rows {
            let rec = row.context("decode recipient row")?;
            if topic.map_or(true, |t| rec.wants(t)) {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn set_active(&self, id: RecipientId, active: bool) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE recipients SET active = ?2 WHERE id = ?1",
            params![id, active as i64],
        )
        .context("set active flag")?;
        Ok(())
    }

    fn update_preferences(
        &self,
        id: RecipientId,
        language: Option<Language>,
        topics: Option<BTreeSet<Topic>>,
    ) -> Result<()> {
        let conn = self.lock();
        if let Some(lang) = language {
            conn.execute(
                "UPDATE recipients SET language = ?2 WHERE id = ?1",
                params![id, lang.as_key()],
            )
            .context("update language")?;
        }
        if let Some(topics) = topics {
            conn.execute(
                "UPDATE recipients SET topics = ?2 WHERE id = ?1",
                params![id, topics_to_column(&topics)],
            )
            .context("update topics")?;
        }
        Ok(())
    }

    fn mark_delivered(&self, id: RecipientId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE recipients SET last_delivery_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )
        .context("mark delivered")?;
        Ok(())
    }

    fn recipient_count(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM recipients", [], |r| r.get(0))
            .context("count recipients")?;
        Ok(n as u64)
    }

    fn active_count(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM recipients WHERE active = 1",
                [],
                |r| r.get(0),
            )
            .context("count active recipients")?;
        Ok(n as u64)
    }

    fn add_admin(&self, id: RecipientId) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO admins (id, added_at) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )
        .context("add admin")?;
        Ok(())
    }

    fn is_admin(&self, id: RecipientId) -> Result<bool> {
        let conn = self.lock();
        let found: Option<i64> = conn
            .query_row("SELECT id FROM admins WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .optional()
            .context("check admin")?;
        Ok(found.is_some())
    }

    fn admin_count(&self) -> Result<u64> {
        let conn = self.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))
            .context("count admins")?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_preserves_existing_preferences() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.upsert_recipient(42).unwrap();
        assert_eq!(first.language, Language::Ru);
        assert!(first.active);

        let mut topics = BTreeSet::new();
        topics.insert(Topic::Finance);
        store
            .update_preferences(42, Some(Language::En), Some(topics))
            .unwrap();

        let again = store.upsert_recipient(42).unwrap();
        assert_eq!(again.language, Language::En);
        assert!(again.topics.contains(&Topic::Finance));
    }

    #[test]
    fn topic_column_roundtrip() {
        let mut topics = BTreeSet::new();
        topics.insert(Topic::Technology);
        topics.insert(Topic::OilGas);
        let col = topics_to_column(&topics);
        assert_eq!(topics_from_column(&col), topics);
        // junk degrades to the default subscription
        assert!(topics_from_column("junk,").contains(&Topic::All));
    }

    #[test]
    fn inactive_recipients_are_never_listed() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_recipient(1).unwrap();
        store.upsert_recipient(2).unwrap();
        store.set_active(1, false).unwrap();

        let active = store.list_active_recipients(None).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 2);
        assert_eq!(store.active_count().unwrap(), 1);
        assert_eq!(store.recipient_count().unwrap(), 2);
    }

    #[test]
    fn topic_filter_includes_all_subscribers() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_recipient(1).unwrap(); // default: all
        store.upsert_recipient(2).unwrap();
        let mut metals = BTreeSet::new();
        metals.insert(Topic::MetalsMining);
        store.update_preferences(2, None, Some(metals)).unwrap();
        store.upsert_recipient(3).unwrap();
        let mut tech = BTreeSet::new();
        tech.insert(Topic::Technology);
        store.update_preferences(3, None, Some(tech)).unwrap();

        let interested = store
            .list_active_recipients(Some(Topic::MetalsMining))
            .unwrap();
        let ids: Vec<i64> = interested.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn admin_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.is_admin(9).unwrap());
        store.add_admin(9).unwrap();
        store.add_admin(9).unwrap();
        assert!(store.is_admin(9).unwrap());
        assert_eq!(store.admin_count().unwrap(), 1);
    }
}
