//! SQLite storage backend
//!
//! Persists items, rules, batch cards, and the audit log using rusqlite
//! with WAL mode. Nested records (classification, enrichment, triggers,
//! card data) are stored as JSON columns; the pending-card uniqueness
//! invariant is enforced by a partial unique index plus a transactional
//! get-or-create.

use crate::error::{Result, ThemisError};
use crate::storage::TriageStore;
use crate::types::{
    BatchAction, BatchCard, CardId, CardPattern, CardStatus, Classification, Enrichment, Item,
    ItemId, ItemStatus, Rule, RuleId, TriagePath,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id              TEXT PRIMARY KEY,
    external_id     TEXT NOT NULL,
    connector       TEXT NOT NULL,
    sender          TEXT NOT NULL,
    display_name    TEXT NOT NULL DEFAULT '',
    subject         TEXT NOT NULL DEFAULT '',
    content         TEXT NOT NULL DEFAULT '',
    status          TEXT NOT NULL DEFAULT 'new',
    priority        TEXT NOT NULL DEFAULT 'normal',
    tags            TEXT NOT NULL DEFAULT '[]',
    enrichment      TEXT,
    classification  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
CREATE INDEX IF NOT EXISTS idx_items_sender ON items(sender);

CREATE TABLE IF NOT EXISTS rules (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL UNIQUE,
    kind            TEXT NOT NULL,
    trigger         TEXT,
    action          TEXT,
    guidance        TEXT,
    status          TEXT NOT NULL DEFAULT 'active',
    source          TEXT NOT NULL,
    match_count     INTEGER NOT NULL DEFAULT 0,
    last_matched_at TEXT,
    version         INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cards (
    id          TEXT PRIMARY KEY,
    pattern     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    title       TEXT NOT NULL,
    batch_type  TEXT,
    data        TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_cards_pending_batch
    ON cards(batch_type)
    WHERE status = 'pending' AND pattern = 'batch';

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    operation   TEXT NOT NULL,
    subject     TEXT,
    details     TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL
);
"#;

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening SQLite database: {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (used by tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("SQLite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn json_column<T: serde::Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn opt_json_column<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
        value
            .as_ref()
            .map(|v| serde_json::to_string(v).map_err(ThemisError::from))
            .transpose()
    }
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_err(idx, e))
}

fn parse_opt_json<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    raw.map(|s| parse_json(&s, idx)).transpose()
}

fn item_status_from_str(raw: &str, idx: usize) -> rusqlite::Result<ItemStatus> {
    // Enum wire values match the serde snake_case representation
    parse_json(&format!("\"{}\"", raw), idx)
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let tags: String = row.get("tags")?;
    let enrichment: Option<String> = row.get("enrichment")?;
    let classification: Option<String> = row.get("classification")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Item {
        id: ItemId::from_string(&id).map_err(|e| conversion_err(0, e))?,
        external_id: row.get("external_id")?,
        connector: row.get("connector")?,
        sender: row.get("sender")?,
        display_name: row.get("display_name")?,
        subject: row.get("subject")?,
        content: row.get("content")?,
        status: item_status_from_str(&status, 7)?,
        priority: parse_json(&format!("\"{}\"", priority), 8)?,
        tags: parse_json(&tags, 9)?,
        enrichment: parse_opt_json(enrichment, 10)?,
        classification: parse_opt_json(classification, 11)?,
        created_at: parse_timestamp(&created_at, 12)?,
        updated_at: parse_timestamp(&updated_at, 13)?,
    })
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let id: String = row.get("id")?;
    let kind: String = row.get("kind")?;
    let trigger: Option<String> = row.get("trigger")?;
    let action: Option<String> = row.get("action")?;
    let status: String = row.get("status")?;
    let source: String = row.get("source")?;
    let last_matched_at: Option<String> = row.get("last_matched_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Rule {
        id: RuleId::from_string(&id).map_err(|e| conversion_err(0, e))?,
        name: row.get("name")?,
        kind: parse_json(&format!("\"{}\"", kind), 2)?,
        trigger: parse_opt_json(trigger, 3)?,
        action: parse_opt_json(action, 4)?,
        guidance: row.get("guidance")?,
        status: parse_json(&format!("\"{}\"", status), 6)?,
        source: parse_json(&format!("\"{}\"", source), 7)?,
        match_count: row.get::<_, i64>("match_count")? as u64,
        last_matched_at: last_matched_at
            .map(|ts| parse_timestamp(&ts, 9))
            .transpose()?,
        version: row.get::<_, i64>("version")? as u32,
        created_at: parse_timestamp(&created_at, 11)?,
        updated_at: parse_timestamp(&updated_at, 12)?,
    })
}

fn row_to_card(row: &Row<'_>) -> rusqlite::Result<BatchCard> {
    let id: String = row.get("id")?;
    let pattern: String = row.get("pattern")?;
    let status: String = row.get("status")?;
    let data: String = row.get("data")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(BatchCard {
        id: CardId::from_string(&id).map_err(|e| conversion_err(0, e))?,
        pattern: parse_json(&format!("\"{}\"", pattern), 1)?,
        status: parse_json(&format!("\"{}\"", status), 2)?,
        title: row.get("title")?,
        data: parse_json(&data, 5)?,
        created_at: parse_timestamp(&created_at, 6)?,
        updated_at: parse_timestamp(&updated_at, 7)?,
    })
}

fn row_to_outcome(row: &Row<'_>) -> rusqlite::Result<(ItemStatus, Option<TriagePath>)> {
    let status: String = row.get(0)?;
    let classification: Option<String> = row.get(1)?;
    let status = item_status_from_str(&status, 0)?;
    let path = parse_opt_json::<Classification>(classification, 1)?.and_then(|c| c.triage_path);
    Ok((status, path))
}

fn card_pattern_to_str(pattern: CardPattern) -> &'static str {
    match pattern {
        CardPattern::Batch => "batch",
        CardPattern::Learning => "learning",
    }
}

fn card_status_to_str(status: CardStatus) -> &'static str {
    match status {
        CardStatus::Pending => "pending",
        CardStatus::Confirmed => "confirmed",
    }
}

fn priority_to_str(priority: crate::types::Priority) -> &'static str {
    match priority {
        crate::types::Priority::Low => "low",
        crate::types::Priority::Normal => "normal",
        crate::types::Priority::High => "high",
    }
}

/// Render a serde snake_case enum as its bare string (no JSON quotes)
fn enum_to_str<T: serde::Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    json.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ThemisError::Other("enum did not serialize to a string".to_string()))
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[async_trait]
impl TriageStore for SqliteStore {
    async fn insert_item(&self, item: &Item) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO items (
                id, external_id, connector, sender, display_name, subject,
                content, status, priority, tags, enrichment, classification,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                item.id.to_string(),
                item.external_id,
                item.connector,
                item.sender,
                item.display_name,
                item.subject,
                item.content,
                item.status.as_str(),
                priority_to_str(item.priority),
                Self::json_column(&item.tags)?,
                Self::opt_json_column(&item.enrichment)?,
                Self::opt_json_column(&item.classification)?,
                rfc3339(item.created_at),
                rfc3339(item.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM items WHERE id = ?1",
            params![id.to_string()],
            row_to_item,
        )
        .optional()?
        .ok_or_else(|| ThemisError::ItemNotFound(id.to_string()))
    }

    async fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE items SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), rfc3339(Utc::now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(ThemisError::ItemNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_classification(&self, id: ItemId, classification: &Classification) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE items SET classification = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                Self::json_column(classification)?,
                rfc3339(Utc::now()),
                id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(ThemisError::ItemNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn merge_enrichment(&self, id: ItemId, enrichment: &Enrichment) -> Result<()> {
        // Read-merge-write under the connection lock; merge semantics live
        // on the Enrichment type so both backends agree.
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT enrichment FROM items WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ThemisError::ItemNotFound(id.to_string()))?;

        let mut merged: Enrichment = existing
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?
            .unwrap_or_default();
        merged.merge(enrichment);

        conn.execute(
            "UPDATE items SET enrichment = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                Self::json_column(&merged)?,
                rfc3339(Utc::now()),
                id.to_string()
            ],
        )?;
        Ok(())
    }

    async fn unclassified_items(&self, limit: usize) -> Result<Vec<Item>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM items
            WHERE classification IS NULL AND status = 'new'
            ORDER BY created_at ASC
            LIMIT ?1
            "#,
        )?;
        let items = stmt
            .query_map(params![limit as i64], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    async fn individually_classified_items(&self, limit: usize) -> Result<Vec<Item>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM items
            WHERE status = 'new'
              AND classification IS NOT NULL
              AND json_extract(classification, '$.batch_type') IS NULL
            ORDER BY created_at ASC
            LIMIT ?1
            "#,
        )?;
        let items = stmt
            .query_map(params![limit as i64], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    async fn unassigned_classified_items(&self) -> Result<Vec<Item>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM items
            WHERE status = 'new'
              AND classification IS NOT NULL
              AND json_extract(classification, '$.batch_type') IS NOT NULL
              AND json_extract(classification, '$.batch_card_id') IS NULL
            ORDER BY created_at ASC
            "#,
        )?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    async fn assign_card(&self, item_id: ItemId, card_id: CardId) -> Result<()> {
        let conn = self.conn.lock().await;
        // The guard clause keeps an already-assigned item untouched
        conn.execute(
            r#"
            UPDATE items
            SET classification = json_set(classification, '$.batch_card_id', ?1),
                updated_at = ?2
            WHERE id = ?3
              AND classification IS NOT NULL
              AND json_extract(classification, '$.batch_card_id') IS NULL
            "#,
            params![
                card_id.to_string(),
                rfc3339(Utc::now()),
                item_id.to_string()
            ],
        )?;
        Ok(())
    }

    async fn resolved_outcomes_for_sender(
        &self,
        sender: &str,
    ) -> Result<Vec<(ItemStatus, Option<TriagePath>)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT status, classification FROM items WHERE sender = ?1 AND status != 'new'",
        )?;
        let rows = stmt
            .query_map(params![sender], row_to_outcome)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn resolved_outcomes_for_domain(
        &self,
        domain: &str,
    ) -> Result<Vec<(ItemStatus, Option<TriagePath>)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT status, classification FROM items WHERE sender LIKE '%@' || ?1 AND status != 'new'",
        )?;
        let rows = stmt
            .query_map(params![domain], row_to_outcome)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn decisions_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM items WHERE classification IS NOT NULL")?;
        let items = stmt
            .query_map([], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // Timestamp comparison happens on parsed values, not JSON strings
        Ok(items
            .into_iter()
            .filter(|item| {
                item.classification
                    .as_ref()
                    .map(|c| c.classified_at >= cutoff)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn insert_rule(&self, rule: &Rule) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO rules (
                id, name, kind, trigger, action, guidance, status, source,
                match_count, last_matched_at, version, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                rule.id.to_string(),
                rule.name,
                enum_to_str(&rule.kind)?,
                Self::opt_json_column(&rule.trigger)?,
                Self::opt_json_column(&rule.action)?,
                rule.guidance,
                enum_to_str(&rule.status)?,
                enum_to_str(&rule.source)?,
                rule.match_count as i64,
                rule.last_matched_at.map(rfc3339),
                rule.version as i64,
                rfc3339(rule.created_at),
                rfc3339(rule.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn update_rule(&self, rule: &Rule) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE rules SET
                name = ?1, kind = ?2, trigger = ?3, action = ?4, guidance = ?5,
                status = ?6, source = ?7, version = ?8, updated_at = ?9
            WHERE id = ?10
            "#,
            params![
                rule.name,
                enum_to_str(&rule.kind)?,
                Self::opt_json_column(&rule.trigger)?,
                Self::opt_json_column(&rule.action)?,
                rule.guidance,
                enum_to_str(&rule.status)?,
                enum_to_str(&rule.source)?,
                rule.version as i64,
                rfc3339(rule.updated_at),
                rule.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(ThemisError::RuleNotFound(rule.id.to_string()));
        }
        Ok(())
    }

    async fn get_rule(&self, id: RuleId) -> Result<Rule> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM rules WHERE id = ?1",
            params![id.to_string()],
            row_to_rule,
        )
        .optional()?
        .ok_or_else(|| ThemisError::RuleNotFound(id.to_string()))
    }

    async fn list_rules(&self, only_active: bool) -> Result<Vec<Rule>> {
        let conn = self.conn.lock().await;
        let sql = if only_active {
            "SELECT * FROM rules WHERE status = 'active' ORDER BY created_at ASC"
        } else {
            "SELECT * FROM rules ORDER BY created_at ASC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rules = stmt
            .query_map([], row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    async fn rule_name_exists(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rules WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn increment_rule_match(&self, id: RuleId) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            UPDATE rules
            SET match_count = match_count + 1, last_matched_at = ?1
            WHERE id = ?2
            "#,
            params![rfc3339(Utc::now()), id.to_string()],
        )?;
        Ok(())
    }

    async fn get_card(&self, id: CardId) -> Result<BatchCard> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM cards WHERE id = ?1",
            params![id.to_string()],
            row_to_card,
        )
        .optional()?
        .ok_or_else(|| ThemisError::CardNotFound(id.to_string()))
    }

    async fn get_or_create_pending_batch_card(
        &self,
        batch_type: &str,
        action: BatchAction,
        explanation: &str,
    ) -> Result<BatchCard> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                r#"
                SELECT * FROM cards
                WHERE pattern = 'batch' AND status = 'pending' AND batch_type = ?1
                "#,
                params![batch_type],
                row_to_card,
            )
            .optional()?;

        if let Some(card) = existing {
            tx.commit()?;
            return Ok(card);
        }

        let card = BatchCard::pending_batch(batch_type, action, explanation);
        tx.execute(
            r#"
            INSERT INTO cards (id, pattern, status, title, batch_type, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                card.id.to_string(),
                card_pattern_to_str(card.pattern),
                card_status_to_str(card.status),
                card.title,
                batch_type,
                Self::json_column(&card.data)?,
                rfc3339(card.created_at),
                rfc3339(card.updated_at),
            ],
        )?;
        tx.commit()?;

        debug!("Created pending batch card for '{}'", batch_type);
        Ok(card)
    }

    async fn insert_card(&self, card: &BatchCard) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO cards (id, pattern, status, title, batch_type, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                card.id.to_string(),
                card_pattern_to_str(card.pattern),
                card_status_to_str(card.status),
                card.title,
                card.data.batch_type,
                Self::json_column(&card.data)?,
                rfc3339(card.created_at),
                rfc3339(card.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn update_card(&self, card: &BatchCard) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE cards SET
                pattern = ?1, status = ?2, title = ?3, batch_type = ?4,
                data = ?5, updated_at = ?6
            WHERE id = ?7
            "#,
            params![
                card_pattern_to_str(card.pattern),
                card_status_to_str(card.status),
                card.title,
                card.data.batch_type,
                Self::json_column(&card.data)?,
                rfc3339(Utc::now()),
                card.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(ThemisError::CardNotFound(card.id.to_string()));
        }
        Ok(())
    }

    async fn add_to_card_count(&self, id: CardId, delta: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE cards
            SET data = json_set(data, '$.item_count',
                    COALESCE(json_extract(data, '$.item_count'), 0) + ?1),
                updated_at = ?2
            WHERE id = ?3
            "#,
            params![delta as i64, rfc3339(Utc::now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(ThemisError::CardNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn log_audit(
        &self,
        operation: &str,
        subject: Option<String>,
        details: serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audit_log (operation, subject, details, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                operation,
                subject,
                serde_json::to_string(&details)?,
                rfc3339(Utc::now())
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, RuleSource, RuleTrigger, Tier};

    fn test_item(sender: &str, subject: &str) -> Item {
        let now = Utc::now();
        Item {
            id: ItemId::new(),
            external_id: "ext-1".to_string(),
            connector: "gmail".to_string(),
            sender: sender.to_string(),
            display_name: String::new(),
            subject: subject.to_string(),
            content: "body".to_string(),
            status: ItemStatus::New,
            priority: Priority::Normal,
            tags: vec!["inbox".to_string()],
            enrichment: None,
            classification: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn classified(batch_type: Option<&str>) -> Classification {
        Classification {
            tier: Tier::Rule,
            batch_type: batch_type.map(|s| s.to_string()),
            confidence: 1.0,
            reason: "matched rule 'newsletters'".to_string(),
            rule_id: None,
            batch_card_id: None,
            triage_path: None,
            classified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_item_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();

        let item = test_item("alice@example.com", "hello");
        store.insert_item(&item).await.unwrap();

        let loaded = store.get_item(item.id).await.unwrap();
        assert_eq!(loaded.sender, "alice@example.com");
        assert_eq!(loaded.tags, vec!["inbox"]);
        assert!(loaded.classification.is_none());

        store
            .update_item_status(item.id, ItemStatus::Archived)
            .await
            .unwrap();
        let loaded = store.get_item(item.id).await.unwrap();
        assert_eq!(loaded.status, ItemStatus::Archived);
    }

    #[tokio::test]
    async fn test_classification_roundtrip_and_queries() {
        let store = SqliteStore::open_in_memory().unwrap();

        let a = test_item("news@letters.io", "Weekly digest");
        let b = test_item("human@example.com", "Lunch?");
        store.insert_item(&a).await.unwrap();
        store.insert_item(&b).await.unwrap();

        assert_eq!(store.unclassified_items(10).await.unwrap().len(), 2);

        store
            .set_classification(a.id, &classified(Some("newsletters")))
            .await
            .unwrap();
        store
            .set_classification(b.id, &classified(None))
            .await
            .unwrap();

        assert_eq!(store.unclassified_items(10).await.unwrap().len(), 0);
        let individual = store.individually_classified_items(10).await.unwrap();
        assert_eq!(individual.len(), 1);
        assert_eq!(individual[0].id, b.id);

        let unassigned = store.unassigned_classified_items().await.unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].id, a.id);
    }

    #[tokio::test]
    async fn test_assign_card_does_not_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();

        let item = test_item("news@letters.io", "digest");
        store.insert_item(&item).await.unwrap();
        store
            .set_classification(item.id, &classified(Some("newsletters")))
            .await
            .unwrap();

        let first = CardId::new();
        let second = CardId::new();
        store.assign_card(item.id, first).await.unwrap();
        store.assign_card(item.id, second).await.unwrap();

        let loaded = store.get_item(item.id).await.unwrap();
        assert_eq!(
            loaded.classification.unwrap().batch_card_id,
            Some(first),
            "batch_card_id must never be overwritten once set"
        );
    }

    #[tokio::test]
    async fn test_pending_card_get_or_create_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store
            .get_or_create_pending_batch_card("newsletters", BatchAction::Archive, "weekly digests")
            .await
            .unwrap();
        let second = store
            .get_or_create_pending_batch_card("newsletters", BatchAction::Archive, "weekly digests")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        // Confirming the card makes room for a fresh pending card
        let mut confirmed = first.clone();
        confirmed.status = CardStatus::Confirmed;
        store.update_card(&confirmed).await.unwrap();

        let third = store
            .get_or_create_pending_batch_card("newsletters", BatchAction::Archive, "weekly digests")
            .await
            .unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_card_count_accumulates() {
        let store = SqliteStore::open_in_memory().unwrap();

        let card = store
            .get_or_create_pending_batch_card("notifications", BatchAction::Archive, "CI noise")
            .await
            .unwrap();
        store.add_to_card_count(card.id, 2).await.unwrap();
        store.add_to_card_count(card.id, 1).await.unwrap();

        let loaded = store.get_card(card.id).await.unwrap();
        assert_eq!(loaded.data.item_count, 3);
    }

    #[tokio::test]
    async fn test_rule_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();

        let rule = Rule::structured(
            "newsletters by domain",
            RuleTrigger {
                sender_domain: Some("letters.io".to_string()),
                ..Default::default()
            },
            "newsletters",
            RuleSource::Seed,
        );
        store.insert_rule(&rule).await.unwrap();

        assert!(store
            .rule_name_exists("newsletters by domain")
            .await
            .unwrap());
        assert!(!store.rule_name_exists("missing").await.unwrap());

        let loaded = store.get_rule(rule.id).await.unwrap();
        assert_eq!(loaded.name, rule.name);
        assert_eq!(
            loaded.trigger.unwrap().sender_domain.as_deref(),
            Some("letters.io")
        );

        store.increment_rule_match(rule.id).await.unwrap();
        store.increment_rule_match(rule.id).await.unwrap();
        let loaded = store.get_rule(rule.id).await.unwrap();
        assert_eq!(loaded.match_count, 2);
        assert!(loaded.last_matched_at.is_some());
    }

    #[tokio::test]
    async fn test_resolved_outcomes_by_sender_and_domain() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut resolved = test_item("news@letters.io", "digest");
        resolved.status = ItemStatus::Archived;
        let mut c = classified(Some("newsletters"));
        c.triage_path = Some(TriagePath::Bulk);
        resolved.classification = Some(c);
        store.insert_item(&resolved).await.unwrap();

        let unresolved = test_item("news@letters.io", "digest 2");
        store.insert_item(&unresolved).await.unwrap();

        let sender = store
            .resolved_outcomes_for_sender("news@letters.io")
            .await
            .unwrap();
        assert_eq!(sender.len(), 1);
        assert_eq!(sender[0].1, Some(TriagePath::Bulk));

        let domain = store
            .resolved_outcomes_for_domain("letters.io")
            .await
            .unwrap();
        assert_eq!(domain.len(), 1);

        let other = store
            .resolved_outcomes_for_domain("example.com")
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_merge_enrichment_preserves_fields() {
        let store = SqliteStore::open_in_memory().unwrap();

        let item = test_item("a@b.c", "s");
        store.insert_item(&item).await.unwrap();

        store
            .merge_enrichment(
                item.id,
                &Enrichment {
                    summary: Some("first".to_string()),
                    priority: Some(Priority::High),
                    tags: vec!["x".to_string()],
                },
            )
            .await
            .unwrap();
        store
            .merge_enrichment(
                item.id,
                &Enrichment {
                    summary: None,
                    priority: None,
                    tags: vec!["y".to_string()],
                },
            )
            .await
            .unwrap();

        let loaded = store.get_item(item.id).await.unwrap();
        let enrichment = loaded.enrichment.unwrap();
        assert_eq!(enrichment.summary.as_deref(), Some("first"));
        assert_eq!(enrichment.priority, Some(Priority::High));
        assert_eq!(enrichment.tags, vec!["x", "y"]);
    }
}
