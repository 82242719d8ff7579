//! Storage layer for the Themis triage engine
//!
//! Provides the persistence abstraction used by the pipeline, batch layer,
//! and learning loop, plus the SQLite implementation and an in-memory
//! backend for tests.

pub mod sqlite;
pub mod test_utils;

use crate::error::Result;
use crate::types::{
    BatchAction, BatchCard, CardId, Classification, Enrichment, Item, ItemId, ItemStatus, Rule,
    RuleId, TriagePath,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage backend trait defining all required operations
#[async_trait]
pub trait TriageStore: Send + Sync {
    // === Items ===

    /// Persist a new item
    async fn insert_item(&self, item: &Item) -> Result<()>;

    /// Retrieve an item by ID
    async fn get_item(&self, id: ItemId) -> Result<Item>;

    /// Transition an item's lifecycle status
    async fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()>;

    /// Write an item's classification record (replaces any existing record)
    async fn set_classification(&self, id: ItemId, classification: &Classification) -> Result<()>;

    /// Merge enrichment into an item without dropping already-set fields
    async fn merge_enrichment(&self, id: ItemId, enrichment: &Enrichment) -> Result<()>;

    /// Items awaiting a first classification, oldest first
    async fn unclassified_items(&self, limit: usize) -> Result<Vec<Item>>;

    /// Items classified for individual review (`batch_type` empty), used by
    /// the rule-only reclassification pass
    async fn individually_classified_items(&self, limit: usize) -> Result<Vec<Item>>;

    /// Items carrying a batch type but not yet assigned to a card
    async fn unassigned_classified_items(&self) -> Result<Vec<Item>>;

    /// Stamp an item with its batch card. Leaves the item untouched when a
    /// card is already set; the linkage is only cleared by declassification.
    async fn assign_card(&self, item_id: ItemId, card_id: CardId) -> Result<()>;

    /// Resolved outcomes (status, recorded path) for one exact sender
    async fn resolved_outcomes_for_sender(
        &self,
        sender: &str,
    ) -> Result<Vec<(ItemStatus, Option<TriagePath>)>>;

    /// Resolved outcomes for every sender of a domain
    async fn resolved_outcomes_for_domain(
        &self,
        domain: &str,
    ) -> Result<Vec<(ItemStatus, Option<TriagePath>)>>;

    /// Items whose classification was recorded at or after the cutoff,
    /// for learning-loop mining
    async fn decisions_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item>>;

    // === Rules ===

    /// Persist a new rule
    async fn insert_rule(&self, rule: &Rule) -> Result<()>;

    /// Overwrite an existing rule
    async fn update_rule(&self, rule: &Rule) -> Result<()>;

    /// Retrieve a rule by ID
    async fn get_rule(&self, id: RuleId) -> Result<Rule>;

    /// List rules, optionally only active ones
    async fn list_rules(&self, only_active: bool) -> Result<Vec<Rule>>;

    /// Whether a rule with this name already exists (any status)
    async fn rule_name_exists(&self, name: &str) -> Result<bool>;

    /// Bump a rule's match count and last-matched timestamp
    async fn increment_rule_match(&self, id: RuleId) -> Result<()>;

    // === Batch cards ===

    /// Retrieve a card by ID
    async fn get_card(&self, id: CardId) -> Result<BatchCard>;

    /// Atomically fetch the single pending batch card for a batch type,
    /// creating it when absent. Never produces a second pending card for
    /// the same type.
    async fn get_or_create_pending_batch_card(
        &self,
        batch_type: &str,
        action: BatchAction,
        explanation: &str,
    ) -> Result<BatchCard>;

    /// Persist a new card
    async fn insert_card(&self, card: &BatchCard) -> Result<()>;

    /// Overwrite an existing card
    async fn update_card(&self, card: &BatchCard) -> Result<()>;

    /// Add to a card's running item count
    async fn add_to_card_count(&self, id: CardId, delta: u64) -> Result<()>;

    // === Audit ===

    /// Append an audit entry. Callers treat this as best-effort.
    async fn log_audit(
        &self,
        operation: &str,
        subject: Option<String>,
        details: serde_json::Value,
    ) -> Result<()>;
}
