//! In-memory storage backend for tests
//!
//! Implements the full [`TriageStore`] trait over plain maps so unit and
//! integration tests can exercise the pipeline, batch layer, and learning
//! loop without touching disk. Also carries a couple of item builders used
//! across test modules.

use crate::error::{Result, ThemisError};
use crate::storage::TriageStore;
use crate::types::{
    BatchAction, BatchCard, CardId, CardPattern, CardStatus, Classification, Enrichment, Item,
    ItemId, ItemStatus, Priority, Rule, RuleId, TriagePath,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory triage store
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<ItemId, Item>>,
    rules: Mutex<HashMap<RuleId, Rule>>,
    cards: Mutex<HashMap<CardId, BatchCard>>,
    audit: Mutex<Vec<(String, Option<String>, serde_json::Value)>>,

    /// When non-zero, the next N match-count increments fail (for testing
    /// that best-effort bookkeeping never affects primary outcomes)
    fail_match_increments: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` match-count increments return an error
    pub fn fail_next_match_increments(&self, n: usize) {
        self.fail_match_increments.store(n, Ordering::SeqCst);
    }

    /// Recorded audit entries (operation, subject, details)
    pub fn audit_entries(&self) -> Vec<(String, Option<String>, serde_json::Value)> {
        self.audit.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriageStore for MemoryStore {
    async fn insert_item(&self, item: &Item) -> Result<()> {
        self.items.lock().unwrap().insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.items
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ThemisError::ItemNotFound(id.to_string()))
    }

    async fn update_item_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(&id)
            .ok_or_else(|| ThemisError::ItemNotFound(id.to_string()))?;
        item.status = status;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn set_classification(&self, id: ItemId, classification: &Classification) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(&id)
            .ok_or_else(|| ThemisError::ItemNotFound(id.to_string()))?;
        item.classification = Some(classification.clone());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_enrichment(&self, id: ItemId, enrichment: &Enrichment) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(&id)
            .ok_or_else(|| ThemisError::ItemNotFound(id.to_string()))?;
        item.merge_enrichment(enrichment);
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn unclassified_items(&self, limit: usize) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        let mut found: Vec<Item> = items
            .values()
            .filter(|i| i.classification.is_none() && i.status == ItemStatus::New)
            .cloned()
            .collect();
        found.sort_by_key(|i| i.created_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn individually_classified_items(&self, limit: usize) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        let mut found: Vec<Item> = items
            .values()
            .filter(|i| {
                i.status == ItemStatus::New
                    && i.classification
                        .as_ref()
                        .map(|c| c.batch_type.is_none())
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort_by_key(|i| i.created_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn unassigned_classified_items(&self) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        let mut found: Vec<Item> = items
            .values()
            .filter(|i| {
                i.status == ItemStatus::New
                    && i.classification
                        .as_ref()
                        .map(|c| c.batch_type.is_some() && c.batch_card_id.is_none())
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort_by_key(|i| i.created_at);
        Ok(found)
    }

    async fn assign_card(&self, item_id: ItemId, card_id: CardId) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        if let Some(item) = items.get_mut(&item_id) {
            if let Some(classification) = &mut item.classification {
                if classification.batch_card_id.is_none() {
                    classification.batch_card_id = Some(card_id);
                    item.updated_at = Utc::now();
                }
            }
        }
        Ok(())
    }

    async fn resolved_outcomes_for_sender(
        &self,
        sender: &str,
    ) -> Result<Vec<(ItemStatus, Option<TriagePath>)>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .values()
            .filter(|i| i.sender == sender && i.status.is_resolved())
            .map(|i| {
                (
                    i.status,
                    i.classification.as_ref().and_then(|c| c.triage_path),
                )
            })
            .collect())
    }

    async fn resolved_outcomes_for_domain(
        &self,
        domain: &str,
    ) -> Result<Vec<(ItemStatus, Option<TriagePath>)>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .values()
            .filter(|i| i.sender_domain() == Some(domain) && i.status.is_resolved())
            .map(|i| {
                (
                    i.status,
                    i.classification.as_ref().and_then(|c| c.triage_path),
                )
            })
            .collect())
    }

    async fn decisions_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .values()
            .filter(|i| {
                i.classification
                    .as_ref()
                    .map(|c| c.classified_at >= cutoff)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: &Rule) -> Result<()> {
        self.rules.lock().unwrap().insert(rule.id, rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &Rule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        if !rules.contains_key(&rule.id) {
            return Err(ThemisError::RuleNotFound(rule.id.to_string()));
        }
        rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: RuleId) -> Result<Rule> {
        self.rules
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ThemisError::RuleNotFound(id.to_string()))
    }

    async fn list_rules(&self, only_active: bool) -> Result<Vec<Rule>> {
        let rules = self.rules.lock().unwrap();
        let mut found: Vec<Rule> = rules
            .values()
            .filter(|r| !only_active || r.status == crate::types::RuleStatus::Active)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn rule_name_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .values()
            .any(|r| r.name == name))
    }

    async fn increment_rule_match(&self, id: RuleId) -> Result<()> {
        let pending = self.fail_match_increments.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_match_increments.store(pending - 1, Ordering::SeqCst);
            return Err(ThemisError::Other("injected increment failure".to_string()));
        }

        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .get_mut(&id)
            .ok_or_else(|| ThemisError::RuleNotFound(id.to_string()))?;
        rule.match_count += 1;
        rule.last_matched_at = Some(Utc::now());
        Ok(())
    }

    async fn get_card(&self, id: CardId) -> Result<BatchCard> {
        self.cards
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ThemisError::CardNotFound(id.to_string()))
    }

    async fn get_or_create_pending_batch_card(
        &self,
        batch_type: &str,
        action: BatchAction,
        explanation: &str,
    ) -> Result<BatchCard> {
        let mut cards = self.cards.lock().unwrap();
        let existing = cards.values().find(|c| {
            c.pattern == CardPattern::Batch
                && c.status == CardStatus::Pending
                && c.data.batch_type.as_deref() == Some(batch_type)
        });
        if let Some(card) = existing {
            return Ok(card.clone());
        }
        let card = BatchCard::pending_batch(batch_type, action, explanation);
        cards.insert(card.id, card.clone());
        Ok(card)
    }

    async fn insert_card(&self, card: &BatchCard) -> Result<()> {
        self.cards.lock().unwrap().insert(card.id, card.clone());
        Ok(())
    }

    async fn update_card(&self, card: &BatchCard) -> Result<()> {
        let mut cards = self.cards.lock().unwrap();
        if !cards.contains_key(&card.id) {
            return Err(ThemisError::CardNotFound(card.id.to_string()));
        }
        cards.insert(card.id, card.clone());
        Ok(())
    }

    async fn add_to_card_count(&self, id: CardId, delta: u64) -> Result<()> {
        let mut cards = self.cards.lock().unwrap();
        let card = cards
            .get_mut(&id)
            .ok_or_else(|| ThemisError::CardNotFound(id.to_string()))?;
        card.data.item_count += delta;
        card.updated_at = Utc::now();
        Ok(())
    }

    async fn log_audit(
        &self,
        operation: &str,
        subject: Option<String>,
        details: serde_json::Value,
    ) -> Result<()> {
        self.audit
            .lock()
            .unwrap()
            .push((operation.to_string(), subject, details));
        Ok(())
    }
}

/// Build a new unclassified item for tests
pub fn make_item(connector: &str, sender: &str, subject: &str, content: &str) -> Item {
    let now = Utc::now();
    Item {
        id: ItemId::new(),
        external_id: format!("ext-{}", ItemId::new()),
        connector: connector.to_string(),
        sender: sender.to_string(),
        display_name: String::new(),
        subject: subject.to_string(),
        content: content.to_string(),
        status: ItemStatus::New,
        priority: Priority::Normal,
        tags: vec![],
        enrichment: None,
        classification: None,
        created_at: now,
        updated_at: now,
    }
}

/// Build a resolved item with a recorded triage path, for history tests
pub fn make_resolved_item(
    sender: &str,
    status: ItemStatus,
    path: Option<TriagePath>,
) -> Item {
    let mut item = make_item("gmail", sender, "resolved", "resolved body");
    item.status = status;
    item.classification = Some(Classification {
        tier: crate::types::Tier::Cloud,
        batch_type: None,
        confidence: 0.8,
        reason: "test history".to_string(),
        rule_id: None,
        batch_card_id: None,
        triage_path: path,
        classified_at: Utc::now(),
    });
    item
}
