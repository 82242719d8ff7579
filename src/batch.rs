//! Batch card assignment and resolution
//!
//! The assigner sweeps classified-but-unassigned items into the single
//! pending card for their batch type; the resolver applies one human
//! decision over a whole card, archiving accepted items and returning
//! rejected ones to individual review. Both are safe to re-run and both
//! isolate per-item failures.

use crate::error::{Result, ThemisError};
use crate::storage::TriageStore;
use crate::types::{
    BatchAction, CardId, CardResolution, CardStatus, Classification, Item, ItemId, TriagePath,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregate counts for one assignment pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignReport {
    /// Items stamped with a card
    pub assigned: usize,

    /// Per-batch-type breakdown
    pub per_type: BTreeMap<String, usize>,

    /// Per-item failures
    pub errors: usize,
}

/// Outcome of one card resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveReport {
    pub accepted: usize,
    pub rejected: usize,
    pub errors: usize,
}

/// Groups classified items into pending batch cards
pub struct BatchAssigner {
    store: Arc<dyn TriageStore>,
}

impl BatchAssigner {
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self { store }
    }

    /// Sweep items with a batch type but no card into the pending card for
    /// their type. Re-running only touches still-unassigned items, and the
    /// atomic get-or-create never yields a second pending card per type.
    pub async fn assign(&self) -> Result<AssignReport> {
        let items = self.store.unassigned_classified_items().await?;

        let mut groups: BTreeMap<String, Vec<Item>> = BTreeMap::new();
        for item in items {
            let Some(batch_type) = item
                .classification
                .as_ref()
                .and_then(|c| c.batch_type.clone())
            else {
                continue;
            };
            groups.entry(batch_type).or_default().push(item);
        }

        let mut report = AssignReport::default();
        for (batch_type, group) in groups {
            let card = match self
                .store
                .get_or_create_pending_batch_card(
                    &batch_type,
                    BatchAction::Archive,
                    &format!("Items classified as {}", batch_type),
                )
                .await
            {
                Ok(card) => card,
                Err(e) => {
                    warn!("Could not get pending card for '{}': {}", batch_type, e);
                    report.errors += group.len();
                    continue;
                }
            };

            let mut stamped = 0usize;
            for item in &group {
                match self.store.assign_card(item.id, card.id).await {
                    Ok(()) => stamped += 1,
                    Err(e) => {
                        warn!("Failed to stamp item {} onto card {}: {}", item.id, card.id, e);
                        report.errors += 1;
                    }
                }
            }

            if stamped > 0 {
                if let Err(e) = self.store.add_to_card_count(card.id, stamped as u64).await {
                    warn!("Failed to bump count on card {}: {}", card.id, e);
                }
                report.assigned += stamped;
                *report.per_type.entry(batch_type.clone()).or_insert(0) += stamped;
            }
        }

        info!(
            "Assignment pass complete: {} assigned across {} types",
            report.assigned,
            report.per_type.len()
        );
        Ok(report)
    }
}

/// Applies a user's bulk decision over a batch card
pub struct BatchResolver {
    store: Arc<dyn TriageStore>,
}

impl BatchResolver {
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self { store }
    }

    /// Execute the card's configured action on accepted items and return
    /// rejected items to individual review. One item's failure never stops
    /// the rest; the card is confirmed with an audit payload at the end.
    pub async fn resolve(
        &self,
        card_id: CardId,
        accepted: &[ItemId],
        rejected: &[ItemId],
    ) -> Result<ResolveReport> {
        let mut card = self.store.get_card(card_id).await?;
        if card.status == CardStatus::Confirmed {
            return Err(ThemisError::InvalidOperation(format!(
                "card {} is already confirmed",
                card_id
            )));
        }

        let action = card.data.action.unwrap_or(BatchAction::Archive);
        let batch_type = card
            .data
            .batch_type
            .clone()
            .unwrap_or_else(|| "batch".to_string());

        let mut report = ResolveReport::default();

        for id in accepted {
            match self.accept_item(*id, action).await {
                Ok(()) => report.accepted += 1,
                Err(e) => {
                    warn!("Failed to resolve accepted item {}: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        for id in rejected {
            match self
                .store
                .set_classification(*id, &Classification::declassified(&batch_type))
                .await
            {
                Ok(()) => {
                    debug!("Item {} returned to individual review", id);
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!("Failed to declassify rejected item {}: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        card.status = CardStatus::Confirmed;
        card.data.resolution = Some(CardResolution {
            accepted: report.accepted as u64,
            rejected: report.rejected as u64,
            action,
            resolved_at: Utc::now(),
        });
        card.updated_at = Utc::now();
        self.store.update_card(&card).await?;

        // Best-effort audit trail; resolution already happened
        if let Err(e) = self
            .store
            .log_audit(
                "resolve_batch",
                Some(card_id.to_string()),
                serde_json::json!({
                    "batch_type": batch_type,
                    "accepted": report.accepted,
                    "rejected": report.rejected,
                    "errors": report.errors,
                }),
            )
            .await
        {
            debug!("Audit entry for card {} dropped: {}", card_id, e);
        }

        info!(
            "Resolved card {}: {} accepted, {} rejected, {} errors",
            card_id, report.accepted, report.rejected, report.errors
        );
        Ok(report)
    }

    /// Apply the bulk action and record the bulk triage path on the item
    async fn accept_item(&self, id: ItemId, action: BatchAction) -> Result<()> {
        let item = self.store.get_item(id).await?;
        if let Some(mut classification) = item.classification {
            classification.triage_path = Some(TriagePath::Bulk);
            self.store.set_classification(id, &classification).await?;
        }
        self.store
            .update_item_status(id, action.target_status())
            .await
    }
}
