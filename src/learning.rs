//! Learning loop
//!
//! Mines the trailing window of triage decisions against the current rule
//! set and asks the cloud model to propose new or refined rules. Surviving
//! suggestions are packaged into a single pending learning card for human
//! review; a rule is never created or activated automatically. Garbled
//! model output discards the whole proposal batch.

use crate::config::LearningConfig;
use crate::error::Result;
use crate::pipeline::{parse, prompt};
use crate::services::CloudModel;
use crate::storage::TriageStore;
use crate::types::{BatchCard, CardData, CardId, CardPattern, CardStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one learning run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningReport {
    /// Suggestions that survived parsing and the confidence filter
    pub suggestion_count: usize,

    /// Pending learning card holding the suggestions, when any survived
    pub proposal_card_id: Option<CardId>,
}

/// Scheduled rule-mining job
pub struct LearningLoop {
    store: Arc<dyn TriageStore>,
    cloud: Arc<dyn CloudModel>,
    config: LearningConfig,
}

impl LearningLoop {
    pub fn new(
        store: Arc<dyn TriageStore>,
        cloud: Arc<dyn CloudModel>,
        config: LearningConfig,
    ) -> Self {
        Self {
            store,
            cloud,
            config,
        }
    }

    /// Run one learning pass over the trailing window.
    pub async fn run(&self) -> Result<LearningReport> {
        let window = chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let cutoff = Utc::now() - window;

        let decisions = self.store.decisions_since(cutoff).await?;
        if decisions.is_empty() {
            // Cost discipline: no decisions, no model call
            info!("Learning window empty; skipping model call");
            return Ok(LearningReport::default());
        }

        // Active and inactive rules both provide context, so the model
        // does not re-propose something the user already turned off
        let rules = self.store.list_rules(false).await?;

        let raw = match self
            .cloud
            .complete(&prompt::learning_prompt(&decisions, &rules))
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("Learning model returned nothing; discarding run");
                return Ok(LearningReport::default());
            }
            Err(e) => {
                warn!("Learning model call failed: {}", e);
                return Ok(LearningReport::default());
            }
        };

        // Whole-batch discard on unusable output; a partially corrupted
        // proposal set is worse than none
        let Some(suggestions) = parse::parse_suggestions(&raw) else {
            warn!("Learning output unparseable; discarding whole batch");
            return Ok(LearningReport::default());
        };

        let surviving: Vec<_> = suggestions
            .into_iter()
            .filter(|s| s.confidence >= self.config.min_confidence)
            .collect();

        if surviving.is_empty() {
            info!("No suggestions at or above confidence {}", self.config.min_confidence);
            return Ok(LearningReport::default());
        }

        let count = surviving.len();
        let now = Utc::now();
        let card = BatchCard {
            id: CardId::new(),
            pattern: CardPattern::Learning,
            status: CardStatus::Pending,
            title: format!("{} proposed triage rule changes", count),
            data: CardData {
                batch_type: None,
                action: None,
                item_count: count as u64,
                explanation: Some(format!(
                    "Mined from {} decisions in the last {} hours",
                    decisions.len(),
                    self.config.window.as_secs() / 3600,
                )),
                suggestions: Some(surviving),
                resolution: None,
            },
            created_at: now,
            updated_at: now,
        };
        self.store.insert_card(&card).await?;

        info!(
            "Learning run packaged {} suggestions into card {}",
            count, card.id
        );
        Ok(LearningReport {
            suggestion_count: count,
            proposal_card_id: Some(card.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ClassifyContext;
    use crate::storage::test_utils::{make_item, MemoryStore};
    use crate::types::{Classification, Item, Tier};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCloud {
        response: Option<String>,
        calls: AtomicUsize,
    }

    impl CountingCloud {
        fn new(response: Option<&str>) -> Self {
            Self {
                response: response.map(str::to_string),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CloudModel for CountingCloud {
        async fn classify(
            &self,
            _item: &Item,
            _context: &ClassifyContext,
        ) -> crate::error::Result<Option<String>> {
            Ok(None)
        }

        async fn complete(&self, _prompt: &str) -> crate::error::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    async fn seed_decision(store: &MemoryStore) {
        let item = make_item("gmail", "promo@vendor.io", "Sale", "20% off");
        store.insert_item(&item).await.unwrap();
        store
            .set_classification(
                item.id,
                &Classification {
                    tier: Tier::Cloud,
                    batch_type: Some("promotions".to_string()),
                    confidence: 0.8,
                    reason: "promotional".to_string(),
                    rule_id: None,
                    batch_card_id: None,
                    triage_path: None,
                    classified_at: Utc::now(),
                },
            )
            .await
            .unwrap();
    }

    const SUGGESTIONS: &str = r#"{"suggestions": [
        {"kind": "new_rule", "rule_kind": "structured", "name": "Batch vendor promos",
         "trigger": {"sender_domain": "vendor.io"}, "batch_type": "promotions",
         "confidence": 0.8, "rationale": "consistent bulk handling"},
        {"kind": "new_rule", "rule_kind": "guidance", "name": "Weak hunch",
         "guidance": "maybe batch these", "confidence": 0.3, "rationale": "thin evidence"}
    ]}"#;

    #[tokio::test]
    async fn test_empty_window_makes_no_model_call() {
        let store = Arc::new(MemoryStore::new());
        let cloud = Arc::new(CountingCloud::new(Some(SUGGESTIONS)));
        let learning = LearningLoop::new(store, cloud.clone(), LearningConfig::default());

        let report = learning.run().await.unwrap();
        assert_eq!(report.suggestion_count, 0);
        assert!(report.proposal_card_id.is_none());
        assert_eq!(cloud.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_suggestions_filtered_and_packaged() {
        let store = Arc::new(MemoryStore::new());
        seed_decision(&store).await;

        let cloud = Arc::new(CountingCloud::new(Some(SUGGESTIONS)));
        let learning = LearningLoop::new(store.clone(), cloud, LearningConfig::default());

        let report = learning.run().await.unwrap();
        // The 0.3-confidence suggestion fell below the 0.6 floor
        assert_eq!(report.suggestion_count, 1);

        let card = store
            .get_card(report.proposal_card_id.unwrap())
            .await
            .unwrap();
        assert_eq!(card.pattern, CardPattern::Learning);
        assert_eq!(card.status, CardStatus::Pending);
        let suggestions = card.data.suggestions.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].name, "Batch vendor promos");
    }

    #[tokio::test]
    async fn test_garbled_output_discards_whole_batch() {
        let store = Arc::new(MemoryStore::new());
        seed_decision(&store).await;

        let cloud = Arc::new(CountingCloud::new(Some("I have several thoughts...")));
        let learning = LearningLoop::new(store, cloud, LearningConfig::default());

        let report = learning.run().await.unwrap();
        assert_eq!(report.suggestion_count, 0);
        assert!(report.proposal_card_id.is_none());
    }

    #[tokio::test]
    async fn test_all_below_confidence_floor() {
        let store = Arc::new(MemoryStore::new());
        seed_decision(&store).await;

        let low = r#"{"suggestions": [{"kind": "new_rule", "rule_kind": "guidance",
            "name": "Hunch", "guidance": "g", "confidence": 0.5, "rationale": "r"}]}"#;
        let cloud = Arc::new(CountingCloud::new(Some(low)));
        let learning = LearningLoop::new(store, cloud, LearningConfig::default());

        let report = learning.run().await.unwrap();
        assert_eq!(report.suggestion_count, 0);
        assert!(report.proposal_card_id.is_none());
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_zero() {
        let store = Arc::new(MemoryStore::new());
        seed_decision(&store).await;

        let cloud = Arc::new(CountingCloud::new(None));
        let learning = LearningLoop::new(store, cloud, LearningConfig::default());

        let report = learning.run().await.unwrap();
        assert_eq!(report.suggestion_count, 0);
    }
}
