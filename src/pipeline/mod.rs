//! Tiered classification pipeline
//!
//! Each unclassified item walks an explicit ordered list of tier handlers:
//! connector override, deterministic rules, fast local model, full-context
//! cloud model. Every handler either accepts with a classification or
//! passes; the first acceptance wins, and total failure degrades to a safe
//! fallback record. `classify` never errors - a `batch_type` of None (keep
//! for individual review) is always a valid outcome.

pub mod parse;
pub mod prompt;

use crate::config::PipelineConfig;
use crate::history::DecisionHistoryAggregator;
use crate::rules::{matcher, RuleStore};
use crate::services::{ClassifyContext, CloudModel, ContextProvider, LocalModel};
use crate::storage::TriageStore;
use crate::types::{Classification, Enrichment, Item, Rule, RuleAction, Tier};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The fixed tier order. Adding or removing a tier is an edit here plus a
/// handler arm, not a refactor of nested branching.
const TIER_ORDER: &[TierStage] = &[
    TierStage::ConnectorOverride,
    TierStage::RuleMatch,
    TierStage::FastModel,
    TierStage::CloudModel,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierStage {
    ConnectorOverride,
    RuleMatch,
    FastModel,
    CloudModel,
}

/// What a tier handler produced
enum TierOutcome {
    Accept(ClassificationResult),
    Pass,
}

/// Classification plus any enrichment the deciding tier produced
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub enrichment: Option<Enrichment>,
}

impl ClassificationResult {
    fn bare(classification: Classification) -> Self {
        Self {
            classification,
            enrichment: None,
        }
    }
}

/// Aggregate counts for one classification pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassReport {
    /// Items successfully classified
    pub classified: usize,

    /// Per-tier breakdown of classifications
    pub by_tier: BTreeMap<Tier, usize>,

    /// Items whose persistence failed (classification itself never fails)
    pub errors: usize,
}

/// Aggregate counts for one rule-only reclassification pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReclassifyReport {
    /// Individually-classified items re-checked against the rule set
    pub reexamined: usize,

    /// Items a current rule now catches
    pub rematched: usize,

    /// Per-item persistence failures
    pub errors: usize,
}

/// The tiered classification pipeline
pub struct ClassificationPipeline {
    store: Arc<dyn TriageStore>,
    rules: Arc<RuleStore>,
    history: DecisionHistoryAggregator,
    local: Option<Arc<dyn LocalModel>>,
    cloud: Arc<dyn CloudModel>,
    context: Arc<dyn ContextProvider>,
    settings: PipelineConfig,
}

impl ClassificationPipeline {
    pub fn new(
        store: Arc<dyn TriageStore>,
        rules: Arc<RuleStore>,
        local: Option<Arc<dyn LocalModel>>,
        cloud: Arc<dyn CloudModel>,
        context: Arc<dyn ContextProvider>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            history: DecisionHistoryAggregator::new(store.clone()),
            store,
            rules,
            local,
            cloud,
            context,
            settings,
        }
    }

    /// Classify one item against the active rule set. Never errors: total
    /// failure returns the safe fallback record (individual review,
    /// confidence 0).
    pub async fn classify(&self, item: &Item, active_rules: &[Rule]) -> ClassificationResult {
        for stage in TIER_ORDER {
            let outcome = match stage {
                TierStage::ConnectorOverride => self.connector_override(item),
                TierStage::RuleMatch => self.rule_tier(item, active_rules),
                TierStage::FastModel => self.fast_tier(item).await,
                TierStage::CloudModel => self.cloud_tier(item).await,
            };
            if let TierOutcome::Accept(result) = outcome {
                return result;
            }
        }

        debug!("All tiers passed for item {}; using fallback", item.id);
        ClassificationResult::bare(Classification::fallback())
    }

    /// Meeting-record connectors are always individual; no model call
    fn connector_override(&self, item: &Item) -> TierOutcome {
        if !self
            .settings
            .individual_connectors
            .contains(&item.connector)
        {
            return TierOutcome::Pass;
        }

        TierOutcome::Accept(ClassificationResult::bare(Classification {
            tier: Tier::Rule,
            batch_type: None,
            confidence: 1.0,
            reason: format!("{} items are always reviewed individually", item.connector),
            rule_id: None,
            batch_card_id: None,
            triage_path: None,
            classified_at: Utc::now(),
        }))
    }

    /// First matching active structured rule wins
    fn rule_tier(&self, item: &Item, active_rules: &[Rule]) -> TierOutcome {
        for rule in active_rules {
            if !matcher::matches(rule, item) {
                continue;
            }

            // Bookkeeping is detached from the classification path
            self.rules.record_match(rule.id);

            let batch_type = rule.action.as_ref().map(|action| match action {
                RuleAction::Batch { batch_type } => batch_type.clone(),
            });

            return TierOutcome::Accept(ClassificationResult::bare(Classification {
                tier: Tier::Rule,
                batch_type,
                confidence: 1.0,
                reason: format!("matched rule '{}'", rule.name),
                rule_id: Some(rule.id),
                batch_card_id: None,
                triage_path: None,
                classified_at: Utc::now(),
            }));
        }
        TierOutcome::Pass
    }

    /// Cheap local model, consulted only for automated-looking items and
    /// accepted only above the confidence threshold
    async fn fast_tier(&self, item: &Item) -> TierOutcome {
        let Some(local) = &self.local else {
            return TierOutcome::Pass;
        };

        // Real-person correspondence skips the small model entirely
        if !self.looks_automated(item) {
            return TierOutcome::Pass;
        }

        let guidance = self.rules.guidance_texts().await.unwrap_or_default();

        let raw = match local.classify(item, &guidance).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return TierOutcome::Pass,
            Err(e) => {
                warn!("Fast tier call failed for item {}: {}", item.id, e);
                return TierOutcome::Pass;
            }
        };

        let Some(parsed) = parse::parse_classification(&raw) else {
            debug!("Fast tier output unparseable for item {}", item.id);
            return TierOutcome::Pass;
        };

        if parsed.confidence < self.settings.fast_confidence_threshold {
            debug!(
                "Fast tier confidence {:.2} below threshold for item {}",
                parsed.confidence, item.id
            );
            return TierOutcome::Pass;
        }

        TierOutcome::Accept(result_from_parsed(parsed, Tier::Fast))
    }

    /// Full-context cloud model. Terminal: any parsed result is accepted
    /// regardless of confidence; failure passes through to the fallback.
    async fn cloud_tier(&self, item: &Item) -> TierOutcome {
        let history = match self.history.history(&item.sender).await {
            Ok(summary) => summary.render(),
            Err(e) => {
                warn!("Decision history unavailable for {}: {}", item.sender, e);
                "No prior history for this sender.".to_string()
            }
        };

        let context = ClassifyContext {
            history,
            guidance: self.rules.guidance_texts().await.unwrap_or_default(),
            memory: self.context.context_for(&item.sender).await,
        };

        let raw = match self.cloud.classify(item, &context).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return TierOutcome::Pass,
            Err(e) => {
                warn!("Cloud tier call failed for item {}: {}", item.id, e);
                return TierOutcome::Pass;
            }
        };

        match parse::parse_classification(&raw) {
            Some(parsed) => TierOutcome::Accept(result_from_parsed(parsed, Tier::Cloud)),
            None => {
                warn!("Cloud tier output unparseable for item {}", item.id);
                TierOutcome::Pass
            }
        }
    }

    /// Sender-pattern pre-filter for the fast tier
    fn looks_automated(&self, item: &Item) -> bool {
        if self.settings.automated_connectors.contains(&item.connector) {
            return true;
        }
        let sender = item.sender.to_lowercase();
        self.settings
            .automated_sender_markers
            .iter()
            .any(|marker| sender.contains(&marker.to_lowercase()))
    }

    /// Classify every unclassified item, independently. Per-item failures
    /// are logged and counted; the pass always completes.
    pub async fn run_batch_pass(&self, batch_size: usize) -> crate::error::Result<PassReport> {
        let items = self.store.unclassified_items(batch_size).await?;
        let active_rules = self.rules.list_active().await?;

        let mut report = PassReport::default();
        for item in items {
            let result = self.classify(&item, &active_rules).await;

            match self
                .store
                .set_classification(item.id, &result.classification)
                .await
            {
                Ok(()) => {
                    report.classified += 1;
                    *report.by_tier.entry(result.classification.tier).or_insert(0) += 1;
                }
                Err(e) => {
                    warn!("Failed to persist classification for {}: {}", item.id, e);
                    report.errors += 1;
                    continue;
                }
            }

            if let Some(enrichment) = &result.enrichment {
                // Enrichment is advisory; losing it never fails the item
                if let Err(e) = self.store.merge_enrichment(item.id, enrichment).await {
                    debug!("Enrichment merge dropped for {}: {}", item.id, e);
                }
            }
        }

        info!(
            "Classification pass complete: {} classified, {} errors",
            report.classified, report.errors
        );
        Ok(report)
    }

    /// Rule-only re-check of items previously kept for individual review,
    /// so newly authored rules retroactively catch them. Items the user
    /// explicitly declassified are never re-matched. Idempotent.
    pub async fn reclassify_pass(&self, batch_size: usize) -> crate::error::Result<ReclassifyReport> {
        let items = self.store.individually_classified_items(batch_size).await?;
        let active_rules = self.rules.list_active().await?;

        let mut report = ReclassifyReport::default();
        for item in items {
            let Some(existing) = &item.classification else {
                continue;
            };
            if existing.is_declassified() {
                continue;
            }
            report.reexamined += 1;

            for rule in &active_rules {
                if !matcher::matches(rule, &item) {
                    continue;
                }

                let Some(RuleAction::Batch { batch_type }) = &rule.action else {
                    // A matching rule without a batch action changes nothing
                    break;
                };

                let classification = Classification {
                    tier: Tier::Rule,
                    batch_type: Some(batch_type.clone()),
                    confidence: 1.0,
                    reason: format!("matched rule '{}'", rule.name),
                    rule_id: Some(rule.id),
                    batch_card_id: None,
                    triage_path: None,
                    classified_at: Utc::now(),
                };

                match self.store.set_classification(item.id, &classification).await {
                    Ok(()) => {
                        self.rules.record_match(rule.id);
                        report.rematched += 1;
                    }
                    Err(e) => {
                        warn!("Failed to persist reclassification for {}: {}", item.id, e);
                        report.errors += 1;
                    }
                }
                break;
            }
        }

        info!(
            "Reclassification pass complete: {} reexamined, {} rematched",
            report.reexamined, report.rematched
        );
        Ok(report)
    }
}

fn result_from_parsed(parsed: parse::ParsedClassification, tier: Tier) -> ClassificationResult {
    let enrichment = Enrichment {
        summary: parsed.summary,
        priority: parsed.priority,
        tags: parsed.tags,
    };

    ClassificationResult {
        classification: Classification {
            tier,
            batch_type: parsed.batch_type,
            confidence: parsed.confidence,
            reason: parsed.reason,
            rule_id: None,
            batch_card_id: None,
            triage_path: None,
            classified_at: Utc::now(),
        },
        enrichment: if enrichment.is_empty() {
            None
        } else {
            Some(enrichment)
        },
    }
}
