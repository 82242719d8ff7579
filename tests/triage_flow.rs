//! End-to-end triage flow
//!
//! Exercises the full decision path over the in-memory store: seeding,
//! classification pass, batch assignment, bulk resolution with rejection,
//! decision history, reclassification after rule authoring, and the
//! learning loop.

use async_trait::async_trait;
use std::sync::Arc;
use themis_core::batch::{BatchAssigner, BatchResolver};
use themis_core::config::{LearningConfig, PipelineConfig};
use themis_core::learning::LearningLoop;
use themis_core::pipeline::ClassificationPipeline;
use themis_core::rules::RuleStore;
use themis_core::services::{ClassifyContext, CloudModel, ContextProvider};
use themis_core::storage::test_utils::{make_item, MemoryStore};
use themis_core::storage::TriageStore;
use themis_core::types::{
    Item, ItemStatus, Rule, RuleSource, RuleTrigger, Tier, TriagePath,
};

/// Cloud model that always recommends individual review with middling
/// confidence, and emits one rule suggestion for learning runs
struct ScriptedCloud;

#[async_trait]
impl CloudModel for ScriptedCloud {
    async fn classify(
        &self,
        _item: &Item,
        _context: &ClassifyContext,
    ) -> themis_core::Result<Option<String>> {
        Ok(Some(
            r#"{"recommendation": "individual", "confidence": 0.55, "reason": "unclear sender intent"}"#
                .to_string(),
        ))
    }

    async fn complete(&self, _prompt: &str) -> themis_core::Result<Option<String>> {
        Ok(Some(
            r#"{"suggestions": [{"kind": "new_rule", "rule_kind": "structured",
                "name": "Batch vendor promotions",
                "trigger": {"sender_domain": "vendor.io"},
                "batch_type": "promotions",
                "confidence": 0.85,
                "rationale": "every vendor.io item was archived in bulk"}]}"#
                .to_string(),
        ))
    }
}

struct NoMemory;

#[async_trait]
impl ContextProvider for NoMemory {
    async fn context_for(&self, _sender: &str) -> String {
        String::new()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    rules: Arc<RuleStore>,
    pipeline: ClassificationPipeline,
    assigner: BatchAssigner,
    resolver: BatchResolver,
    learning: LearningLoop,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let rules = Arc::new(RuleStore::new(store.clone() as Arc<dyn TriageStore>));
    let cloud = Arc::new(ScriptedCloud);

    let pipeline = ClassificationPipeline::new(
        store.clone(),
        rules.clone(),
        None,
        cloud.clone(),
        Arc::new(NoMemory),
        PipelineConfig::default(),
    );
    let assigner = BatchAssigner::new(store.clone());
    let resolver = BatchResolver::new(store.clone());
    let learning = LearningLoop::new(store.clone(), cloud, LearningConfig::default());

    Harness {
        store,
        rules,
        pipeline,
        assigner,
        resolver,
        learning,
    }
}

#[tokio::test]
async fn full_triage_flow() {
    let h = harness();

    // Seeded defaults include a newsletter rule keyed on "unsubscribe"
    assert!(h.rules.seed_defaults().await.unwrap() > 0);

    let newsletter_a = make_item(
        "gmail",
        "news@letters.io",
        "Weekly digest",
        "Click here to unsubscribe",
    );
    let newsletter_b = make_item(
        "gmail",
        "promo@letters.io",
        "Monthly roundup",
        "Unsubscribe at any time",
    );
    let personal = make_item("gmail", "alice@example.com", "Lunch?", "Are you free?");
    let meeting = make_item("granola", "recorder@granola.ai", "Standup notes", "...");

    for item in [&newsletter_a, &newsletter_b, &personal, &meeting] {
        h.store.insert_item(item).await.unwrap();
    }

    // --- Classification pass ---
    let report = h.pipeline.run_batch_pass(100).await.unwrap();
    assert_eq!(report.classified, 4);
    assert_eq!(report.errors, 0);
    // Newsletters and the meeting override hit the rule tier; the personal
    // mail went to the cloud
    assert_eq!(report.by_tier.get(&Tier::Rule), Some(&3));
    assert_eq!(report.by_tier.get(&Tier::Cloud), Some(&1));

    let meeting_after = h.store.get_item(meeting.id).await.unwrap();
    let meeting_classification = meeting_after.classification.unwrap();
    assert!(meeting_classification.batch_type.is_none());
    assert_eq!(meeting_classification.confidence, 1.0);

    // Re-running changes nothing
    let rerun = h.pipeline.run_batch_pass(100).await.unwrap();
    assert_eq!(rerun.classified, 0);

    // --- Batch assignment ---
    let assign = h.assigner.assign().await.unwrap();
    assert_eq!(assign.assigned, 2);
    assert_eq!(assign.per_type.get("newsletters"), Some(&2));

    let card_id = h
        .store
        .get_item(newsletter_a.id)
        .await
        .unwrap()
        .classification
        .unwrap()
        .batch_card_id
        .unwrap();
    assert_eq!(h.store.get_card(card_id).await.unwrap().data.item_count, 2);

    // --- Bulk resolution: accept A, reject B ---
    let resolve = h
        .resolver
        .resolve(card_id, &[newsletter_a.id], &[newsletter_b.id])
        .await
        .unwrap();
    assert_eq!(resolve.accepted, 1);
    assert_eq!(resolve.rejected, 1);

    let a_after = h.store.get_item(newsletter_a.id).await.unwrap();
    assert_eq!(a_after.status, ItemStatus::Archived);
    assert_eq!(
        a_after.classification.unwrap().triage_path,
        Some(TriagePath::Bulk)
    );

    let b_after = h.store.get_item(newsletter_b.id).await.unwrap();
    assert_eq!(b_after.status, ItemStatus::New);
    assert!(b_after.classification.unwrap().is_declassified());

    // The rejected item is immune to rule-only re-matching
    let reclassify = h.pipeline.reclassify_pass(100).await.unwrap();
    assert_eq!(reclassify.rematched, 0);

    // --- Decision history now reflects the bulk archive ---
    let history = themis_core::history::DecisionHistoryAggregator::new(
        h.store.clone() as Arc<dyn TriageStore>
    );
    let summary = history.history("news@letters.io").await.unwrap();
    let rendered = summary.render();
    assert!(rendered.contains("From news@letters.io: bulk 1/1"));
    assert!(rendered.contains("From domain letters.io: bulk 1/1"));

    // --- Learning over the window packages a proposal card ---
    let learning = h.learning.run().await.unwrap();
    assert_eq!(learning.suggestion_count, 1);
    let proposal = h
        .store
        .get_card(learning.proposal_card_id.unwrap())
        .await
        .unwrap();
    let suggestions = proposal.data.suggestions.unwrap();
    assert_eq!(suggestions[0].name, "Batch vendor promotions");

    // Approval stays a human action: the suggestion becomes a rule only
    // through an explicit create
    let approved = suggestions[0].clone();
    let rule = Rule {
        id: themis_core::types::RuleId::new(),
        name: approved.name.clone(),
        kind: approved.rule_kind,
        trigger: approved.trigger.clone(),
        action: approved.action.clone(),
        guidance: approved.guidance.clone(),
        status: themis_core::types::RuleStatus::Active,
        source: RuleSource::Learned,
        match_count: 0,
        last_matched_at: None,
        version: 1,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    h.rules.create(rule).await.unwrap();

    // --- The new rule retroactively catches an individually-held item ---
    let promo = make_item("gmail", "deals@vendor.io", "Spring sale", "Save big");
    h.store.insert_item(&promo).await.unwrap();
    h.pipeline.run_batch_pass(100).await.unwrap();

    let promo_after = h.store.get_item(promo.id).await.unwrap();
    assert_eq!(
        promo_after.classification.unwrap().batch_type.as_deref(),
        Some("promotions")
    );
}

#[tokio::test]
async fn reclassify_catches_items_after_rule_authoring() {
    let h = harness();

    // A promo item lands before any matching rule exists; the scripted
    // cloud keeps it individual
    let promo = make_item("gmail", "deals@vendor.io", "Spring sale", "Save big");
    h.store.insert_item(&promo).await.unwrap();
    h.pipeline.run_batch_pass(100).await.unwrap();

    let held = h.store.get_item(promo.id).await.unwrap();
    assert!(held.classification.as_ref().unwrap().batch_type.is_none());
    assert_eq!(held.classification.as_ref().unwrap().tier, Tier::Cloud);

    // The user authors a rule for the domain
    h.rules
        .create(Rule::structured(
            "vendor promos",
            RuleTrigger {
                sender_domain: Some("vendor.io".to_string()),
                ..Default::default()
            },
            "promotions",
            RuleSource::User,
        ))
        .await
        .unwrap();

    // The rule-only pass catches the held item without a model call, twice
    // over for idempotence
    let first = h.pipeline.reclassify_pass(100).await.unwrap();
    assert_eq!(first.rematched, 1);
    let second = h.pipeline.reclassify_pass(100).await.unwrap();
    assert_eq!(second.rematched, 0);

    let caught = h.store.get_item(promo.id).await.unwrap();
    let classification = caught.classification.unwrap();
    assert_eq!(classification.batch_type.as_deref(), Some("promotions"));
    assert_eq!(classification.tier, Tier::Rule);
}
