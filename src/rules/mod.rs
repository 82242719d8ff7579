//! Rule storage and lifecycle
//!
//! Rules come from three places: seeding, user authoring (including
//! natural-language authoring through the cloud model), and approved
//! learning-loop proposals. Rules are never hard-deleted while historical
//! items may reference them; deactivation is the only removal. Match-count
//! bookkeeping is best-effort and never blocks the classification path.

pub mod defaults;
pub mod matcher;

use crate::cache::TtlCache;
use crate::error::{Result, ThemisError};
use crate::pipeline::{parse, prompt};
use crate::services::CloudModel;
use crate::storage::TriageStore;
use crate::types::{Rule, RuleId, RuleKind, RuleSource, RuleStatus};
use chrono::Utc;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const GUIDANCE_CACHE_KEY: &str = "guidance";

/// Rule CRUD, seeding, and guidance lookup
pub struct RuleStore {
    store: Arc<dyn TriageStore>,
    guidance_cache: Mutex<TtlCache<&'static str, Vec<String>>>,
}

impl RuleStore {
    /// Create a rule store with the default guidance cache TTL
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self::with_guidance_ttl(store, Duration::from_secs(300))
    }

    /// Create a rule store with an explicit guidance cache TTL
    pub fn with_guidance_ttl(store: Arc<dyn TriageStore>, ttl: Duration) -> Self {
        Self {
            store,
            guidance_cache: Mutex::new(TtlCache::new(ttl)),
        }
    }

    /// Persist a new rule
    pub async fn create(&self, rule: Rule) -> Result<Rule> {
        if self.store.rule_name_exists(&rule.name).await? {
            return Err(ThemisError::InvalidOperation(format!(
                "a rule named '{}' already exists",
                rule.name
            )));
        }
        self.store.insert_rule(&rule).await?;
        self.invalidate_guidance();
        info!("Created rule '{}'", rule.name);
        Ok(rule)
    }

    /// Apply changes to an existing rule, bumping version and timestamp
    pub async fn update(&self, mut rule: Rule) -> Result<Rule> {
        rule.version += 1;
        rule.updated_at = Utc::now();
        self.store.update_rule(&rule).await?;
        self.invalidate_guidance();
        Ok(rule)
    }

    /// Soft-delete: flip the rule to inactive. Historical items keep their
    /// rule references intact.
    pub async fn deactivate(&self, id: RuleId) -> Result<Rule> {
        let mut rule = self.store.get_rule(id).await?;
        rule.status = RuleStatus::Inactive;
        self.update(rule).await
    }

    /// Retrieve a rule by ID
    pub async fn get(&self, id: RuleId) -> Result<Rule> {
        self.store.get_rule(id).await
    }

    /// Active rules only
    pub async fn list_active(&self) -> Result<Vec<Rule>> {
        self.store.list_rules(true).await
    }

    /// Every rule, regardless of status
    pub async fn list_all(&self) -> Result<Vec<Rule>> {
        self.store.list_rules(false).await
    }

    /// Seed the default rule set. Idempotent: only inserts rules whose
    /// name is not already present. Returns the number inserted.
    pub async fn seed_defaults(&self) -> Result<usize> {
        let mut inserted = 0;
        for rule in defaults::default_rules() {
            if self.store.rule_name_exists(&rule.name).await? {
                continue;
            }
            self.store.insert_rule(&rule).await?;
            inserted += 1;
        }
        if inserted > 0 {
            self.invalidate_guidance();
            info!("Seeded {} default rules", inserted);
        }
        Ok(inserted)
    }

    /// Texts of active guidance rules, for prompt injection. Served from
    /// the TTL cache between rule edits.
    pub async fn guidance_texts(&self) -> Result<Vec<String>> {
        if let Some(texts) = self.guidance_cache.lock().unwrap().get(&GUIDANCE_CACHE_KEY) {
            return Ok(texts);
        }

        let texts: Vec<String> = self
            .store
            .list_rules(true)
            .await?
            .into_iter()
            .filter(|r| r.kind == RuleKind::Guidance)
            .filter_map(|r| r.guidance)
            .collect();

        self.guidance_cache
            .lock()
            .unwrap()
            .put(GUIDANCE_CACHE_KEY, texts.clone());
        Ok(texts)
    }

    /// Fire-and-forget match bookkeeping. Runs detached from the
    /// classification path; a lost increment is acceptable, a blocked or
    /// failed classification is not.
    pub fn record_match(&self, id: RuleId) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.increment_rule_match(id).await {
                debug!("match-count increment for {} dropped: {}", id, e);
            }
        });
    }

    /// Turn a natural-language instruction into a rule via the cloud model.
    /// The authored rule is created inactive, pending user confirmation.
    pub async fn author_from_text(&self, text: &str, model: &dyn CloudModel) -> Result<Rule> {
        let raw = model
            .complete(&prompt::author_rule_prompt(text))
            .await?
            .ok_or_else(|| ThemisError::ModelApi("no output from rule authoring".to_string()))?;

        let suggestion = parse::parse_suggestions(&raw)
            .and_then(|mut s| if s.is_empty() { None } else { Some(s.remove(0)) })
            .ok_or_else(|| {
                warn!("Unusable rule-authoring output discarded");
                ThemisError::ModelApi("rule authoring output was unusable".to_string())
            })?;

        let now = Utc::now();
        let rule = Rule {
            id: RuleId::new(),
            name: suggestion.name,
            kind: suggestion.rule_kind,
            trigger: suggestion.trigger,
            action: suggestion.action,
            guidance: suggestion.guidance,
            status: RuleStatus::Inactive,
            source: RuleSource::User,
            match_count: 0,
            last_matched_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.create(rule).await
    }

    fn invalidate_guidance(&self) {
        self.guidance_cache
            .lock()
            .unwrap()
            .invalidate(&GUIDANCE_CACHE_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ClassifyContext;
    use crate::storage::test_utils::MemoryStore;
    use crate::types::{Item, RuleTrigger};
    use async_trait::async_trait;

    fn rule_store() -> (Arc<MemoryStore>, RuleStore) {
        let store = Arc::new(MemoryStore::new());
        let rules = RuleStore::new(store.clone());
        (store, rules)
    }

    #[tokio::test]
    async fn test_seed_defaults_is_idempotent() {
        let (_store, rules) = rule_store();

        let first = rules.seed_defaults().await.unwrap();
        assert!(first > 0);

        let second = rules.seed_defaults().await.unwrap();
        assert_eq!(second, 0);

        assert_eq!(rules.list_all().await.unwrap().len(), first);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let (_store, rules) = rule_store();

        let rule = Rule::structured(
            "dup",
            RuleTrigger::default(),
            "newsletters",
            RuleSource::User,
        );
        rules.create(rule.clone()).await.unwrap();

        let mut again = rule.clone();
        again.id = RuleId::new();
        assert!(rules.create(again).await.is_err());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let (_store, rules) = rule_store();

        let rule = rules
            .create(Rule::structured(
                "bump",
                RuleTrigger::default(),
                "newsletters",
                RuleSource::User,
            ))
            .await
            .unwrap();
        assert_eq!(rule.version, 1);

        let updated = rules.update(rule).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn test_deactivate_is_soft() {
        let (_store, rules) = rule_store();

        let rule = rules
            .create(Rule::structured(
                "soft",
                RuleTrigger::default(),
                "newsletters",
                RuleSource::User,
            ))
            .await
            .unwrap();

        rules.deactivate(rule.id).await.unwrap();

        assert!(rules.list_active().await.unwrap().is_empty());
        // Still present for historical reference
        assert_eq!(rules.list_all().await.unwrap().len(), 1);
        assert_eq!(
            rules.get(rule.id).await.unwrap().status,
            RuleStatus::Inactive
        );
    }

    #[tokio::test]
    async fn test_guidance_texts_only_active_guidance() {
        let (_store, rules) = rule_store();

        rules
            .create(Rule::guidance("g1", "keep receipts individual", RuleSource::User))
            .await
            .unwrap();
        let g2 = rules
            .create(Rule::guidance("g2", "batch vendor promos", RuleSource::User))
            .await
            .unwrap();
        rules
            .create(Rule::structured(
                "s1",
                RuleTrigger::default(),
                "newsletters",
                RuleSource::User,
            ))
            .await
            .unwrap();

        let texts = rules.guidance_texts().await.unwrap();
        assert_eq!(texts.len(), 2);

        rules.deactivate(g2.id).await.unwrap();
        let texts = rules.guidance_texts().await.unwrap();
        assert_eq!(texts, vec!["keep receipts individual".to_string()]);
    }

    #[tokio::test]
    async fn test_record_match_increments_eventually() {
        let (store, rules) = rule_store();

        let rule = rules
            .create(Rule::structured(
                "counted",
                RuleTrigger::default(),
                "newsletters",
                RuleSource::User,
            ))
            .await
            .unwrap();

        rules.record_match(rule.id);

        // Detached task; give it a moment
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            if store.get_rule(rule.id).await.unwrap().match_count == 1 {
                return;
            }
        }
        panic!("match count was never incremented");
    }

    #[tokio::test]
    async fn test_record_match_failure_is_silent() {
        let (store, rules) = rule_store();

        let rule = rules
            .create(Rule::structured(
                "lossy",
                RuleTrigger::default(),
                "newsletters",
                RuleSource::User,
            ))
            .await
            .unwrap();

        store.fail_next_match_increments(1);
        rules.record_match(rule.id);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The increment was dropped; nothing surfaced
        assert_eq!(store.get_rule(rule.id).await.unwrap().match_count, 0);
    }

    struct CannedModel {
        response: Option<String>,
    }

    #[async_trait]
    impl CloudModel for CannedModel {
        async fn classify(
            &self,
            _item: &Item,
            _context: &ClassifyContext,
        ) -> Result<Option<String>> {
            Ok(self.response.clone())
        }

        async fn complete(&self, _prompt: &str) -> Result<Option<String>> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_author_from_text() {
        let (_store, rules) = rule_store();

        let model = CannedModel {
            response: Some(
                r#"{"suggestions": [{"kind": "new_rule", "rule_kind": "structured",
                    "name": "Batch GitHub notifications",
                    "trigger": {"sender_domain": "github.com"},
                    "batch_type": "github", "confidence": 0.9,
                    "rationale": "deterministic sender domain"}]}"#
                    .to_string(),
            ),
        };

        let rule = rules
            .author_from_text("batch everything from github", &model)
            .await
            .unwrap();

        assert_eq!(rule.name, "Batch GitHub notifications");
        assert_eq!(rule.status, RuleStatus::Inactive);
        assert_eq!(rule.source, RuleSource::User);
        assert_eq!(
            rule.trigger.unwrap().sender_domain.as_deref(),
            Some("github.com")
        );
    }

    #[tokio::test]
    async fn test_author_from_text_unusable_output() {
        let (_store, rules) = rule_store();

        let model = CannedModel {
            response: Some("I could not decide on a rule.".to_string()),
        };
        assert!(rules
            .author_from_text("do something vague", &model)
            .await
            .is_err());
        assert!(rules.list_all().await.unwrap().is_empty());
    }
}
