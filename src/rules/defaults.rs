// Default rule set
//
// Starter rules seeded on first run. Seeding is idempotent by rule name:
// a rule whose name already exists is never inserted again, so user edits
// to a seeded rule survive restarts.

use crate::types::{Rule, RuleSource, RuleTrigger};

/// The starter rule set
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::structured(
            "Batch newsletters",
            RuleTrigger {
                content_contains: Some("unsubscribe".to_string()),
                ..Default::default()
            },
            "newsletters",
            RuleSource::Seed,
        ),
        Rule::structured(
            "Batch shipping updates",
            RuleTrigger {
                pattern: Some(r"(?i)(out for delivery|has shipped|delivery update)".to_string()),
                ..Default::default()
            },
            "shipping-updates",
            RuleSource::Seed,
        ),
        Rule::structured(
            "Batch CI results",
            RuleTrigger {
                pattern: Some(r"(?i)build #?\d+ (passed|failed|succeeded)".to_string()),
                ..Default::default()
            },
            "ci-results",
            RuleSource::Seed,
        ),
        Rule::structured(
            "Batch calendar responses",
            RuleTrigger {
                subject_contains: Some("accepted:".to_string()),
                ..Default::default()
            },
            "calendar-responses",
            RuleSource::Seed,
        ),
        Rule::guidance(
            "Receipts stay individual",
            "Receipts and invoices should stay in individual review even when \
             they come from automated senders; the user reconciles them one by one.",
            RuleSource::Seed,
        ),
        Rule::guidance(
            "Prefer batching recurring vendor mail",
            "Recurring promotional mail from the same vendor domain is a good \
             batching candidate once the user has archived it in bulk before.",
            RuleSource::Seed,
        ),
    ]
}
