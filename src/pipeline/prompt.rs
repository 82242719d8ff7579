//! Prompt construction for the model tiers and the learning loop
//!
//! All prompts demand a single JSON object back; the defensive parser in
//! [`crate::pipeline::parse`] handles everything the models do anyway.

use crate::services::ClassifyContext;
use crate::types::{Item, Rule, RuleKind};

/// Prompt for the fast (local) tier: item plus guidance only
pub fn fast_classify_prompt(item: &Item, guidance: &[String]) -> String {
    format!(
        r#"You are triaging an automated message in a personal inbox.

Message:
From: {}
Subject: {}
Body:
{}

{}Decide whether this message can be safely grouped for bulk handling or
must be reviewed individually. Respond with EXACTLY one JSON object:
{{"recommendation": "batch" or "individual", "batch_type": "<label or null>", "confidence": <0.0-1.0>, "reason": "<one sentence>"}}
"#,
        item.sender,
        item.subject,
        truncate(&item.content, 2000),
        render_guidance(guidance),
    )
}

/// Prompt for the cloud tier: full context including decision history and
/// semantic memory
pub fn cloud_classify_prompt(item: &Item, context: &ClassifyContext) -> String {
    let memory = if context.memory.is_empty() {
        String::new()
    } else {
        format!("What is known about this sender:\n{}\n\n", context.memory)
    };

    format!(
        r#"You are triaging a message in a personal inbox. Decide whether it can
be safely grouped for bulk handling or must surface for individual review.

Message:
Connector: {}
From: {} ({})
Subject: {}
Body:
{}

Decision history:
{}

{}{}Respond with EXACTLY one JSON object:
{{"recommendation": "batch" or "individual", "batch_type": "<label or null>", "confidence": <0.0-1.0>, "reason": "<one sentence>", "summary": "<1-2 sentence summary>", "priority": "low"|"normal"|"high", "tags": ["<tag>", ...]}}

Use "individual" whenever in doubt; batching hides the message from the user.
"#,
        item.connector,
        item.sender,
        item.display_name,
        item.subject,
        truncate(&item.content, 4000),
        context.history,
        memory,
        render_guidance(&context.guidance),
    )
}

/// Prompt for the learning loop: recent decisions vs. the current rule set
pub fn learning_prompt(decisions: &[Item], rules: &[Rule]) -> String {
    let decision_lines: Vec<String> = decisions
        .iter()
        .filter_map(|item| {
            item.classification.as_ref().map(|c| {
                format!(
                    "- from={} subject={:?} decided={} tier={} confidence={:.2}",
                    item.sender,
                    item.subject,
                    c.batch_type.as_deref().unwrap_or("individual"),
                    c.tier.as_str(),
                    c.confidence,
                )
            })
        })
        .collect();

    let rule_lines: Vec<String> = rules
        .iter()
        .map(|rule| match rule.kind {
            RuleKind::Structured => format!(
                "- [{}] {} (structured, matched {} times): {}",
                rule.id,
                rule.name,
                rule.match_count,
                serde_json::to_string(&rule.trigger).unwrap_or_default(),
            ),
            RuleKind::Guidance => format!(
                "- [{}] {} (guidance): {}",
                rule.id,
                rule.name,
                rule.guidance.as_deref().unwrap_or(""),
            ),
        })
        .collect();

    format!(
        r#"You maintain the triage rules of a personal inbox. Compare the recent
triage decisions below against the existing rules and propose new rules or
refinements that would have made these decisions deterministic.

Recent decisions:
{}

Existing rules:
{}

Propose at most 5 suggestions. Respond with EXACTLY one JSON object:
{{"suggestions": [{{"kind": "new_rule" or "refine_rule", "rule_kind": "structured" or "guidance", "target_rule_id": "<id or null>", "name": "<short name>", "trigger": {{...}} or null, "batch_type": "<label or null>", "guidance": "<text or null>", "confidence": <0.0-1.0>, "rationale": "<one sentence>"}}]}}

Trigger fields: connector, sender, sender_domain, subject_contains,
content_contains, pattern (regex). Only propose rules the decisions
actually support; return {{"suggestions": []}} when nothing stands out.
"#,
        decision_lines.join("\n"),
        rule_lines.join("\n"),
    )
}

/// Prompt for turning a natural-language instruction into a rule draft
pub fn author_rule_prompt(text: &str) -> String {
    format!(
        r#"Convert this inbox triage instruction into a rule.

Instruction: {:?}

Respond with EXACTLY one JSON object:
{{"suggestions": [{{"kind": "new_rule", "rule_kind": "structured" or "guidance", "name": "<short name>", "trigger": {{...}} or null, "batch_type": "<label or null>", "guidance": "<text or null>", "confidence": <0.0-1.0>, "rationale": "<one sentence>"}}]}}

Use a structured rule with trigger fields (connector, sender, sender_domain,
subject_contains, content_contains, pattern) when the instruction is
deterministic; use a guidance rule when it expresses a preference a model
should weigh. Return exactly one suggestion.
"#,
        text
    )
}

fn render_guidance(guidance: &[String]) -> String {
    if guidance.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = guidance.iter().map(|g| format!("- {}", g)).collect();
        format!("User guidance:\n{}\n\n", lines.join("\n"))
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_utils::make_item;

    #[test]
    fn test_cloud_prompt_includes_history_and_guidance() {
        let item = make_item("gmail", "news@letters.io", "Digest", "body");
        let context = ClassifyContext {
            history: "From news@letters.io: bulk 3/4, quick 1/4".to_string(),
            guidance: vec!["Receipts stay individual".to_string()],
            memory: "Known newsletter sender".to_string(),
        };

        let prompt = cloud_classify_prompt(&item, &context);
        assert!(prompt.contains("bulk 3/4"));
        assert!(prompt.contains("Receipts stay individual"));
        assert!(prompt.contains("Known newsletter sender"));
        assert!(prompt.contains("news@letters.io"));
    }

    #[test]
    fn test_fast_prompt_omits_empty_guidance() {
        let item = make_item("gmail", "ci@builds.io", "build #1 passed", "ok");
        let prompt = fast_classify_prompt(&item, &[]);
        assert!(!prompt.contains("User guidance"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(truncate(text, 5), "héllo");
        assert_eq!(truncate(text, 100), text);
    }
}
