// Rule Matcher
//
// Pure predicate evaluation of structured rule triggers against items.
// No I/O, no side effects. All specified trigger fields are ANDed.

use crate::types::{Item, Rule, RuleKind, RuleTrigger};
use regex::Regex;

/// Does the item satisfy the rule's trigger?
///
/// Guidance rules never match deterministically. A rule without a trigger
/// matches nothing; a trigger with no fields set matches everything.
pub fn matches(rule: &Rule, item: &Item) -> bool {
    if rule.kind == RuleKind::Guidance {
        return false;
    }

    match &rule.trigger {
        Some(trigger) => trigger_matches(trigger, item),
        None => false,
    }
}

/// Evaluate a trigger against an item. Every specified field must hold.
pub fn trigger_matches(trigger: &RuleTrigger, item: &Item) -> bool {
    if let Some(connector) = &trigger.connector {
        if item.connector != *connector {
            return false;
        }
    }

    if let Some(sender) = &trigger.sender {
        if item.sender != *sender {
            return false;
        }
    }

    if let Some(domain) = &trigger.sender_domain {
        match item.sender_domain() {
            Some(item_domain) if item_domain == domain => {}
            _ => return false,
        }
    }

    if let Some(needle) = &trigger.subject_contains {
        if !contains_ignore_case(&item.subject, needle) {
            return false;
        }
    }

    if let Some(needle) = &trigger.content_contains {
        if !contains_ignore_case(&item.content, needle) {
            return false;
        }
    }

    if let Some(pattern) = &trigger.pattern {
        // An unparseable pattern is a non-match, never an error
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&item.subject) && !re.is_match(&item.content) {
                    return false;
                }
            }
            Err(_) => return false,
        }
    }

    true
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
