//! Decision history aggregation
//!
//! Summarizes how a sender's (and sender-domain's) past items were
//! resolved, bucketed by triage path, and renders the summary as compact
//! deterministic text for classifier context. The rendering is injected
//! verbatim into the cloud-tier prompt, so it stays stable and short.

use crate::error::Result;
use crate::storage::TriageStore;
use crate::types::{ItemStatus, TriagePath};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-population outcome counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationCounts {
    counts: BTreeMap<TriagePath, u64>,
}

impl PopulationCounts {
    fn from_outcomes(outcomes: &[(ItemStatus, Option<TriagePath>)]) -> Self {
        let mut counts = BTreeMap::new();
        for (status, path) in outcomes {
            // Items resolved before paths were recorded fall back to a
            // bucket derived from their terminal status
            let bucket = path.or_else(|| TriagePath::from_terminal_status(*status));
            if let Some(bucket) = bucket {
                *counts.entry(bucket).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, path: TriagePath) -> u64 {
        self.counts.get(&path).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// `bulk 3/5, engaged 2/5` - non-zero buckets only
    fn render(&self) -> String {
        let total = self.total();
        self.counts
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(path, n)| format!("{} {}/{}", path.as_str(), n, total))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Derived, non-persisted view of a sender's triage history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionSummary {
    pub sender: String,
    pub domain: Option<String>,
    pub sender_counts: PopulationCounts,
    pub domain_counts: PopulationCounts,
}

impl DecisionSummary {
    /// Deterministic compact rendering for prompt injection.
    ///
    /// No resolved items anywhere: a single "no prior history" sentence.
    /// Otherwise one line per population that has at least one resolved
    /// item, listing only the non-zero buckets as `<bucket> <n>/<total>`.
    pub fn render(&self) -> String {
        if self.sender_counts.is_empty() && self.domain_counts.is_empty() {
            return "No prior history for this sender.".to_string();
        }

        let mut lines = Vec::new();
        if !self.sender_counts.is_empty() {
            lines.push(format!(
                "From {}: {}",
                self.sender,
                self.sender_counts.render()
            ));
        }
        if !self.domain_counts.is_empty() {
            if let Some(domain) = &self.domain {
                lines.push(format!("From domain {}: {}", domain, self.domain_counts.render()));
            }
        }
        lines.join("\n")
    }
}

/// Builds decision summaries from item history
pub struct DecisionHistoryAggregator {
    store: Arc<dyn TriageStore>,
}

impl DecisionHistoryAggregator {
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self { store }
    }

    /// Summarize resolved outcomes for one sender and their domain
    pub async fn history(&self, sender: &str) -> Result<DecisionSummary> {
        let sender_outcomes = self.store.resolved_outcomes_for_sender(sender).await?;

        let domain = sender
            .rfind('@')
            .map(|idx| &sender[idx + 1..])
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let domain_outcomes = match &domain {
            Some(domain) => self.store.resolved_outcomes_for_domain(domain).await?,
            None => Vec::new(),
        };

        Ok(DecisionSummary {
            sender: sender.to_string(),
            domain,
            sender_counts: PopulationCounts::from_outcomes(&sender_outcomes),
            domain_counts: PopulationCounts::from_outcomes(&domain_outcomes),
        })
    }
}
