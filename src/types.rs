//! Core data types for the Themis triage engine
//!
//! This module defines the fundamental data structures used throughout themis:
//! inbox items, classification records, triage rules, and batch cards. These
//! types form the foundation of the triage decision pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for inbox items
///
/// Wraps a UUID to provide type safety and prevent mixing item IDs
/// with other UUID-based identifiers in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    /// Create a new random item ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an item ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for triage rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for batch cards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub Uuid);

impl CardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an inbox item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Newly ingested, awaiting triage
    New,

    /// Archived (bulk or individual)
    Archived,

    /// Snoozed for later
    Snoozed,

    /// The user took a direct action on it
    Actioned,
}

impl ItemStatus {
    /// An item counts toward decision history once it has left the inbox
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ItemStatus::New)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Archived => "archived",
            ItemStatus::Snoozed => "snoozed",
            ItemStatus::Actioned => "actioned",
        }
    }
}

/// Item priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// How a human historically resolved an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriagePath {
    /// Resolved through a batch card
    Bulk,

    /// Dismissed quickly without engagement
    Quick,

    /// Read and acted on individually
    Engaged,
}

impl TriagePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriagePath::Bulk => "bulk",
            TriagePath::Quick => "quick",
            TriagePath::Engaged => "engaged",
        }
    }

    /// Fallback bucket for resolved items that never recorded a path
    pub fn from_terminal_status(status: ItemStatus) -> Option<Self> {
        match status {
            ItemStatus::Archived => Some(TriagePath::Bulk),
            ItemStatus::Snoozed => Some(TriagePath::Quick),
            ItemStatus::Actioned => Some(TriagePath::Engaged),
            ItemStatus::New => None,
        }
    }
}

/// Which stage of the fallback chain produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Deterministic rule match (or connector override)
    Rule,

    /// Local/cheap model
    Fast,

    /// Full-context cloud model
    Cloud,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Rule => "rule",
            Tier::Fast => "fast",
            Tier::Cloud => "cloud",
        }
    }
}

/// Reason prefix written when a user removes an item from a batch.
/// Its presence suppresses rule-only re-matching of the item.
pub const DECLASSIFIED_SENTINEL: &str = "user removed from";

/// Classification record embedded on an item
///
/// `batch_type = None` always means "keep for individual review" - the
/// conservative default. Once `batch_card_id` is set it is never overwritten
/// except by explicit user declassification, which replaces the whole record
/// with a sentinel record (see [`Classification::declassified`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Stage that produced this decision
    pub tier: Tier,

    /// Batch label, or None for individual review
    pub batch_type: Option<String>,

    /// Decision confidence, always within [0, 1]
    pub confidence: f32,

    /// Human-readable explanation of the decision
    pub reason: String,

    /// Rule that matched, when tier is Rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,

    /// Pending batch card the item was assigned to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_card_id: Option<CardId>,

    /// How the user eventually resolved the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_path: Option<TriagePath>,

    /// When the decision was made
    pub classified_at: DateTime<Utc>,
}

impl Classification {
    /// Safe fallback record returned when every tier failed
    pub fn fallback() -> Self {
        Self {
            tier: Tier::Cloud,
            batch_type: None,
            confidence: 0.0,
            reason: "classification failed".to_string(),
            rule_id: None,
            batch_card_id: None,
            triage_path: None,
            classified_at: Utc::now(),
        }
    }

    /// Sentinel record written when a user removes an item from a batch.
    /// The item stays in individual review and is excluded from rule-only
    /// re-matching.
    pub fn declassified(batch_type: &str) -> Self {
        Self {
            tier: Tier::Rule,
            batch_type: None,
            confidence: 0.0,
            reason: format!("{} {}", DECLASSIFIED_SENTINEL, batch_type),
            rule_id: None,
            batch_card_id: None,
            triage_path: None,
            classified_at: Utc::now(),
        }
    }

    /// Whether this record carries the user-declassification sentinel
    pub fn is_declassified(&self) -> bool {
        self.reason.starts_with(DECLASSIFIED_SENTINEL)
    }
}

/// Derived enrichment attached to an item by the cloud tier
///
/// Merged incrementally: an incoming record only sets the fields it carries
/// and never clears fields already present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Concise model-generated summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Suggested priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    /// Suggested tags (appended, deduplicated)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Enrichment {
    /// Merge an incoming enrichment into this one.
    ///
    /// Fields absent from `incoming` are left untouched; tags accumulate
    /// without duplicates.
    pub fn merge(&mut self, incoming: &Enrichment) {
        if let Some(summary) = &incoming.summary {
            self.summary = Some(summary.clone());
        }
        if let Some(priority) = incoming.priority {
            self.priority = Some(priority);
        }
        for tag in &incoming.tags {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.priority.is_none() && self.tags.is_empty()
    }
}

/// One unit of triage: a message, notification, or meeting record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    // === Identity ===
    /// Internal identifier
    pub id: ItemId,

    /// Identifier at the source system
    pub external_id: String,

    /// Connector that pulled the item in (e.g. "gmail", "slack", "granola")
    pub connector: String,

    // === Content ===
    /// Sender address or handle
    pub sender: String,

    /// Sender display name
    pub display_name: String,

    /// Subject or title
    pub subject: String,

    /// Body content
    pub content: String,

    // === Lifecycle ===
    /// Inbox lifecycle status
    pub status: ItemStatus,

    /// Priority
    pub priority: Priority,

    /// Free-form tags
    pub tags: Vec<String>,

    /// Derived enrichment, merged incrementally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,

    /// Triage decision, None until a pass classifies the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,

    /// Ingestion timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Substring of the sender after the last `@`, or None when the sender
    /// has no `@` (in which case domain triggers never match).
    pub fn sender_domain(&self) -> Option<&str> {
        let idx = self.sender.rfind('@')?;
        let domain = &self.sender[idx + 1..];
        if domain.is_empty() {
            None
        } else {
            Some(domain)
        }
    }

    /// Merge enrichment into the item, creating the record if absent
    pub fn merge_enrichment(&mut self, incoming: &Enrichment) {
        match &mut self.enrichment {
            Some(existing) => existing.merge(incoming),
            None => self.enrichment = Some(incoming.clone()),
        }
    }
}

/// Rule flavor: deterministic trigger vs. free-text model guidance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Field-based trigger, matched deterministically
    Structured,

    /// Free text injected into model prompts; never matched deterministically
    Guidance,
}

/// Rule lifecycle status. Rules are never hard-deleted while historical
/// items still reference them; deactivation is the only removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Inactive,
}

/// Where a rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Seeded default
    Seed,

    /// Authored by the user
    User,

    /// Approved learning-loop proposal
    Learned,
}

/// Deterministic rule trigger. All specified fields are ANDed; an empty
/// trigger (every field None) matches every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTrigger {
    /// Exact connector tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,

    /// Exact sender address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// Exact sender domain (substring after the last `@`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_domain: Option<String>,

    /// Case-insensitive substring of the subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_contains: Option<String>,

    /// Case-insensitive substring of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_contains: Option<String>,

    /// Regex tested against subject OR content; an invalid pattern is a
    /// non-match, never an error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl RuleTrigger {
    /// A trigger with no fields set matches everything (vacuous AND)
    pub fn is_vacuous(&self) -> bool {
        self.connector.is_none()
            && self.sender.is_none()
            && self.sender_domain.is_none()
            && self.subject_contains.is_none()
            && self.content_contains.is_none()
            && self.pattern.is_none()
    }
}

/// What a matching rule does with the item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RuleAction {
    /// Group the item under a batch label for bulk handling
    Batch { batch_type: String },
}

/// A triage rule: structured trigger or free-text guidance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,

    /// Unique human-readable name (seeding is idempotent by name)
    pub name: String,

    pub kind: RuleKind,

    /// Trigger spec; None matches nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RuleTrigger>,

    /// Action taken on match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RuleAction>,

    /// Free-text guidance, for guidance rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,

    pub status: RuleStatus,

    pub source: RuleSource,

    /// Times the rule has fired (best-effort counter, lossy-tolerant)
    pub match_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_matched_at: Option<DateTime<Utc>>,

    /// Bumped on every update
    pub version: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Convenience constructor for a structured rule
    pub fn structured(name: &str, trigger: RuleTrigger, batch_type: &str, source: RuleSource) -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::new(),
            name: name.to_string(),
            kind: RuleKind::Structured,
            trigger: Some(trigger),
            action: Some(RuleAction::Batch {
                batch_type: batch_type.to_string(),
            }),
            guidance: None,
            status: RuleStatus::Active,
            source,
            match_count: 0,
            last_matched_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience constructor for a guidance rule
    pub fn guidance(name: &str, text: &str, source: RuleSource) -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::new(),
            name: name.to_string(),
            kind: RuleKind::Guidance,
            trigger: None,
            action: None,
            guidance: Some(text.to_string()),
            status: RuleStatus::Active,
            source,
            match_count: 0,
            last_matched_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Batch-card pattern: item batches awaiting bulk resolution, or packaged
/// learning-loop proposals awaiting review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardPattern {
    Batch,
    Learning,
}

/// Batch-card lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// Accumulating items, awaiting one human resolution
    Pending,

    /// Resolved; further items of the same type get a fresh card
    Confirmed,
}

/// Bulk action configured on a batch card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Archive,
    Snooze,
}

impl BatchAction {
    /// Status transition applied to accepted items
    pub fn target_status(&self) -> ItemStatus {
        match self {
            BatchAction::Archive => ItemStatus::Archived,
            BatchAction::Snooze => ItemStatus::Snoozed,
        }
    }
}

/// Audit payload recorded when a card is confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardResolution {
    pub accepted: u64,
    pub rejected: u64,
    pub action: BatchAction,
    pub resolved_at: DateTime<Utc>,
}

/// Structured payload of a batch card
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardData {
    /// Batch label, for batch-pattern cards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_type: Option<String>,

    /// Configured bulk action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<BatchAction>,

    /// Running count of assigned items
    #[serde(default)]
    pub item_count: u64,

    /// Why these items were grouped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    /// Rule suggestions, for learning-pattern cards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<RuleSuggestion>>,

    /// Audit payload, set on confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<CardResolution>,
}

/// A single pending grouping object accumulating all items currently
/// classified under one batch type, awaiting one human resolution.
///
/// Invariant: at most one pending batch card exists per distinct batch type
/// at any time, enforced by an atomic get-or-create in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCard {
    pub id: CardId,
    pub pattern: CardPattern,
    pub status: CardStatus,
    pub title: String,
    pub data: CardData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchCard {
    /// Fresh pending batch card for a batch type
    pub fn pending_batch(batch_type: &str, action: BatchAction, explanation: &str) -> Self {
        let now = Utc::now();
        Self {
            id: CardId::new(),
            pattern: CardPattern::Batch,
            status: CardStatus::Pending,
            title: format!("Review {} in bulk", batch_type),
            data: CardData {
                batch_type: Some(batch_type.to_string()),
                action: Some(action),
                item_count: 0,
                explanation: Some(explanation.to_string()),
                suggestions: None,
                resolution: None,
            },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of learning-loop proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    NewRule,
    RefineRule,
}

/// A rule proposal mined from recent decisions, surfaced for human approval.
/// Never activated automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSuggestion {
    pub kind: SuggestionKind,

    pub rule_kind: RuleKind,

    /// Rule being refined, for refine_rule suggestions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rule_id: Option<RuleId>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RuleTrigger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RuleAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,

    pub confidence: f32,

    pub rationale: String,
}
