//! Themis - Personal Inbox Triage Engine
//!
//! Themis decides, for each incoming item (message, notification, meeting
//! record), whether it can be safely grouped for bulk handling or must
//! surface for individual review:
//! - Deterministic rule DSL matched first, with confidence 1
//! - Confidence-gated fast local tier for automated-looking items
//! - Full-context cloud tier informed by decision history and guidance
//! - Batch cards grouping classified items for one-shot human resolution
//! - A scheduled learning loop proposing new rules from past decisions
//!
//! # Architecture
//!
//! - **Types**: core data structures (Item, Classification, Rule, BatchCard)
//! - **Rules**: rule store, pure matcher, default seeding
//! - **Pipeline**: the tiered classification fallback chain
//! - **Batch**: card assignment and bulk resolution
//! - **Learning**: decision mining and rule proposals
//! - **Storage**: SQLite backend behind an async trait
//! - **Services**: model callers and the semantic context provider
//!
//! # Example
//!
//! ```ignore
//! use themis_core::{ClassificationPipeline, RuleStore, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::open("themis.db")?);
//!     let rules = Arc::new(RuleStore::new(store.clone()));
//!     rules.seed_defaults().await?;
//!
//!     let report = pipeline.run_batch_pass(100).await?;
//!     println!("classified {} items", report.classified);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod learning;
pub mod pipeline;
pub mod rules;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use batch::{AssignReport, BatchAssigner, BatchResolver, ResolveReport};
pub use config::ThemisConfig;
pub use error::{Result, ThemisError};
pub use history::{DecisionHistoryAggregator, DecisionSummary};
pub use learning::{LearningLoop, LearningReport};
pub use pipeline::{ClassificationPipeline, ClassificationResult, PassReport, ReclassifyReport};
pub use rules::RuleStore;
pub use scheduler::{BackgroundScheduler, TriageJob};
pub use storage::{sqlite::SqliteStore, TriageStore};
pub use types::{
    BatchCard, CardId, Classification, Enrichment, Item, ItemId, ItemStatus, Priority, Rule,
    RuleId, RuleKind, RuleStatus, RuleTrigger, Tier, TriagePath,
};
