//! External collaborator interfaces
//!
//! Model callers and the semantic context provider are consumed through
//! traits; the pipeline owns all defensive parsing of their free-text
//! output. Implementations: an Anthropic-backed cloud classifier and an
//! Ollama-backed local classifier.

pub mod cloud;
pub mod context;
pub mod local;

use crate::error::Result;
use crate::types::Item;
use async_trait::async_trait;

/// Full context handed to the cloud tier
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    /// Rendered decision history for the item's sender and domain
    pub history: String,

    /// Active guidance-rule texts
    pub guidance: Vec<String>,

    /// Best-effort semantic context about the sender (may be empty)
    pub memory: String,
}

/// Local/cheap classifier. May be unavailable; callers hold it as an
/// `Option` and skip the fast tier entirely when absent.
#[async_trait]
pub trait LocalModel: Send + Sync {
    /// Classify an item with guidance context. Returns the model's raw
    /// free-text output, or None when the model produced nothing.
    async fn classify(&self, item: &Item, guidance: &[String]) -> Result<Option<String>>;
}

/// Full-context cloud classifier
#[async_trait]
pub trait CloudModel: Send + Sync {
    /// Classify an item with full context. Returns raw free-text output.
    async fn classify(&self, item: &Item, context: &ClassifyContext) -> Result<Option<String>>;

    /// Plain completion, used by the learning loop and rule authoring
    async fn complete(&self, prompt: &str) -> Result<Option<String>>;
}

/// Best-effort semantic memory about a sender. Implementations must never
/// fail: any error degrades to an empty string.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn context_for(&self, sender: &str) -> String;
}
