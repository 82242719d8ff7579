//! Semantic context provider
//!
//! Wraps the long-term memory store as a best-effort lookup: the cloud
//! tier prompt gets whatever text is available about the sender, and any
//! failure degrades to an empty string rather than surfacing.

use crate::services::ContextProvider;
use async_trait::async_trait;

/// Context provider that has nothing to say. Used when no memory store is
/// wired up and as the conservative default in tests.
#[derive(Default)]
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn context_for(&self, _sender: &str) -> String {
        String::new()
    }
}

/// Context provider that serves from a fixed lookup table, used by tests
/// and by deployments that export sender notes to a file.
pub struct StaticContext {
    entries: std::collections::HashMap<String, String>,
}

impl StaticContext {
    pub fn new(entries: std::collections::HashMap<String, String>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl ContextProvider for StaticContext {
    async fn context_for(&self, sender: &str) -> String {
        self.entries.get(sender).cloned().unwrap_or_default()
    }
}
