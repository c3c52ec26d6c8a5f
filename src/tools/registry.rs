//! Tool registry keyed by `ToolKind`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::tools::tool::{Tool, ToolKind};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<ToolKind, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool, replacing any previous tool of the same kind.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let kind = tool.kind();
        if self.tools.write().await.insert(kind, tool).is_some() {
            tracing::warn!(tool = %kind, "Replaced registered tool");
        } else {
            tracing::debug!(tool = %kind, "Registered tool");
        }
    }

    /// Register a tool (sync version for startup).
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let kind = tool.kind();
        if let Ok(mut tools) = self.tools.try_write() {
            tools.insert(kind, tool);
            tracing::debug!(tool = %kind, "Registered tool");
        }
    }

    /// Unregister a tool.
    pub async fn unregister(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.write().await.remove(&kind)
    }

    /// Get a tool by kind.
    pub async fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(&kind).cloned()
    }

    /// Check if a tool exists.
    pub async fn has(&self, kind: ToolKind) -> bool {
        self.tools.read().await.contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub async fn list(&self) -> Vec<ToolKind> {
        let mut kinds: Vec<ToolKind> = self.tools.read().await.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::tools::tool::{ToolInput, ToolOutput};
    use async_trait::async_trait;
    use std::time::Duration;

    struct MockTool {
        kind: ToolKind,
        summary: &'static str,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn kind(&self) -> ToolKind {
            self.kind
        }

        async fn invoke(&self, _input: ToolInput) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(self.summary, Duration::from_millis(1)))
        }
    }

    fn mock(kind: ToolKind, summary: &'static str) -> Arc<dyn Tool> {
        Arc::new(MockTool { kind, summary })
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(mock(ToolKind::Archive, "archived")).await;

        assert!(registry.has(ToolKind::Archive).await);
        assert!(!registry.has(ToolKind::SendResponse).await);

        let tool = registry.get(ToolKind::Archive).await.unwrap();
        assert_eq!(tool.description(), "archive");
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let registry = ToolRegistry::new();
        registry.register_sync(mock(ToolKind::SendResponse, "sent"));
        registry.register_sync(mock(ToolKind::ApplyLabel, "labelled"));

        assert_eq!(registry.count(), 2);
        assert_eq!(
            registry.list().await,
            vec![ToolKind::ApplyLabel, ToolKind::SendResponse]
        );
    }

    #[tokio::test]
    async fn test_register_replaces_same_kind() {
        let registry = ToolRegistry::new();
        registry.register(mock(ToolKind::Archive, "first")).await;
        registry.register(mock(ToolKind::Archive, "second")).await;
        assert_eq!(registry.count(), 1);

        let tool = registry.get(ToolKind::Archive).await.unwrap();
        let out = tool
            .invoke(ToolInput::Archive {
                record_id: "r1".into(),
            })
            .await
            .unwrap();
        assert_eq!(out.summary, "second");
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ToolRegistry::new();
        registry.register(mock(ToolKind::Archive, "archived")).await;
        assert!(registry.unregister(ToolKind::Archive).await.is_some());
        assert!(!registry.has(ToolKind::Archive).await);
    }
}
