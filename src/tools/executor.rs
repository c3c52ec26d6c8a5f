//! `ActionExecutor` backed by the tool registry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ExecutorError, ToolError};
use crate::pipeline::types::{ActionExecutor, PlannedAction};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::{ToolInput, ToolKind};

/// Dispatches each planned action to the tool registered for it.
pub struct ToolActionExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolActionExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ActionExecutor for ToolActionExecutor {
    async fn apply(&self, action: &PlannedAction) -> Result<bool, ExecutorError> {
        let kind = ToolKind::for_action(&action.action);
        let input = ToolInput::from_action(&action.record_id, &action.action)?;
        let tool = self
            .registry
            .get(kind)
            .await
            .ok_or_else(|| ToolError::NotRegistered(kind.to_string()))?;

        let output = tool.invoke(input).await?;
        debug!(
            record_id = %action.record_id,
            tool = %kind,
            summary = %output.summary,
            "Action applied"
        );
        Ok(true)
    }
}
