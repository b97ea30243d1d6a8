use serde_json::{json, Value};
use tracing::info;

use polaris_core::tools::{ToolContext, ToolResult};

use super::call::CreateFilesParams;
use super::FileToolset;

pub(super) const DESCRIPTION: &str = "Create multiple files at once in the same folder. Use this to batch create files that share the same parent folder. More efficient than creating files one by one.";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["parentId", "files"],
        "properties": {
            "parentId": {
                "type": "string",
                "description": "The ID of the parent folder. Use empty string for root level. Must be a valid folder ID from listFiles."
            },
            "files": {
                "type": "array",
                "description": "Array of files to create",
                "items": {
                    "type": "object",
                    "required": ["name", "content"],
                    "properties": {
                        "name": { "type": "string", "description": "The file name including extension" },
                        "content": { "type": "string", "description": "The file content" }
                    }
                }
            }
        }
    })
}

impl FileToolset {
    /// Returns the per-file outcome list. A collision fails only its own item.
    pub(super) async fn create_files(&self, ctx: &ToolContext, params: CreateFilesParams) -> ToolResult {
        let parent = params.parent();
        if let Err(message) = self.check_parent(ctx, parent.as_ref()).await {
            return message;
        }

        let outcomes = match self
            .store
            .create_files(&self.key, &ctx.project_id, parent.as_ref(), &params.new_files())
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => return ToolResult::error(format!("Error creating files: {e}")),
        };

        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        info!(
            project_id = %ctx.project_id,
            created = outcomes.len() - failed,
            failed,
            "createFiles"
        );
        match serde_json::to_string(&outcomes) {
            Ok(json) => ToolResult::ok(json),
            Err(e) => ToolResult::error(format!("Error creating files: {e}")),
        }
    }
}
