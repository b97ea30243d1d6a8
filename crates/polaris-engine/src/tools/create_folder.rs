use serde_json::{json, Value};

use polaris_core::tools::{ToolContext, ToolResult};

use super::call::CreateFolderParams;
use super::FileToolset;

pub(super) const DESCRIPTION: &str = "Create a new folder in the project";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["name", "parentId"],
        "properties": {
            "name": { "type": "string", "description": "The name of the folder to create" },
            "parentId": {
                "type": "string",
                "description": "The ID (not name!) of the parent folder from listFiles, or empty string for root level"
            }
        }
    })
}

impl FileToolset {
    pub(super) async fn create_folder(&self, ctx: &ToolContext, params: CreateFolderParams) -> ToolResult {
        let parent = params.parent();
        if let Err(message) = self.check_parent(ctx, parent.as_ref()).await {
            return message;
        }

        match self
            .store
            .create_folder(&self.key, &ctx.project_id, parent.as_ref(), &params.name)
            .await
        {
            Ok(id) => ToolResult::ok(format!("Folder created with ID: {id}")),
            Err(e) => ToolResult::error(format!("Error creating folder: {e}")),
        }
    }
}
