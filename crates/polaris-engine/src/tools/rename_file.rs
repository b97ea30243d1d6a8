use serde_json::{json, Value};

use polaris_core::ids::FileId;
use polaris_core::tools::{ToolContext, ToolResult};
use polaris_store::StoreError;

use super::call::RenameFileParams;
use super::FileToolset;

pub(super) const DESCRIPTION: &str = "Rename a file or folder. Fails if a sibling of the same type already has the new name.";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["fileId", "newName"],
        "properties": {
            "fileId": { "type": "string", "description": "The ID of the file or folder to rename" },
            "newName": { "type": "string", "description": "The new name, including extension for files" }
        }
    })
}

impl FileToolset {
    pub(super) async fn rename_file(&self, ctx: &ToolContext, params: RenameFileParams) -> ToolResult {
        let id = FileId::from_raw(&params.file_id);
        let node = match self.find_node(ctx, &id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                return ToolResult::error(format!(
                    "Error: File with ID \"{id}\" not found. Use listFiles to get valid file IDs."
                ))
            }
            Err(e) => return ToolResult::error(format!("Error renaming file: {e}")),
        };

        match self.store.rename_file(&self.key, &id, &params.new_name).await {
            Ok(_) => ToolResult::ok(format!(
                "Renamed {} \"{}\" to \"{}\"",
                node.kind, node.name, params.new_name
            )),
            Err(StoreError::Conflict(msg)) => ToolResult::error(format!("Error: {msg}")),
            Err(e) => ToolResult::error(format!("Error renaming file: {e}")),
        }
    }
}
