use serde_json::{json, Value};

use polaris_core::ids::FileId;
use polaris_core::tools::{ToolContext, ToolResult};

use super::call::UpdateFileParams;
use super::FileToolset;

pub(super) const DESCRIPTION: &str = "Update the content of an existing file";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["fileId", "content"],
        "properties": {
            "fileId": { "type": "string", "description": "The ID of the file to update" },
            "content": { "type": "string", "description": "The new content for the file" }
        }
    })
}

impl FileToolset {
    pub(super) async fn update_file(&self, ctx: &ToolContext, params: UpdateFileParams) -> ToolResult {
        let id = FileId::from_raw(&params.file_id);
        let node = match self.find_node(ctx, &id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                return ToolResult::error(format!(
                    "Error: File with ID \"{id}\" not found. Use listFiles to get valid file IDs."
                ))
            }
            Err(e) => return ToolResult::error(format!("Error updating file: {e}")),
        };
        if node.is_folder() {
            return ToolResult::error(format!(
                "Error: \"{id}\" is a folder, not a file. You can only update file contents."
            ));
        }

        match self.store.update_file_content(&self.key, &id, &params.content).await {
            Ok(_) => ToolResult::ok(format!("File \"{}\" updated successfully", node.name)),
            Err(e) => ToolResult::error(format!("Error updating file: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use super::super::{FileToolCall, FileToolset};
    use polaris_core::security::InternalKey;
    use polaris_store::FileStore;
    use serde_json::json;

    #[tokio::test]
    async fn overwrites_content() {
        let fx = fixture().await;
        let id = fx
            .store
            .create_file(&fx.key, &fx.ctx.project_id, None, "a.js", "old")
            .await
            .unwrap();
        let before = fx.store.get_file(&fx.key, &id).await.unwrap().unwrap();

        let result = fx
            .run("updateFile", json!({"fileId": id.as_str(), "content": "new"}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "File \"a.js\" updated successfully");

        let after = fx.store.get_file(&fx.key, &id).await.unwrap().unwrap();
        assert_eq!(after.content.as_deref(), Some("new"));
        assert!(after.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn folder_cannot_be_updated() {
        let fx = fixture().await;
        let id = fx
            .store
            .create_folder(&fx.key, &fx.ctx.project_id, None, "src")
            .await
            .unwrap();
        let result = fx
            .run("updateFile", json!({"fileId": id.as_str(), "content": "x"}))
            .await;
        assert!(result.is_error);
        assert_eq!(
            result.content,
            format!("Error: \"{id}\" is a folder, not a file. You can only update file contents.")
        );
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let fx = fixture().await;
        let result = fx
            .run("updateFile", json!({"fileId": "file_nope", "content": "x"}))
            .await;
        assert_eq!(
            result.content,
            "Error: File with ID \"file_nope\" not found. Use listFiles to get valid file IDs."
        );
    }

    #[tokio::test]
    async fn store_fault_reads_as_updating_error() {
        let fx = fixture().await;
        let id = fx
            .store
            .create_file(&fx.key, &fx.ctx.project_id, None, "a.js", "old")
            .await
            .unwrap();
        let toolset = FileToolset::new(fx.store.clone(), InternalKey::new("wrong"));
        let call = FileToolCall::parse("updateFile", json!({"fileId": id.as_str(), "content": "new"})).unwrap();

        let result = toolset.execute(call, &fx.ctx).await;
        assert!(result.is_error);
        assert_eq!(result.content, "Error updating file: Invalid internal key");
    }
}
