use serde_json::{json, Value};
use tracing::info;

use polaris_core::ids::FileId;
use polaris_core::tools::{ToolContext, ToolResult};

use super::call::DeleteFileParams;
use super::FileToolset;

pub(super) const DESCRIPTION: &str = "Delete a file, or a folder together with everything inside it.";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["fileId"],
        "properties": {
            "fileId": { "type": "string", "description": "The ID of the file or folder to delete" }
        }
    })
}

impl FileToolset {
    pub(super) async fn delete_file(&self, ctx: &ToolContext, params: DeleteFileParams) -> ToolResult {
        let id = FileId::from_raw(&params.file_id);
        let node = match self.find_node(ctx, &id).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                return ToolResult::error(format!(
                    "Error: File with ID \"{id}\" not found. Use listFiles to get valid file IDs."
                ))
            }
            Err(e) => return ToolResult::error(format!("Error deleting file: {e}")),
        };

        match self.store.delete_recursive(&self.key, &id).await {
            Ok(tree) => {
                info!(file_id = %id, removed = tree.removed.len(), released = tree.released.len(), "deleteFile");
                ToolResult::ok(format!(
                    "Deleted {} \"{}\" ({} item(s) removed)",
                    node.kind,
                    node.name,
                    tree.removed.len()
                ))
            }
            Err(e) => ToolResult::error(format!("Error deleting file: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use polaris_store::FileStore;
    use serde_json::json;

    #[tokio::test]
    async fn deletes_folder_recursively() {
        let fx = fixture().await;
        let p = &fx.ctx.project_id;
        let src = fx.store.create_folder(&fx.key, p, None, "src").await.unwrap();
        let nested = fx.store.create_folder(&fx.key, p, Some(&src), "lib").await.unwrap();
        fx.store.create_file(&fx.key, p, Some(&nested), "a.js", "a").await.unwrap();
        fx.store.create_file(&fx.key, p, None, "keep.js", "k").await.unwrap();

        let result = fx.run("deleteFile", json!({"fileId": src.as_str()})).await;
        assert_eq!(result.content, "Deleted folder \"src\" (3 item(s) removed)");

        let left = fx.store.list_files_by_project(&fx.key, p).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "keep.js");
    }

    #[tokio::test]
    async fn missing_node_is_reported() {
        let fx = fixture().await;
        let result = fx.run("deleteFile", json!({"fileId": "file_gone"})).await;
        assert!(result.is_error);
        assert!(result.content.contains("not found"));
    }
}
