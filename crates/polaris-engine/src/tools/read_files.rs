use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use polaris_core::ids::FileId;
use polaris_core::tools::{ToolContext, ToolResult};

use super::call::ReadFilesParams;
use super::FileToolset;

pub(super) const DESCRIPTION: &str = "Read the content of files from the project. Returns file contents.";

const NO_FILES_FOUND: &str = "Error: No files found with provided IDs. Use listFiles to get valid fileIDs.";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["fileIds"],
        "properties": {
            "fileIds": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Array of file IDs to read"
            }
        }
    })
}

#[derive(Serialize)]
struct ReadFile {
    id: FileId,
    name: String,
    content: String,
}

impl FileToolset {
    /// Lookups run concurrently. Missing, empty and failed lookups are
    /// dropped; only an entirely empty result is an error.
    pub(super) async fn read_files(&self, ctx: &ToolContext, params: ReadFilesParams) -> ToolResult {
        let ids = params.ids();
        let lookups = join_all(ids.iter().map(|id| self.find_node(ctx, id))).await;

        let mut files = Vec::new();
        let mut first_error = None;
        for (id, lookup) in ids.iter().zip(lookups) {
            match lookup {
                Ok(Some(node)) => {
                    if let Some(text) = node.text() {
                        files.push(ReadFile {
                            id: node.id.clone(),
                            name: node.name.clone(),
                            content: text.to_string(),
                        });
                    }
                }
                Ok(None) => debug!(file_id = %id, "readFiles: no such file"),
                Err(e) => {
                    debug!(file_id = %id, error = %e, "readFiles: lookup failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if files.is_empty() {
            return match first_error {
                Some(e) => ToolResult::error(format!("Error reading files: {e}")),
                None => ToolResult::error(NO_FILES_FOUND),
            };
        }
        match serde_json::to_string(&files) {
            Ok(json) => ToolResult::ok(json),
            Err(e) => ToolResult::error(format!("Error reading files: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use super::NO_FILES_FOUND;
    use polaris_store::FileStore;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_id_is_reported_not_raised() {
        let fx = fixture().await;
        let result = fx.run("readFiles", json!({"fileIds": ["bad-id"]})).await;
        assert!(result.is_error);
        assert_eq!(result.content, NO_FILES_FOUND);
    }

    #[tokio::test]
    async fn partial_success_drops_missing_and_empty() {
        let fx = fixture().await;
        let p = &fx.ctx.project_id;
        let a = fx.store.create_file(&fx.key, p, None, "a.js", "let a = 1;").await.unwrap();
        let empty = fx.store.create_file(&fx.key, p, None, "empty.js", "").await.unwrap();
        let folder = fx.store.create_folder(&fx.key, p, None, "src").await.unwrap();

        let result = fx
            .run(
                "readFiles",
                json!({"fileIds": [a.as_str(), "bad-id", empty.as_str(), folder.as_str()]}),
            )
            .await;
        assert!(!result.is_error);
        let files: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(files.as_array().unwrap().len(), 1);
        assert_eq!(files[0]["id"], a.as_str());
        assert_eq!(files[0]["name"], "a.js");
        assert_eq!(files[0]["content"], "let a = 1;");
    }

    #[tokio::test]
    async fn results_keep_request_order() {
        let fx = fixture().await;
        let p = &fx.ctx.project_id;
        let a = fx.store.create_file(&fx.key, p, None, "a.js", "A").await.unwrap();
        let b = fx.store.create_file(&fx.key, p, None, "b.js", "B").await.unwrap();

        let result = fx
            .run("readFiles", json!({"fileIds": [b.as_str(), a.as_str()]}))
            .await;
        let files: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(files[0]["content"], "B");
        assert_eq!(files[1]["content"], "A");
    }

    #[tokio::test]
    async fn other_projects_files_are_invisible() {
        let fx = fixture().await;
        let other = fx.other_project().await;
        let foreign = fx.store.create_file(&fx.key, &other, None, "secret.txt", "s").await.unwrap();

        let result = fx.run("readFiles", json!({"fileIds": [foreign.as_str()]})).await;
        assert_eq!(result.content, NO_FILES_FOUND);
    }
}
