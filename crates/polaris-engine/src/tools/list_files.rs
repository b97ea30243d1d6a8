use serde::Serialize;
use serde_json::{json, Value};

use polaris_core::files::{sort_nodes, NodeKind};
use polaris_core::ids::FileId;
use polaris_core::tools::{ToolContext, ToolResult};

use super::FileToolset;

pub(super) const DESCRIPTION: &str = "List all files and folders in the project. Returns names, IDs, types, and parentId for each item. Items with parentId: null are at root level. Use the parentId to understand the folder structure - items with the same parentId are in the same folder.";

pub(super) fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {}
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListedNode<'a> {
    id: &'a FileId,
    name: &'a str,
    #[serde(rename = "type")]
    kind: NodeKind,
    parent_id: Option<&'a FileId>,
}

impl FileToolset {
    pub(super) async fn list_files(&self, ctx: &ToolContext) -> ToolResult {
        let mut nodes = match self.store.list_files_by_project(&self.key, &ctx.project_id).await {
            Ok(nodes) => nodes,
            Err(e) => return ToolResult::error(format!("Error listing files: {e}")),
        };
        sort_nodes(&mut nodes);

        let listed: Vec<ListedNode<'_>> = nodes
            .iter()
            .map(|n| ListedNode {
                id: &n.id,
                name: &n.name,
                kind: n.kind,
                parent_id: n.parent_id.as_ref(),
            })
            .collect();
        match serde_json::to_string(&listed) {
            Ok(json) => ToolResult::ok(json),
            Err(e) => ToolResult::error(format!("Error listing files: {e}")),
        }
    }
}
