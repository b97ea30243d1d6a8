//! File tools exposed to the agent.
//!
//! Every operation answers with a string: a JSON payload on success or a
//! readable error sentence. Store faults are caught here and never reach
//! the router as errors.

pub mod call;
mod create_files;
mod create_folder;
mod delete_file;
mod list_files;
mod read_files;
mod rename_file;
mod update_file;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use polaris_core::files::FileNode;
use polaris_core::ids::FileId;
use polaris_core::security::InternalKey;
use polaris_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use polaris_store::{FileStore, StoreError};

use crate::registry::ToolRegistry;

pub use call::FileToolCall;

/// The seven file operations, one registered tool each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileOp {
    ListFiles,
    ReadFiles,
    CreateFiles,
    CreateFolder,
    UpdateFile,
    RenameFile,
    DeleteFile,
}

impl FileOp {
    const ALL: [FileOp; 7] = [
        FileOp::ListFiles,
        FileOp::ReadFiles,
        FileOp::CreateFiles,
        FileOp::CreateFolder,
        FileOp::UpdateFile,
        FileOp::RenameFile,
        FileOp::DeleteFile,
    ];

    fn name(self) -> &'static str {
        match self {
            FileOp::ListFiles => call::LIST_FILES,
            FileOp::ReadFiles => call::READ_FILES,
            FileOp::CreateFiles => call::CREATE_FILES,
            FileOp::CreateFolder => call::CREATE_FOLDER,
            FileOp::UpdateFile => call::UPDATE_FILE,
            FileOp::RenameFile => call::RENAME_FILE,
            FileOp::DeleteFile => call::DELETE_FILE,
        }
    }

    fn description(self) -> &'static str {
        match self {
            FileOp::ListFiles => list_files::DESCRIPTION,
            FileOp::ReadFiles => read_files::DESCRIPTION,
            FileOp::CreateFiles => create_files::DESCRIPTION,
            FileOp::CreateFolder => create_folder::DESCRIPTION,
            FileOp::UpdateFile => update_file::DESCRIPTION,
            FileOp::RenameFile => rename_file::DESCRIPTION,
            FileOp::DeleteFile => delete_file::DESCRIPTION,
        }
    }

    fn schema(self) -> Value {
        match self {
            FileOp::ListFiles => list_files::schema(),
            FileOp::ReadFiles => read_files::schema(),
            FileOp::CreateFiles => create_files::schema(),
            FileOp::CreateFolder => create_folder::schema(),
            FileOp::UpdateFile => update_file::schema(),
            FileOp::RenameFile => rename_file::schema(),
            FileOp::DeleteFile => delete_file::schema(),
        }
    }
}

/// File operations bound to one store and credential. Cheap to clone.
#[derive(Clone)]
pub struct FileToolset {
    store: Arc<dyn FileStore>,
    key: InternalKey,
}

impl FileToolset {
    pub fn new(store: Arc<dyn FileStore>, key: InternalKey) -> Self {
        Self { store, key }
    }

    /// A registry holding every file tool.
    pub fn registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for op in FileOp::ALL {
            registry.register(Arc::new(FileTool {
                op,
                toolset: self.clone(),
            }));
        }
        registry
    }

    /// Run a validated call against the project in `ctx`.
    #[instrument(skip(self, call, ctx), fields(tool = call.tool_name(), project_id = %ctx.project_id))]
    pub async fn execute(&self, call: FileToolCall, ctx: &ToolContext) -> ToolResult {
        match call {
            FileToolCall::ListFiles => self.list_files(ctx).await,
            FileToolCall::ReadFiles(p) => self.read_files(ctx, p).await,
            FileToolCall::CreateFiles(p) => self.create_files(ctx, p).await,
            FileToolCall::CreateFolder(p) => self.create_folder(ctx, p).await,
            FileToolCall::UpdateFile(p) => self.update_file(ctx, p).await,
            FileToolCall::RenameFile(p) => self.rename_file(ctx, p).await,
            FileToolCall::DeleteFile(p) => self.delete_file(ctx, p).await,
        }
    }

    /// A node of this project. Nodes of other projects read as missing.
    async fn find_node(&self, ctx: &ToolContext, id: &FileId) -> Result<Option<FileNode>, StoreError> {
        let node = self.store.get_file(&self.key, id).await?;
        Ok(node.filter(|n| n.project_id == ctx.project_id))
    }

    /// Check that `parent` names a folder of this project. The error is the
    /// sentence for the model.
    async fn check_parent(&self, ctx: &ToolContext, parent: Option<&FileId>) -> Result<(), ToolResult> {
        let Some(parent) = parent else {
            return Ok(());
        };
        match self.find_node(ctx, parent).await {
            Ok(Some(node)) if node.is_folder() => Ok(()),
            Ok(Some(_)) => Err(ToolResult::error(format!(
                "Error: The ID \"{parent}\" is a file, not a folder. Use a folder ID as parentId."
            ))),
            Ok(None) => Err(ToolResult::error(format!(
                "Error: Parent folder with ID \"{parent}\" not found. Use listFiles to get valid folder IDs."
            ))),
            Err(e) => {
                debug!(error = %e, parent_id = %parent, "parent lookup failed");
                Err(ToolResult::error(format!(
                    "Error: Invalid parentId \"{parent}\". Use listFiles to get valid folder IDs, or use empty string for root level."
                )))
            }
        }
    }
}

/// Adapter exposing one file operation through the [`Tool`] trait.
struct FileTool {
    op: FileOp,
    toolset: FileToolset,
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    fn parameters_schema(&self) -> Value {
        self.op.schema()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let call = FileToolCall::parse(self.op.name(), args)?;
        let start = Instant::now();
        let result = self.toolset.execute(call, ctx).await;
        Ok(result.with_duration(start.elapsed()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use polaris_core::conversation::DEFAULT_CONVERSATION_TITLE;
    use polaris_core::ids::{MessageId, ProjectId};
    use polaris_store::{ConversationStore, Database, SystemStore};
    use tokio_util::sync::CancellationToken;

    pub const KEY: &str = "test-internal-key";

    pub struct Fixture {
        pub store: Arc<SystemStore>,
        pub key: InternalKey,
        pub toolset: FileToolset,
        pub ctx: ToolContext,
    }

    pub async fn fixture() -> Fixture {
        let store = Arc::new(SystemStore::new(
            Database::in_memory().unwrap(),
            Some(InternalKey::new(KEY)),
        ));
        let key = InternalKey::new(KEY);
        let (project, _) = store
            .create_project_with_conversation(&key, "demo", DEFAULT_CONVERSATION_TITLE)
            .await
            .unwrap();
        let toolset = FileToolset::new(store.clone(), key.clone());
        let ctx = ToolContext {
            project_id: project.id,
            message_id: MessageId::new(),
            abort_signal: CancellationToken::new(),
        };
        Fixture { store, key, toolset, ctx }
    }

    impl Fixture {
        pub async fn other_project(&self) -> ProjectId {
            let (project, _) = self
                .store
                .create_project_with_conversation(&self.key, "other", DEFAULT_CONVERSATION_TITLE)
                .await
                .unwrap();
            project.id
        }

        pub async fn run(&self, name: &str, args: Value) -> ToolResult {
            match FileToolCall::parse(name, args) {
                Ok(call) => self.toolset.execute(call, &self.ctx).await,
                Err(e) => e.into(),
            }
        }
    }
}
