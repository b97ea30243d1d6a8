//! Typed tool calls.
//!
//! Raw model arguments are decoded into one variant per tool and validated
//! before any side effect. Missing string fields decode as empty so that the
//! validation sentence, not a serde message, is what the model sees.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use polaris_core::files::NewFile;
use polaris_core::ids::FileId;
use polaris_core::tools::ToolError;

pub const LIST_FILES: &str = "listFiles";
pub const READ_FILES: &str = "readFiles";
pub const CREATE_FILES: &str = "createFiles";
pub const CREATE_FOLDER: &str = "createFolder";
pub const UPDATE_FILE: &str = "updateFile";
pub const RENAME_FILE: &str = "renameFile";
pub const DELETE_FILE: &str = "deleteFile";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileToolCall {
    ListFiles,
    ReadFiles(ReadFilesParams),
    CreateFiles(CreateFilesParams),
    CreateFolder(CreateFolderParams),
    UpdateFile(UpdateFileParams),
    RenameFile(RenameFileParams),
    DeleteFile(DeleteFileParams),
}

impl FileToolCall {
    /// Decode and validate the arguments of a named call.
    pub fn parse(tool_name: &str, args: Value) -> Result<Self, ToolError> {
        match tool_name {
            LIST_FILES => Ok(Self::ListFiles),
            READ_FILES => parse_params(args).map(Self::ReadFiles),
            CREATE_FILES => parse_params(args).map(Self::CreateFiles),
            CREATE_FOLDER => parse_params(args).map(Self::CreateFolder),
            UPDATE_FILE => parse_params(args).map(Self::UpdateFile),
            RENAME_FILE => parse_params(args).map(Self::RenameFile),
            DELETE_FILE => parse_params(args).map(Self::DeleteFile),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ListFiles => LIST_FILES,
            Self::ReadFiles(_) => READ_FILES,
            Self::CreateFiles(_) => CREATE_FILES,
            Self::CreateFolder(_) => CREATE_FOLDER,
            Self::UpdateFile(_) => UPDATE_FILE,
            Self::RenameFile(_) => RENAME_FILE,
            Self::DeleteFile(_) => DELETE_FILE,
        }
    }
}

trait Validate {
    fn validate(&self) -> Result<(), &'static str>;
}

fn parse_params<T: DeserializeOwned + Validate>(args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    let params: T = serde_json::from_value(args)
        .map_err(|e| ToolError::InvalidArguments(format!("Invalid arguments: {e}")))?;
    params
        .validate()
        .map_err(|msg| ToolError::InvalidArguments(msg.to_string()))?;
    Ok(params)
}

/// An empty parent id means the project root.
fn parent_of(raw: &str) -> Option<FileId> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| FileId::from_raw(raw))
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFilesParams {
    #[serde(default)]
    pub file_ids: Vec<String>,
}

impl Validate for ReadFilesParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.file_ids.is_empty() {
            return Err("Provide at least one file ID");
        }
        if self.file_ids.iter().any(|id| id.is_empty()) {
            return Err("File ID cannot be empty");
        }
        Ok(())
    }
}

impl ReadFilesParams {
    pub fn ids(&self) -> Vec<FileId> {
        self.file_ids.iter().map(FileId::from_raw).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFilesParams {
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FileSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
}

impl Validate for CreateFilesParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.files.is_empty() {
            return Err("Provide at least one file to create");
        }
        if self.files.iter().any(|f| f.name.is_empty()) {
            return Err("File name cannot be empty");
        }
        Ok(())
    }
}

impl CreateFilesParams {
    pub fn parent(&self) -> Option<FileId> {
        parent_of(&self.parent_id)
    }

    pub fn new_files(&self) -> Vec<NewFile> {
        self.files
            .iter()
            .map(|f| NewFile {
                name: f.name.clone(),
                content: f.content.clone(),
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_id: String,
}

impl Validate for CreateFolderParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("Folder name is required");
        }
        Ok(())
    }
}

impl CreateFolderParams {
    pub fn parent(&self) -> Option<FileId> {
        parent_of(&self.parent_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileParams {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub content: String,
}

impl Validate for UpdateFileParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.file_id.is_empty() {
            return Err("File ID is required");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFileParams {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub new_name: String,
}

impl Validate for RenameFileParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.file_id.is_empty() {
            return Err("File ID is required");
        }
        if self.new_name.is_empty() {
            return Err("New name is required");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileParams {
    #[serde(default)]
    pub file_id: String,
}

impl Validate for DeleteFileParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.file_id.is_empty() {
            return Err("File ID is required");
        }
        Ok(())
    }
}
