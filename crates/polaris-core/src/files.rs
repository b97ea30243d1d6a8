use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{FileId, ProjectId, StorageId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "folder" => Ok(Self::Folder),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// A file or folder in a project tree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub id: FileId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub parent_id: Option<FileId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_id: Option<StorageId>,
    pub updated_at: i64,
}

impl FileNode {
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Text content, if this is a file with non-empty content.
    pub fn text(&self) -> Option<&str> {
        match (&self.kind, self.content.as_deref()) {
            (NodeKind::File, Some(c)) if !c.is_empty() => Some(c),
            _ => None,
        }
    }
}

/// Folders first, then by name.
pub fn compare_nodes(a: &FileNode, b: &FileNode) -> Ordering {
    match (a.kind, b.kind) {
        (NodeKind::Folder, NodeKind::File) => Ordering::Less,
        (NodeKind::File, NodeKind::Folder) => Ordering::Greater,
        _ => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
    }
}

pub fn sort_nodes(nodes: &mut [FileNode]) {
    nodes.sort_by(compare_nodes);
}

/// One entry of a batch file creation request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewFile {
    pub name: String,
    pub content: String,
}

/// Per-item result of a batch file creation. Collisions carry the id of the
/// existing sibling plus an error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileOutcome {
    pub name: String,
    pub file_id: FileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
