use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{debug, instrument};

use polaris_core::conversation::now_millis;
use polaris_core::files::{sort_nodes, CreateFileOutcome, FileNode, NewFile, NodeKind};
use polaris_core::ids::{FileId, ProjectId, StorageId};

use crate::blobs::{register_blob, release_blob};
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const FILE_COLUMNS: &str = "id, project_id, parent_id, name, type, content, storage_id, updated_at";

/// Nodes removed by a recursive delete, children before parents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletedTree {
    pub removed: Vec<FileId>,
    pub released: Vec<StorageId>,
}

/// The per-project file tree.
///
/// Sibling `(name, type)` pairs are unique; a unique index backs the
/// explicit checks so concurrent writers cannot race past them.
pub struct FileRepo {
    db: Database,
}

impl FileRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(file_id = %id))]
    pub fn get(&self, id: &FileId) -> Result<Option<FileNode>, StoreError> {
        self.db.with_conn(|conn| find_node(conn, id))
    }

    /// Every node in the project, folders first then by name.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<FileNode>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1");
            let mut nodes = query_nodes(conn, &sql, rusqlite::params![project_id.as_str()])?;
            sort_nodes(&mut nodes);
            Ok(nodes)
        })
    }

    /// Direct children of `parent_id` (root when `None`), folders first then by name.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn list_by_parent(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
    ) -> Result<Vec<FileNode>, StoreError> {
        self.db.with_conn(|conn| {
            let mut nodes = children_of(conn, project_id, parent_id)?;
            sort_nodes(&mut nodes);
            Ok(nodes)
        })
    }

    #[instrument(skip(self, content), fields(project_id = %project_id))]
    pub fn create_file(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
        content: &str,
    ) -> Result<FileNode, StoreError> {
        self.db.with_tx(|tx| {
            validate_parent(tx, project_id, parent_id)?;
            if find_sibling(tx, project_id, parent_id, name, NodeKind::File)?.is_some() {
                return Err(StoreError::Conflict("File already exists".into()));
            }
            insert_node(tx, project_id, parent_id, name, NodeKind::File, Some(content), None)
        })
    }

    /// Create several files under one parent. Collisions are reported per
    /// item and do not stop the rest of the batch.
    #[instrument(skip(self, files), fields(project_id = %project_id, count = files.len()))]
    pub fn create_files(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        files: &[NewFile],
    ) -> Result<Vec<CreateFileOutcome>, StoreError> {
        self.db.with_tx(|tx| {
            validate_parent(tx, project_id, parent_id)?;
            let mut results = Vec::with_capacity(files.len());
            for file in files {
                if let Some(existing) = find_sibling(tx, project_id, parent_id, &file.name, NodeKind::File)? {
                    results.push(CreateFileOutcome {
                        name: file.name.clone(),
                        file_id: existing,
                        error: Some("File already exists".into()),
                    });
                    continue;
                }
                let node = insert_node(
                    tx,
                    project_id,
                    parent_id,
                    &file.name,
                    NodeKind::File,
                    Some(&file.content),
                    None,
                )?;
                results.push(CreateFileOutcome {
                    name: file.name.clone(),
                    file_id: node.id,
                    error: None,
                });
            }
            Ok(results)
        })
    }

    /// Create a file whose bytes live in the blob store.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn create_binary_file(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
        size_bytes: u64,
    ) -> Result<FileNode, StoreError> {
        self.db.with_tx(|tx| {
            validate_parent(tx, project_id, parent_id)?;
            if find_sibling(tx, project_id, parent_id, name, NodeKind::File)?.is_some() {
                return Err(StoreError::Conflict("File already exists".into()));
            }
            let storage_id = register_blob(tx, size_bytes)?;
            insert_node(tx, project_id, parent_id, name, NodeKind::File, None, Some(&storage_id))
        })
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn create_folder(
        &self,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
    ) -> Result<FileNode, StoreError> {
        self.db.with_tx(|tx| {
            validate_parent(tx, project_id, parent_id)?;
            if find_sibling(tx, project_id, parent_id, name, NodeKind::Folder)?.is_some() {
                return Err(StoreError::Conflict("Folder already exists".into()));
            }
            insert_node(tx, project_id, parent_id, name, NodeKind::Folder, None, None)
        })
    }

    /// Rename a node. Only a sibling of the same kind blocks the new name.
    #[instrument(skip(self), fields(file_id = %id))]
    pub fn rename(&self, id: &FileId, new_name: &str) -> Result<FileNode, StoreError> {
        self.db.with_tx(|tx| {
            let mut node = find_node(tx, id)?.ok_or_else(|| StoreError::NotFound("File not found".into()))?;
            if let Some(existing) =
                find_sibling(tx, &node.project_id, node.parent_id.as_ref(), new_name, node.kind)?
            {
                if existing != node.id {
                    return Err(StoreError::Conflict(format!(
                        "A {} named \"{}\" already exists",
                        node.kind, new_name
                    )));
                }
            }
            let now = now_millis();
            let _ = tx.execute(
                "UPDATE files SET name = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![new_name, now, id.as_str()],
            )?;
            node.name = new_name.to_string();
            node.updated_at = now;
            Ok(node)
        })
    }

    /// Overwrite a file's text content.
    #[instrument(skip(self, content), fields(file_id = %id))]
    pub fn update_content(&self, id: &FileId, content: &str) -> Result<FileNode, StoreError> {
        self.db.with_tx(|tx| {
            let mut node = find_node(tx, id)?.ok_or_else(|| StoreError::NotFound("File not found".into()))?;
            if node.is_folder() {
                return Err(StoreError::Conflict(format!(
                    "\"{id}\" is a folder, not a file"
                )));
            }
            let now = now_millis();
            let _ = tx.execute(
                "UPDATE files SET content = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![content, now, id.as_str()],
            )?;
            node.content = Some(content.to_string());
            node.updated_at = now;
            Ok(node)
        })
    }

    /// Delete a node and all of its descendants in one transaction.
    ///
    /// Walks the tree with an explicit stack, then removes nodes in reverse
    /// discovery order so every child goes before its parent. Blob references
    /// are released before the owning row is deleted.
    #[instrument(skip(self), fields(file_id = %id))]
    pub fn delete_recursive(&self, id: &FileId) -> Result<DeletedTree, StoreError> {
        self.db.with_tx(|tx| {
            let root = find_node(tx, id)?.ok_or_else(|| StoreError::NotFound("File not found".into()))?;

            let mut seen: HashSet<FileId> = HashSet::new();
            let mut order: Vec<FileNode> = Vec::new();
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                if !seen.insert(node.id.clone()) {
                    continue;
                }
                if node.is_folder() {
                    stack.extend(children_of(tx, &node.project_id, Some(&node.id))?);
                }
                order.push(node);
            }

            let mut report = DeletedTree::default();
            for node in order.into_iter().rev() {
                if let Some(storage_id) = &node.storage_id {
                    if release_blob(tx, storage_id)? {
                        report.released.push(storage_id.clone());
                    }
                }
                let _ = tx.execute("DELETE FROM files WHERE id = ?1", [node.id.as_str()])?;
                report.removed.push(node.id);
            }
            debug!(removed = report.removed.len(), released = report.released.len(), "tree deleted");
            Ok(report)
        })
    }
}

fn validate_parent(
    conn: &Connection,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
) -> Result<(), StoreError> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };
    match find_node(conn, parent_id)? {
        Some(parent) if parent.project_id != *project_id => Err(StoreError::InvalidParent(format!(
            "Parent folder with ID \"{parent_id}\" not found"
        ))),
        Some(parent) if !parent.is_folder() => Err(StoreError::InvalidParent(format!(
            "The ID \"{parent_id}\" is a file, not a folder"
        ))),
        Some(_) => Ok(()),
        None => Err(StoreError::InvalidParent(format!(
            "Parent folder with ID \"{parent_id}\" not found"
        ))),
    }
}

fn find_sibling(
    conn: &Connection,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
    name: &str,
    kind: NodeKind,
) -> Result<Option<FileId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM files
         WHERE project_id = ?1 AND IFNULL(parent_id, '') = IFNULL(?2, '') AND name = ?3 AND type = ?4",
    )?;
    let mut rows = stmt.query(rusqlite::params![
        project_id.as_str(),
        parent_id.map(FileId::as_str),
        name,
        kind.as_str(),
    ])?;
    match rows.next()? {
        Some(row) => Ok(Some(FileId::from_raw(row_helpers::get::<String>(row, 0, "files", "id")?))),
        None => Ok(None),
    }
}

fn insert_node(
    conn: &Connection,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
    name: &str,
    kind: NodeKind,
    content: Option<&str>,
    storage_id: Option<&StorageId>,
) -> Result<FileNode, StoreError> {
    let node = FileNode {
        id: FileId::new(),
        project_id: project_id.clone(),
        parent_id: parent_id.cloned(),
        name: name.to_string(),
        kind,
        content: content.map(str::to_string),
        storage_id: storage_id.cloned(),
        updated_at: now_millis(),
    };
    conn.execute(
        "INSERT INTO files (id, project_id, parent_id, name, type, content, storage_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            node.id.as_str(),
            node.project_id.as_str(),
            node.parent_id.as_ref().map(FileId::as_str),
            node.name,
            node.kind.as_str(),
            node.content,
            node.storage_id.as_ref().map(StorageId::as_str),
            node.updated_at,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Conflict(match kind {
                NodeKind::File => "File already exists".into(),
                NodeKind::Folder => "Folder already exists".into(),
            })
        }
        other => StoreError::from(other),
    })?;
    Ok(node)
}

fn find_node(conn: &Connection, id: &FileId) -> Result<Option<FileNode>, StoreError> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
    let mut nodes = query_nodes(conn, &sql, rusqlite::params![id.as_str()])?;
    Ok(nodes.pop())
}

fn children_of(
    conn: &Connection,
    project_id: &ProjectId,
    parent_id: Option<&FileId>,
) -> Result<Vec<FileNode>, StoreError> {
    let sql = format!(
        "SELECT {FILE_COLUMNS} FROM files
         WHERE project_id = ?1 AND IFNULL(parent_id, '') = IFNULL(?2, '')"
    );
    query_nodes(
        conn,
        &sql,
        rusqlite::params![project_id.as_str(), parent_id.map(FileId::as_str)],
    )
}

fn query_nodes(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<FileNode>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_node(row)?);
    }
    Ok(out)
}

fn row_to_node(row: &rusqlite::Row<'_>) -> Result<FileNode, StoreError> {
    let kind: String = row_helpers::get(row, 4, "files", "type")?;
    Ok(FileNode {
        id: FileId::from_raw(row_helpers::get::<String>(row, 0, "files", "id")?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 1, "files", "project_id")?),
        parent_id: row_helpers::get_opt::<String>(row, 2, "files", "parent_id")?.map(FileId::from_raw),
        name: row_helpers::get(row, 3, "files", "name")?,
        kind: row_helpers::parse_enum(&kind, "files", "type")?,
        content: row_helpers::get_opt(row, 5, "files", "content")?,
        storage_id: row_helpers::get_opt::<String>(row, 6, "files", "storage_id")?.map(StorageId::from_raw),
        updated_at: row_helpers::get(row, 7, "files", "updated_at")?,
    })
}
