use tracing::instrument;

use polaris_core::conversation::{now_millis, Conversation, Project};
use polaris_core::ids::ProjectId;

use crate::conversations::insert_conversation;
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub struct ProjectRepo {
    db: Database,
}

impl ProjectRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(&self, name: &str) -> Result<Project, StoreError> {
        self.db.with_conn(|conn| insert_project(conn, name))
    }

    /// Create a project and its first conversation in one transaction.
    #[instrument(skip(self))]
    pub fn create_with_conversation(
        &self,
        name: &str,
        title: &str,
    ) -> Result<(Project, Conversation), StoreError> {
        self.db.with_tx(|tx| {
            let project = insert_project(tx, name)?;
            let conversation = insert_conversation(tx, &project.id, title)?;
            Ok((project, conversation))
        })
    }

    #[instrument(skip(self), fields(project_id = %id))]
    pub fn get(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, created_at FROM projects WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_project(row),
                None => Err(StoreError::NotFound(format!("project {id}"))),
            }
        })
    }

    pub fn exists(&self, id: &ProjectId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| project_exists(conn, id))
    }

    /// All projects, newest first.
    pub fn list(&self) -> Result<Vec<Project>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, created_at FROM projects ORDER BY created_at DESC, id DESC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_project(row)?);
            }
            Ok(out)
        })
    }
}

pub(crate) fn insert_project(conn: &rusqlite::Connection, name: &str) -> Result<Project, StoreError> {
    let project = Project {
        id: ProjectId::new(),
        name: name.to_string(),
        created_at: now_millis(),
    };
    conn.execute(
        "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![project.id.as_str(), project.name, project.created_at],
    )?;
    Ok(project)
}

pub(crate) fn project_exists(conn: &rusqlite::Connection, id: &ProjectId) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE id = ?1",
        [id.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_project(row: &rusqlite::Row<'_>) -> Result<Project, StoreError> {
    Ok(Project {
        id: ProjectId::from_raw(row_helpers::get::<String>(row, 0, "projects", "id")?),
        name: row_helpers::get(row, 1, "projects", "name")?,
        created_at: row_helpers::get(row, 2, "projects", "created_at")?,
    })
}
