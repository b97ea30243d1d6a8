use rusqlite::Connection;
use tracing::{debug, instrument};

use polaris_core::conversation::now_millis;
use polaris_core::ids::StorageId;

use crate::database::Database;
use crate::error::StoreError;

/// References to binary content held by an external blob store.
/// Only the reference lifecycle lives here; the bytes never do.
pub struct BlobRepo {
    db: Database,
}

impl BlobRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn register(&self, size_bytes: u64) -> Result<StorageId, StoreError> {
        self.db.with_conn(|conn| register_blob(conn, size_bytes))
    }

    pub fn exists(&self, id: &StorageId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM storage_blobs WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    #[instrument(skip(self), fields(storage_id = %id))]
    pub fn release(&self, id: &StorageId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| release_blob(conn, id))
    }
}

pub(crate) fn register_blob(conn: &Connection, size_bytes: u64) -> Result<StorageId, StoreError> {
    let id = StorageId::new();
    conn.execute(
        "INSERT INTO storage_blobs (id, size_bytes, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![id.as_str(), size_bytes as i64, now_millis()],
    )?;
    Ok(id)
}

/// Returns false when the reference was already gone.
pub(crate) fn release_blob(conn: &Connection, id: &StorageId) -> Result<bool, StoreError> {
    let removed = conn.execute("DELETE FROM storage_blobs WHERE id = ?1", [id.as_str()])?;
    debug!(storage_id = %id, removed, "blob released");
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_release() {
        let repo = BlobRepo::new(Database::in_memory().unwrap());
        let id = repo.register(2048).unwrap();
        assert!(repo.exists(&id).unwrap());
        assert!(repo.release(&id).unwrap());
        assert!(!repo.exists(&id).unwrap());
        assert!(!repo.release(&id).unwrap());
    }
}
