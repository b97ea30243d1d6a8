#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Sibling name collision. The payload is the user-facing sentence.
    #[error("{0}")]
    Conflict(String),

    /// A parent reference that is missing, in another project, or not a folder.
    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Transient failures worth retrying at step granularity.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(detail) => {
                let d = detail.to_ascii_lowercase();
                d.contains("locked") || d.contains("busy")
            }
            Self::Io(_) => true,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_displays_bare_sentence() {
        let err = StoreError::Conflict("Folder already exists".into());
        assert_eq!(err.to_string(), "Folder already exists");
    }

    #[test]
    fn busy_database_is_retryable() {
        assert!(StoreError::Database("database is locked".into()).is_retryable());
        assert!(!StoreError::Database("no such table: files".into()).is_retryable());
        assert!(!StoreError::NotFound("conversation".into()).is_retryable());
        assert!(!StoreError::Unauthorized("Invalid internal key".into()).is_retryable());
    }
}
