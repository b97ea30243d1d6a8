pub mod blobs;
pub mod conversations;
pub mod database;
pub mod error;
pub mod files;
pub mod jobs;
pub mod projects;
pub mod row_helpers;
pub mod schema;
pub mod system;

pub use database::Database;
pub use error::StoreError;
pub use system::{ConversationStore, FileStore, SystemStore};
