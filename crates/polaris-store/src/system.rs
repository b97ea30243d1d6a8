//! Trust-boundary facade over the repositories.
//!
//! Every call carries the caller's [`InternalKey`]; it is checked against the
//! key this store was configured with before any read or write happens.

use async_trait::async_trait;
use tracing::warn;

use polaris_core::conversation::{ChatMessage, Conversation, MessageRole, MessageStatus, Project};
use polaris_core::files::{CreateFileOutcome, FileNode, NewFile};
use polaris_core::ids::{ConversationId, FileId, MessageId, ProjectId};
use polaris_core::security::InternalKey;

use crate::conversations::ConversationRepo;
use crate::database::Database;
use crate::error::StoreError;
use crate::files::{DeletedTree, FileRepo};
use crate::jobs::JobRepo;
use crate::projects::ProjectRepo;

/// Durable record of conversations and messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(
        &self,
        key: &InternalKey,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn create_message(
        &self,
        key: &InternalKey,
        conversation_id: &ConversationId,
        project_id: &ProjectId,
        role: MessageRole,
        content: &str,
        status: Option<MessageStatus>,
    ) -> Result<MessageId, StoreError>;

    /// User message plus processing placeholder, written atomically.
    /// Returns `(user_message_id, placeholder_id)`.
    async fn create_exchange(
        &self,
        key: &InternalKey,
        conversation_id: &ConversationId,
        project_id: &ProjectId,
        content: &str,
    ) -> Result<(MessageId, MessageId), StoreError>;

    async fn get_message(
        &self,
        key: &InternalKey,
        id: &MessageId,
    ) -> Result<Option<ChatMessage>, StoreError>;

    /// Replace content and mark completed. Returns false when skipped
    /// because the message was already cancelled.
    async fn update_message_content(
        &self,
        key: &InternalKey,
        id: &MessageId,
        content: &str,
    ) -> Result<bool, StoreError>;

    /// Replace content and clear the status. Same skip rule as completion.
    async fn fail_message(
        &self,
        key: &InternalKey,
        id: &MessageId,
        content: &str,
    ) -> Result<bool, StoreError>;

    async fn update_message_status(
        &self,
        key: &InternalKey,
        id: &MessageId,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError>;

    /// Processing to cancelled only. Returns whether the flip applied.
    async fn cancel_message(&self, key: &InternalKey, id: &MessageId) -> Result<bool, StoreError>;

    /// The last `limit` messages, oldest first.
    async fn get_recent_messages(
        &self,
        key: &InternalKey,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn update_conversation_title(
        &self,
        key: &InternalKey,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError>;

    async fn get_processing_messages(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn create_conversation(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        title: &str,
    ) -> Result<Conversation, StoreError>;

    async fn create_project_with_conversation(
        &self,
        key: &InternalKey,
        name: &str,
        title: &str,
    ) -> Result<(Project, Conversation), StoreError>;
}

/// Hierarchical file tree per project.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get_file(&self, key: &InternalKey, id: &FileId) -> Result<Option<FileNode>, StoreError>;

    async fn list_files_by_project(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
    ) -> Result<Vec<FileNode>, StoreError>;

    async fn list_files_by_parent(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
    ) -> Result<Vec<FileNode>, StoreError>;

    async fn create_file(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
        content: &str,
    ) -> Result<FileId, StoreError>;

    async fn create_files(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        files: &[NewFile],
    ) -> Result<Vec<CreateFileOutcome>, StoreError>;

    async fn create_folder(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
    ) -> Result<FileId, StoreError>;

    async fn rename_file(
        &self,
        key: &InternalKey,
        id: &FileId,
        new_name: &str,
    ) -> Result<FileId, StoreError>;

    async fn update_file_content(
        &self,
        key: &InternalKey,
        id: &FileId,
        content: &str,
    ) -> Result<FileId, StoreError>;

    async fn delete_recursive(&self, key: &InternalKey, id: &FileId) -> Result<DeletedTree, StoreError>;
}

/// SQLite-backed implementation of both store contracts.
#[derive(Clone)]
pub struct SystemStore {
    db: Database,
    expected_key: Option<InternalKey>,
}

impl SystemStore {
    /// `expected_key` is the configured secret; `None` makes every call fail
    /// with a configuration error.
    pub fn new(db: Database, expected_key: Option<InternalKey>) -> Self {
        Self { db, expected_key }
    }

    /// The job journal and trigger outbox share this store's database.
    pub fn jobs(&self) -> JobRepo {
        JobRepo::new(self.db.clone())
    }

    fn conversations(&self) -> ConversationRepo {
        ConversationRepo::new(self.db.clone())
    }

    fn files(&self) -> FileRepo {
        FileRepo::new(self.db.clone())
    }

    fn validate(&self, key: &InternalKey) -> Result<(), StoreError> {
        let Some(expected) = &self.expected_key else {
            warn!("internal key is not configured");
            return Err(StoreError::Configuration("Internal key not found".into()));
        };
        if !expected.matches(key) {
            warn!("rejected call with invalid internal key");
            return Err(StoreError::Unauthorized("Invalid internal key".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SystemStore {
    async fn get_conversation(
        &self,
        key: &InternalKey,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        self.validate(key)?;
        self.conversations().find(id)
    }

    async fn create_message(
        &self,
        key: &InternalKey,
        conversation_id: &ConversationId,
        project_id: &ProjectId,
        role: MessageRole,
        content: &str,
        status: Option<MessageStatus>,
    ) -> Result<MessageId, StoreError> {
        self.validate(key)?;
        let message = self
            .conversations()
            .create_message(conversation_id, project_id, role, content, status)?;
        Ok(message.id)
    }

    async fn create_exchange(
        &self,
        key: &InternalKey,
        conversation_id: &ConversationId,
        project_id: &ProjectId,
        content: &str,
    ) -> Result<(MessageId, MessageId), StoreError> {
        self.validate(key)?;
        let (user, placeholder) = self
            .conversations()
            .create_exchange(conversation_id, project_id, content)?;
        Ok((user.id, placeholder.id))
    }

    async fn get_message(
        &self,
        key: &InternalKey,
        id: &MessageId,
    ) -> Result<Option<ChatMessage>, StoreError> {
        self.validate(key)?;
        self.conversations().get_message(id)
    }

    async fn update_message_content(
        &self,
        key: &InternalKey,
        id: &MessageId,
        content: &str,
    ) -> Result<bool, StoreError> {
        self.validate(key)?;
        self.conversations().complete_message(id, content)
    }

    async fn fail_message(
        &self,
        key: &InternalKey,
        id: &MessageId,
        content: &str,
    ) -> Result<bool, StoreError> {
        self.validate(key)?;
        self.conversations().fail_message(id, content)
    }

    async fn update_message_status(
        &self,
        key: &InternalKey,
        id: &MessageId,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError> {
        self.validate(key)?;
        self.conversations().update_message_status(id, status)
    }

    async fn cancel_message(&self, key: &InternalKey, id: &MessageId) -> Result<bool, StoreError> {
        self.validate(key)?;
        self.conversations().cancel_message(id)
    }

    async fn get_recent_messages(
        &self,
        key: &InternalKey,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.validate(key)?;
        self.conversations().recent_messages(conversation_id, limit)
    }

    async fn update_conversation_title(
        &self,
        key: &InternalKey,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), StoreError> {
        self.validate(key)?;
        self.conversations().update_title(id, title)
    }

    async fn get_processing_messages(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.validate(key)?;
        self.conversations().processing_messages(project_id)
    }

    async fn create_conversation(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        self.validate(key)?;
        self.conversations().create(project_id, title)
    }

    async fn create_project_with_conversation(
        &self,
        key: &InternalKey,
        name: &str,
        title: &str,
    ) -> Result<(Project, Conversation), StoreError> {
        self.validate(key)?;
        ProjectRepo::new(self.db.clone()).create_with_conversation(name, title)
    }
}

#[async_trait]
impl FileStore for SystemStore {
    async fn get_file(&self, key: &InternalKey, id: &FileId) -> Result<Option<FileNode>, StoreError> {
        self.validate(key)?;
        self.files().get(id)
    }

    async fn list_files_by_project(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
    ) -> Result<Vec<FileNode>, StoreError> {
        self.validate(key)?;
        self.files().list_by_project(project_id)
    }

    async fn list_files_by_parent(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
    ) -> Result<Vec<FileNode>, StoreError> {
        self.validate(key)?;
        self.files().list_by_parent(project_id, parent_id)
    }

    async fn create_file(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
        content: &str,
    ) -> Result<FileId, StoreError> {
        self.validate(key)?;
        Ok(self.files().create_file(project_id, parent_id, name, content)?.id)
    }

    async fn create_files(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        files: &[NewFile],
    ) -> Result<Vec<CreateFileOutcome>, StoreError> {
        self.validate(key)?;
        self.files().create_files(project_id, parent_id, files)
    }

    async fn create_folder(
        &self,
        key: &InternalKey,
        project_id: &ProjectId,
        parent_id: Option<&FileId>,
        name: &str,
    ) -> Result<FileId, StoreError> {
        self.validate(key)?;
        Ok(self.files().create_folder(project_id, parent_id, name)?.id)
    }

    async fn rename_file(
        &self,
        key: &InternalKey,
        id: &FileId,
        new_name: &str,
    ) -> Result<FileId, StoreError> {
        self.validate(key)?;
        Ok(self.files().rename(id, new_name)?.id)
    }

    async fn update_file_content(
        &self,
        key: &InternalKey,
        id: &FileId,
        content: &str,
    ) -> Result<FileId, StoreError> {
        self.validate(key)?;
        Ok(self.files().update_content(id, content)?.id)
    }

    async fn delete_recursive(&self, key: &InternalKey, id: &FileId) -> Result<DeletedTree, StoreError> {
        self.validate(key)?;
        self.files().delete_recursive(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_core::conversation::DEFAULT_CONVERSATION_TITLE;

    fn store(key: Option<&str>) -> SystemStore {
        SystemStore::new(Database::in_memory().unwrap(), key.map(InternalKey::new))
    }

    #[tokio::test]
    async fn missing_configured_key_is_configuration_error() {
        let store = store(None);
        let err = store
            .get_conversation(&InternalKey::new("anything"), &ConversationId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert_eq!(err.to_string(), "Internal key not found");
    }

    #[tokio::test]
    async fn wrong_key_is_unauthorized() {
        let store = store(Some("right"));
        let err = store
            .list_files_by_project(&InternalKey::new("wrong"), &ProjectId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert_eq!(err.to_string(), "Invalid internal key");
    }

    #[tokio::test]
    async fn rejected_write_has_no_effect() {
        let store = store(Some("right"));
        let good = InternalKey::new("right");
        let (project, _) = store
            .create_project_with_conversation(&good, "p", DEFAULT_CONVERSATION_TITLE)
            .await
            .unwrap();

        let err = store
            .create_folder(&InternalKey::new("wrong"), &project.id, None, "src")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
        assert!(store
            .list_files_by_project(&good, &project.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn exchange_round_trip_through_facade() {
        let store = store(Some("k"));
        let key = InternalKey::new("k");
        let (project, conversation) = store
            .create_project_with_conversation(&key, "p", DEFAULT_CONVERSATION_TITLE)
            .await
            .unwrap();

        let (user_id, placeholder_id) = store
            .create_exchange(&key, &conversation.id, &project.id, "hello")
            .await
            .unwrap();
        assert_ne!(user_id, placeholder_id);

        let processing = store.get_processing_messages(&key, &project.id).await.unwrap();
        assert_eq!(processing.len(), 1);

        assert!(store
            .update_message_content(&key, &placeholder_id, "hi there")
            .await
            .unwrap());
        let recent = store.get_recent_messages(&key, &conversation.id, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].status, Some(MessageStatus::Completed));
    }
}
