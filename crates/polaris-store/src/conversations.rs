use rusqlite::Connection;
use tracing::{debug, instrument};

use polaris_core::conversation::{
    now_millis, ChatMessage, Conversation, MessageRole, MessageStatus,
};
use polaris_core::ids::{ConversationId, MessageId, ProjectId};

use crate::database::Database;
use crate::error::StoreError;
use crate::projects::project_exists;
use crate::row_helpers;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, project_id, role, content, status, created_at";

/// Conversations and their messages.
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn create(&self, project_id: &ProjectId, title: &str) -> Result<Conversation, StoreError> {
        self.db.with_tx(|tx| {
            if !project_exists(tx, project_id)? {
                return Err(StoreError::NotFound(format!("project {project_id}")));
            }
            insert_conversation(tx, project_id, title)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        self.db.with_conn(|conn| find_conversation(conn, id))
    }

    pub fn list_for_project(&self, project_id: &ProjectId) -> Result<Vec<Conversation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, title, updated_at FROM conversations
                 WHERE project_id = ?1 ORDER BY updated_at DESC, id DESC",
            )?;
            let mut rows = stmt.query([project_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_conversation(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self, title), fields(conversation_id = %id))]
    pub fn update_title(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![title, now_millis(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    /// Insert a message and touch the conversation's `updated_at`.
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id, role = %role))]
    pub fn create_message(
        &self,
        conversation_id: &ConversationId,
        project_id: &ProjectId,
        role: MessageRole,
        content: &str,
        status: Option<MessageStatus>,
    ) -> Result<ChatMessage, StoreError> {
        self.db.with_tx(|tx| {
            insert_message(tx, conversation_id, project_id, role, content, status)
        })
    }

    /// Insert a user message and its processing placeholder in one transaction.
    /// Readers see both or neither.
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id))]
    pub fn create_exchange(
        &self,
        conversation_id: &ConversationId,
        project_id: &ProjectId,
        content: &str,
    ) -> Result<(ChatMessage, ChatMessage), StoreError> {
        self.db.with_tx(|tx| {
            let user = insert_message(tx, conversation_id, project_id, MessageRole::User, content, None)?;
            let placeholder = insert_message(
                tx,
                conversation_id,
                project_id,
                MessageRole::Assistant,
                "",
                Some(MessageStatus::Processing),
            )?;
            Ok((user, placeholder))
        })
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn get_message(&self, id: &MessageId) -> Result<Option<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| find_message(conn, id))
    }

    /// Write the final answer and mark the message completed.
    ///
    /// Skipped when the message is already cancelled; returns whether the
    /// write applied. Repeating the call with the same content is harmless.
    #[instrument(skip(self, content), fields(message_id = %id))]
    pub fn complete_message(&self, id: &MessageId, content: &str) -> Result<bool, StoreError> {
        self.conditional_write(id, content, Some(MessageStatus::Completed))
    }

    /// Write the failure text and clear the status, unless already cancelled.
    #[instrument(skip(self, content), fields(message_id = %id))]
    pub fn fail_message(&self, id: &MessageId, content: &str) -> Result<bool, StoreError> {
        self.conditional_write(id, content, None)
    }

    fn conditional_write(
        &self,
        id: &MessageId,
        content: &str,
        status: Option<MessageStatus>,
    ) -> Result<bool, StoreError> {
        self.db.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE messages SET content = ?1, status = ?2
                 WHERE id = ?3 AND (status IS NULL OR status != 'cancelled')",
                rusqlite::params![content, status.map(MessageStatus::as_str), id.as_str()],
            )?;
            if changed > 0 {
                return Ok(true);
            }
            match find_message(tx, id)? {
                Some(_) => {
                    debug!(message_id = %id, "message already cancelled, write skipped");
                    Ok(false)
                }
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    #[instrument(skip(self), fields(message_id = %id))]
    pub fn update_message_status(
        &self,
        id: &MessageId,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.map(MessageStatus::as_str), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("message {id}")));
            }
            Ok(())
        })
    }

    /// Flip a message from processing to cancelled. Returns false when it
    /// had already left processing, so a finished answer keeps its status.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn cancel_message(&self, id: &MessageId) -> Result<bool, StoreError> {
        self.db.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE messages SET status = 'cancelled' WHERE id = ?1 AND status = 'processing'",
                [id.as_str()],
            )?;
            if changed > 0 {
                return Ok(true);
            }
            match find_message(tx, id)? {
                Some(message) => {
                    debug!(message_id = %id, status = ?message.status, "message not processing, cancel skipped");
                    Ok(false)
                }
                None => Err(StoreError::NotFound(format!("message {id}"))),
            }
        })
    }

    /// The most recent `limit` messages, oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                     SELECT seq, {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2
                 ) ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(rusqlite::params![conversation_id.as_str(), limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    pub fn processing_messages(&self, project_id: &ProjectId) -> Result<Vec<ChatMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE project_id = ?1 AND status = 'processing' ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([project_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
    }
}

pub(crate) fn insert_conversation(
    conn: &Connection,
    project_id: &ProjectId,
    title: &str,
) -> Result<Conversation, StoreError> {
    let conversation = Conversation {
        id: ConversationId::new(),
        project_id: project_id.clone(),
        title: title.to_string(),
        updated_at: now_millis(),
    };
    conn.execute(
        "INSERT INTO conversations (id, project_id, title, updated_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            conversation.id.as_str(),
            conversation.project_id.as_str(),
            conversation.title,
            conversation.updated_at,
        ],
    )?;
    Ok(conversation)
}

fn find_conversation(conn: &Connection, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, project_id, title, updated_at FROM conversations WHERE id = ?1")?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_conversation(row)?)),
        None => Ok(None),
    }
}

fn insert_message(
    conn: &Connection,
    conversation_id: &ConversationId,
    project_id: &ProjectId,
    role: MessageRole,
    content: &str,
    status: Option<MessageStatus>,
) -> Result<ChatMessage, StoreError> {
    let now = now_millis();
    let touched = conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now, conversation_id.as_str()],
    )?;
    if touched == 0 {
        return Err(StoreError::NotFound(format!("conversation {conversation_id}")));
    }

    let message = ChatMessage {
        id: MessageId::new(),
        conversation_id: conversation_id.clone(),
        project_id: project_id.clone(),
        role,
        content: content.to_string(),
        status,
        created_at: now,
    };
    conn.execute(
        "INSERT INTO messages (id, conversation_id, project_id, role, content, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            message.id.as_str(),
            message.conversation_id.as_str(),
            message.project_id.as_str(),
            message.role.as_str(),
            message.content,
            message.status.map(MessageStatus::as_str),
            message.created_at,
        ],
    )?;
    Ok(message)
}

fn find_message(conn: &Connection, id: &MessageId) -> Result<Option<ChatMessage>, StoreError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_message(row)?)),
        None => Ok(None),
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<Conversation, StoreError> {
    Ok(Conversation {
        id: ConversationId::from_raw(row_helpers::get::<String>(row, 0, "conversations", "id")?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 1, "conversations", "project_id")?),
        title: row_helpers::get(row, 2, "conversations", "title")?,
        updated_at: row_helpers::get(row, 3, "conversations", "updated_at")?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ChatMessage, StoreError> {
    let role: String = row_helpers::get(row, 3, "messages", "role")?;
    Ok(ChatMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        project_id: ProjectId::from_raw(row_helpers::get::<String>(row, 2, "messages", "project_id")?),
        role: row_helpers::parse_enum(&role, "messages", "role")?,
        content: row_helpers::get(row, 4, "messages", "content")?,
        status: row_helpers::parse_opt_enum(
            row_helpers::get_opt(row, 5, "messages", "status")?,
            "messages",
            "status",
        )?,
        created_at: row_helpers::get(row, 6, "messages", "created_at")?,
    })
}
