//! Dispatch layer: turns requests into job triggers.
//!
//! A project has at most one message being produced at a time. A new send
//! supersedes older work by cancel signal plus status flip; the old job
//! notices at its next step boundary.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use polaris_core::conversation::{ChatMessage, Conversation, DEFAULT_CONVERSATION_TITLE};
use polaris_core::events::{JobTrigger, MessageSent};
use polaris_core::ids::{ConversationId, MessageId, ProjectId};
use polaris_core::security::InternalKey;
use polaris_store::{ConversationStore, StoreError};

use crate::bus::TriggerBus;
use crate::error::DispatchError;
use crate::names;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: MessageId,
    /// Placeholders cancelled to make room for this message.
    pub superseded: Vec<MessageId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReport {
    pub cancelled: bool,
    pub message_ids: Vec<MessageId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    pub project_id: ProjectId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

pub struct Dispatcher {
    store: Arc<dyn ConversationStore>,
    bus: Arc<dyn TriggerBus>,
    key: Option<InternalKey>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ConversationStore>, bus: Arc<dyn TriggerBus>, key: Option<InternalKey>) -> Self {
        Self { store, bus, key }
    }

    fn key(&self) -> Result<&InternalKey, DispatchError> {
        self.key
            .as_ref()
            .ok_or_else(|| StoreError::Configuration("Internal key not found".into()).into())
    }

    /// Supersede in-flight work in the conversation's project, write the
    /// user message and placeholder, and trigger the job.
    #[instrument(skip(self, text), fields(conversation_id = %conversation_id))]
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<SendReceipt, DispatchError> {
        if text.trim().is_empty() {
            return Err(DispatchError::Validation("Message cannot be empty".into()));
        }
        let key = self.key()?;
        let conversation = self
            .store
            .get_conversation(key, conversation_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound("Conversation not found".into()))?;

        let superseded = self.cancel_processing(&conversation.project_id).await?;
        let message_id = self.start_exchange(&conversation, text).await?;

        info!(message_id = %message_id, superseded = superseded.len(), "message dispatched");
        Ok(SendReceipt { message_id, superseded })
    }

    /// Cancel every processing message of a project.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn cancel_all(&self, project_id: &ProjectId) -> Result<CancelReport, DispatchError> {
        let message_ids = self.cancel_processing(project_id).await?;
        Ok(CancelReport {
            cancelled: !message_ids.is_empty(),
            message_ids,
        })
    }

    /// New project named `adjective-animal-color`, seeded with the prompt as
    /// its first message.
    #[instrument(skip(self, prompt))]
    pub async fn create_project_with_prompt(&self, prompt: &str) -> Result<ProjectCreated, DispatchError> {
        if prompt.trim().is_empty() {
            return Err(DispatchError::Validation("Prompt cannot be empty".into()));
        }
        let key = self.key()?;
        let name = names::project_name();
        let (project, conversation) = self
            .store
            .create_project_with_conversation(key, &name, DEFAULT_CONVERSATION_TITLE)
            .await?;
        let message_id = self.start_exchange(&conversation, prompt).await?;

        info!(project_id = %project.id, name = %name, "project created from prompt");
        Ok(ProjectCreated {
            project_id: project.id,
            conversation_id: conversation.id,
            message_id,
        })
    }

    pub async fn create_conversation(
        &self,
        project_id: &ProjectId,
        title: Option<&str>,
    ) -> Result<Conversation, DispatchError> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_TITLE);
        Ok(self.store.create_conversation(self.key()?, project_id, title).await?)
    }

    pub async fn recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, DispatchError> {
        let key = self.key()?;
        if self.store.get_conversation(key, conversation_id).await?.is_none() {
            return Err(DispatchError::NotFound("Conversation not found".into()));
        }
        Ok(self.store.get_recent_messages(key, conversation_id, limit).await?)
    }

    /// User message and placeholder in one write, then the trigger.
    async fn start_exchange(&self, conversation: &Conversation, text: &str) -> Result<MessageId, DispatchError> {
        let key = self.key()?;
        let (_, placeholder) = self
            .store
            .create_exchange(key, &conversation.id, &conversation.project_id, text)
            .await?;
        self.bus.send(JobTrigger::MessageSent(MessageSent {
            message_id: placeholder.clone(),
            conversation_id: conversation.id.clone(),
            project_id: conversation.project_id.clone(),
            message: text.to_string(),
        }))?;
        Ok(placeholder)
    }

    /// Signal and flip every processing message of the project, concurrently.
    /// Only messages still processing at flip time are reported; one that
    /// finished in between keeps its status. Individual failures are logged
    /// and skipped.
    async fn cancel_processing(&self, project_id: &ProjectId) -> Result<Vec<MessageId>, DispatchError> {
        let key = self.key()?;
        let processing = self.store.get_processing_messages(key, project_id).await?;
        if processing.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(processing.iter().map(|message| async move {
            if let Err(e) = self.bus.send(JobTrigger::MessageCancel {
                message_id: message.id.clone(),
            }) {
                warn!(message_id = %message.id, error = %e, "cancel signal failed");
            }
            let flipped = self.store.cancel_message(key, &message.id).await;
            (&message.id, flipped)
        }))
        .await;

        let mut cancelled = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(true) => cancelled.push(id.clone()),
                Ok(false) => debug!(message_id = %id, "message finished before it could be cancelled"),
                Err(e) => warn!(message_id = %id, error = %e, "failed to mark message cancelled"),
            }
        }
        info!(project_id = %project_id, count = cancelled.len(), "processing messages cancelled");
        Ok(cancelled)
    }
}
