//! The message job: one durable run per assistant placeholder.
//!
//! A placeholder that already left processing ends the run before any step.
//! Otherwise the steps, in order: credential check, settle delay, conversation
//! lookup, recent history, best-effort title, agent loop, completion write.
//! Any fault after the credential check ends in the apology write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use polaris_core::conversation::{ChatMessage, Conversation, MessageStatus};
use polaris_core::events::{AgentEvent, JobOutcome, MessageSent};
use polaris_core::provider::{GenerateOptions, LlmProvider};
use polaris_core::security::InternalKey;
use polaris_core::tools::ToolContext;
use polaris_store::{ConversationStore, FileStore};

use crate::error::EngineError;
use crate::prompt;
use crate::router::{AgentRouter, RouterConfig};
use crate::steps::{RetryPolicy, StepJournal, StepRunner};
use crate::tools::FileToolset;

/// Written into the placeholder when a job fails.
pub const APOLOGY_MESSAGE: &str =
    "My apologies, I encountered an error while processing your message. Please try again.";

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

const TITLE_MAX_TOKENS: u32 = 32;

#[derive(Clone, Debug)]
pub struct JobConfig {
    pub settle_delay: Duration,
    pub history_limit: usize,
    pub retry: RetryPolicy,
    pub router: RouterConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::ZERO,
            history_limit: DEFAULT_HISTORY_LIMIT,
            retry: RetryPolicy::default(),
            router: RouterConfig::default(),
        }
    }
}

/// Everything a job needs. Shared by all runs.
pub struct MessageJob {
    conversations: Arc<dyn ConversationStore>,
    files: Arc<dyn FileStore>,
    agent: Arc<dyn LlmProvider>,
    titler: Arc<dyn LlmProvider>,
    journal: Arc<dyn StepJournal>,
    internal_key: Option<InternalKey>,
    config: JobConfig,
    events: broadcast::Sender<AgentEvent>,
}

impl MessageJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        files: Arc<dyn FileStore>,
        agent: Arc<dyn LlmProvider>,
        titler: Arc<dyn LlmProvider>,
        journal: Arc<dyn StepJournal>,
        internal_key: Option<InternalKey>,
        config: JobConfig,
        events: broadcast::Sender<AgentEvent>,
    ) -> Self {
        Self {
            conversations,
            files,
            agent,
            titler,
            journal,
            internal_key,
            config,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Run (or resume) the job for one trigger.
    #[instrument(skip_all, fields(message_id = %trigger.message_id, conversation_id = %trigger.conversation_id))]
    pub async fn run(&self, trigger: &MessageSent, cancel: CancellationToken) -> JobOutcome {
        let steps = StepRunner::new(
            trigger.message_id.clone(),
            self.journal.clone(),
            self.config.retry.clone(),
            cancel,
            self.events.clone(),
        );

        let outcome = if let Some(settled) = self.settled_outcome(trigger).await {
            info!(outcome = %settled, "placeholder already settled, nothing to run");
            settled
        } else {
            self.execute_to_outcome(&steps, trigger).await
        };

        info!(outcome = %outcome, "job finished");
        if self
            .events
            .send(AgentEvent::JobFinished {
                message_id: trigger.message_id.clone(),
                outcome,
            })
            .is_err()
        {
            debug!("no event receivers, job_finished dropped");
        }
        outcome
    }

    /// The outcome already recorded on the placeholder, or `None` while it
    /// is still processing. Checked on every delivery, so a redelivered
    /// trigger for a cancelled or answered message never reaches the model.
    pub async fn settled_outcome(&self, trigger: &MessageSent) -> Option<JobOutcome> {
        let key = self.internal_key.as_ref()?;
        match self.conversations.get_message(key, &trigger.message_id).await {
            Ok(Some(message)) => match message.status {
                Some(MessageStatus::Processing) => None,
                Some(MessageStatus::Completed) => Some(JobOutcome::Completed),
                Some(MessageStatus::Cancelled) => Some(JobOutcome::Cancelled),
                None => Some(JobOutcome::Failed),
            },
            Ok(None) => {
                warn!(message_id = %trigger.message_id, "placeholder not found");
                Some(JobOutcome::Failed)
            }
            Err(e) => {
                warn!(error = %e, "could not read placeholder status");
                None
            }
        }
    }

    async fn execute_to_outcome(&self, steps: &StepRunner, trigger: &MessageSent) -> JobOutcome {
        match self.execute(steps, trigger).await {
            Ok(true) => JobOutcome::Completed,
            Ok(false) => {
                info!("placeholder was cancelled elsewhere, completion write skipped");
                JobOutcome::Cancelled
            }
            Err(e) if e.is_cancelled() => {
                info!("job cancelled");
                JobOutcome::Cancelled
            }
            Err(EngineError::Configuration(reason)) => {
                error!(reason = %reason, "job aborted by configuration error");
                JobOutcome::Failed
            }
            Err(e) => {
                error!(error = %e, "job failed");
                self.write_apology(steps, trigger).await
            }
        }
    }

    /// Ok(true) when the answer was written, Ok(false) when the placeholder
    /// was already cancelled.
    async fn execute(&self, steps: &StepRunner, trigger: &MessageSent) -> Result<bool, EngineError> {
        let key = self
            .internal_key
            .clone()
            .ok_or_else(|| EngineError::Configuration("Internal key not found".into()))?;

        if !self.config.settle_delay.is_zero() {
            steps.sleep("wait-for-settle", self.config.settle_delay).await?;
        }

        let conversations = &self.conversations;
        let key_ref = &key;
        let conversation_id = &trigger.conversation_id;

        let conversation: Conversation = steps
            .run("get-conversation", move || async move {
                conversations
                    .get_conversation(key_ref, conversation_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("Conversation {conversation_id} not found")))
            })
            .await?;

        let limit = self.config.history_limit;
        let recent: Vec<ChatMessage> = steps
            .run("get-recent-messages", move || async move {
                Ok(conversations
                    .get_recent_messages(key_ref, conversation_id, limit)
                    .await?)
            })
            .await?;
        let system_prompt = prompt::system_prompt(&recent, &trigger.message_id);

        if conversation.has_default_title() {
            self.generate_title(steps, &key, &conversation, &trigger.message).await;
        }

        let tools = FileToolset::new(self.files.clone(), key.clone()).registry();
        let router = AgentRouter::new(self.agent.clone(), Arc::new(tools), self.config.router.clone());
        let ctx = ToolContext {
            project_id: trigger.project_id.clone(),
            message_id: trigger.message_id.clone(),
            abort_signal: steps.cancel_token().clone(),
        };
        let outcome = router.run(steps, &system_prompt, &trigger.message, &ctx).await?;

        let message_id = &trigger.message_id;
        let answer = outcome.answer.as_str();
        steps
            .run("update-assistant-message", move || async move {
                Ok(conversations
                    .update_message_content(key_ref, message_id, answer)
                    .await?)
            })
            .await
    }

    /// Name the conversation after the user's first message. Failures are
    /// logged and otherwise ignored.
    async fn generate_title(
        &self,
        steps: &StepRunner,
        key: &InternalKey,
        conversation: &Conversation,
        user_message: &str,
    ) {
        let titler = &self.titler;
        let options = GenerateOptions {
            max_tokens: Some(TITLE_MAX_TOKENS),
            ..Default::default()
        };
        let options = &options;

        let generated: Result<Option<String>, EngineError> = steps
            .run("generate-conversation-title", move || async move {
                let reply = titler.generate(&prompt::title_context(user_message), options).await?;
                Ok(prompt::clean_title(&reply.text_content()))
            })
            .await;

        let title = match generated {
            Ok(Some(title)) => title,
            Ok(None) => {
                warn!("title generation returned no text");
                return;
            }
            Err(e) => {
                warn!(error = %e, "title generation failed");
                return;
            }
        };

        let conversations = &self.conversations;
        let conversation_id = &conversation.id;
        let title = title.as_str();
        let updated: Result<(), EngineError> = steps
            .run("update-conversation-title", move || async move {
                Ok(conversations
                    .update_conversation_title(key, conversation_id, title)
                    .await?)
            })
            .await;
        match updated {
            Ok(()) => info!(title, "conversation titled"),
            Err(e) => warn!(error = %e, "failed to store conversation title"),
        }
    }

    async fn write_apology(&self, steps: &StepRunner, trigger: &MessageSent) -> JobOutcome {
        let Some(key) = self.internal_key.as_ref() else {
            return JobOutcome::Failed;
        };
        let conversations = &self.conversations;
        let message_id = &trigger.message_id;
        let written: Result<bool, EngineError> = steps
            .run("update-message-on-failure", move || async move {
                Ok(conversations
                    .fail_message(key, message_id, APOLOGY_MESSAGE)
                    .await?)
            })
            .await;
        match written {
            Ok(true) => JobOutcome::Failed,
            Ok(false) => JobOutcome::Cancelled,
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => {
                error!(error = %e, "failed to write failure message");
                JobOutcome::Failed
            }
        }
    }
}
