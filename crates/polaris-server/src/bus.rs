//! In-process trigger bus.
//!
//! `message/sent` triggers go through the durable outbox before a job is
//! spawned and are acknowledged once the job reaches a terminal outcome.
//! Unacknowledged triggers are redelivered by [`LocalJobBus::recover`].
//! `message/cancel` cancels the in-flight job with the same message id.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use polaris_core::events::{JobTrigger, MessageSent};
use polaris_core::ids::MessageId;
use polaris_engine::{EngineError, MessageJob};
use polaris_store::jobs::JobRepo;

/// Fire-and-forget delivery of job triggers.
pub trait TriggerBus: Send + Sync {
    fn send(&self, trigger: JobTrigger) -> Result<(), EngineError>;
}

pub struct LocalJobBus {
    job: Arc<MessageJob>,
    outbox: JobRepo,
    active: Arc<DashMap<MessageId, CancellationToken>>,
}

impl LocalJobBus {
    pub fn new(job: Arc<MessageJob>, outbox: JobRepo) -> Self {
        Self {
            job,
            outbox,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Redeliver every unacknowledged trigger. Triggers whose placeholder
    /// already left processing are acknowledged without starting a job.
    /// Returns how many jobs started.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let pending = self.outbox.pending_triggers()?;
        let mut started = 0;
        for entry in pending {
            match entry.trigger {
                JobTrigger::MessageSent(sent) => {
                    if let Some(outcome) = self.job.settled_outcome(&sent).await {
                        info!(message_id = %sent.message_id, outcome = %outcome, "placeholder already settled, trigger acknowledged");
                        self.outbox.ack_trigger(&sent.message_id)?;
                        continue;
                    }
                    info!(message_id = %sent.message_id, attempts = entry.attempts, "redelivering trigger");
                    if self.start(sent)? {
                        started += 1;
                    }
                }
                JobTrigger::MessageCancel { message_id } => {
                    debug!(message_id = %message_id, "stale cancel trigger acknowledged");
                    self.outbox.ack_trigger(&message_id)?;
                }
            }
        }
        Ok(started)
    }

    /// Keep a subscriber on the job's event stream and trace every event.
    /// The task ends once the job and its sender are dropped.
    pub fn spawn_event_log(&self) -> JoinHandle<()> {
        let mut rx = self.job.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        debug!(message_id = %event.message_id(), event = event.event_type(), "agent event");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        self.active.len()
    }

    pub fn is_running(&self, message_id: &MessageId) -> bool {
        self.active.contains_key(message_id)
    }

    /// Spawn the job for a trigger unless one is already running for it.
    fn start(&self, sent: MessageSent) -> Result<bool, EngineError> {
        let cancel = CancellationToken::new();
        match self.active.entry(sent.message_id.clone()) {
            Entry::Occupied(_) => {
                debug!(message_id = %sent.message_id, "job already running, duplicate delivery ignored");
                return Ok(false);
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }

        let attempt = match self.outbox.mark_attempt(&sent.message_id) {
            Ok(attempt) => attempt,
            Err(e) => {
                self.active.remove(&sent.message_id);
                return Err(e.into());
            }
        };
        info!(message_id = %sent.message_id, attempt, "job started");

        let job = Arc::clone(&self.job);
        let outbox = self.outbox.clone();
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let outcome = job.run(&sent, cancel).await;
            if let Err(e) = outbox.ack_trigger(&sent.message_id) {
                error!(message_id = %sent.message_id, error = %e, "failed to acknowledge trigger");
            }
            active.remove(&sent.message_id);
            debug!(message_id = %sent.message_id, outcome = %outcome, "trigger acknowledged");
        });
        Ok(true)
    }

    fn cancel(&self, message_id: &MessageId) -> bool {
        match self.active.get(message_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl TriggerBus for LocalJobBus {
    #[instrument(skip(self, trigger), fields(name = trigger.name(), message_id = %trigger.message_id()))]
    fn send(&self, trigger: JobTrigger) -> Result<(), EngineError> {
        match trigger {
            JobTrigger::MessageSent(sent) => {
                self.outbox.enqueue_trigger(&JobTrigger::MessageSent(sent.clone()))?;
                self.start(sent)?;
            }
            JobTrigger::MessageCancel { message_id } => {
                if !self.cancel(&message_id) {
                    warn!(message_id = %message_id, "no running job to cancel");
                }
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use polaris_core::conversation::MessageStatus;
    use polaris_core::events::{AgentEvent, JobOutcome};
    use polaris_core::security::InternalKey;
    use polaris_engine::{JobConfig, MessageJob, StepJournal};
    use polaris_llm::mock::{MockProvider, MockResponse};
    use polaris_store::{ConversationStore, Database, FileStore, SystemStore};
    use tokio::sync::broadcast;

    const KEY: &str = "bus-test-key";

    fn job(store: &Arc<SystemStore>, responses: Vec<MockResponse>) -> Arc<MessageJob> {
        job_with_agent(store, Arc::new(MockProvider::new(responses)))
    }

    fn job_with_agent(store: &Arc<SystemStore>, agent: Arc<MockProvider>) -> Arc<MessageJob> {
        let (tx, _) = broadcast::channel(256);
        let journal: Arc<dyn StepJournal> = Arc::new(store.jobs());
        Arc::new(MessageJob::new(
            store.clone(),
            store.clone(),
            agent,
            Arc::new(MockProvider::new(vec![])),
            journal,
            Some(InternalKey::new(KEY)),
            JobConfig::default(),
            tx,
        ))
    }

    async fn setup() -> (Arc<SystemStore>, MessageSent) {
        let store = Arc::new(SystemStore::new(
            Database::in_memory().unwrap(),
            Some(InternalKey::new(KEY)),
        ));
        let key = InternalKey::new(KEY);
        let (project, conversation) = store
            .create_project_with_conversation(&key, "demo", "chat")
            .await
            .unwrap();
        let (_, placeholder) = store
            .create_exchange(&key, &conversation.id, &project.id, "hi")
            .await
            .unwrap();
        let sent = MessageSent {
            message_id: placeholder,
            conversation_id: conversation.id,
            project_id: project.id,
            message: "hi".into(),
        };
        (store, sent)
    }

    async fn finished(rx: &mut broadcast::Receiver<AgentEvent>) -> JobOutcome {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(AgentEvent::JobFinished { outcome, .. }) = rx.recv().await {
                    return outcome;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn wait_idle(bus: &LocalJobBus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sent_trigger_runs_job_and_acknowledges() {
        let (store, sent) = setup().await;
        let job = job(&store, vec![MockResponse::text("hello back")]);
        let mut rx = job.subscribe();
        let bus = LocalJobBus::new(job, store.jobs());

        bus.send(JobTrigger::MessageSent(sent.clone())).unwrap();
        assert_eq!(finished(&mut rx).await, JobOutcome::Completed);
        wait_idle(&bus).await;

        assert!(store.jobs().pending_triggers().unwrap().is_empty());
        let key = InternalKey::new(KEY);
        let message = store.get_message(&key, &sent.message_id).await.unwrap().unwrap();
        assert_eq!(message.content, "hello back");
    }

    #[tokio::test]
    async fn cancel_trigger_stops_running_job() {
        let (store, sent) = setup().await;
        let job = job(
            &store,
            vec![MockResponse::delayed(
                Duration::from_millis(200),
                MockResponse::tool_call("listFiles", serde_json::json!({})),
            )],
        );
        let mut rx = job.subscribe();
        let bus = LocalJobBus::new(job, store.jobs());

        bus.send(JobTrigger::MessageSent(sent.clone())).unwrap();
        assert!(bus.is_running(&sent.message_id));
        bus.send(JobTrigger::MessageCancel {
            message_id: sent.message_id.clone(),
        })
        .unwrap();

        assert_eq!(finished(&mut rx).await, JobOutcome::Cancelled);
        wait_idle(&bus).await;
        assert!(store.jobs().pending_triggers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_without_job_is_harmless() {
        let (store, sent) = setup().await;
        let bus = LocalJobBus::new(job(&store, vec![]), store.jobs());
        bus.send(JobTrigger::MessageCancel {
            message_id: sent.message_id,
        })
        .unwrap();
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn recover_redelivers_pending_triggers() {
        let (store, sent) = setup().await;
        // Persisted but never delivered, as after a crash.
        store
            .jobs()
            .enqueue_trigger(&JobTrigger::MessageSent(sent.clone()))
            .unwrap();

        let job = job(&store, vec![MockResponse::text("recovered answer")]);
        let mut rx = job.subscribe();
        let bus = LocalJobBus::new(job, store.jobs());

        assert_eq!(bus.recover().await.unwrap(), 1);
        assert_eq!(finished(&mut rx).await, JobOutcome::Completed);
        wait_idle(&bus).await;

        let key = InternalKey::new(KEY);
        let message = store.get_message(&key, &sent.message_id).await.unwrap().unwrap();
        assert_eq!(message.status, Some(MessageStatus::Completed));
        assert_eq!(bus.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recover_acknowledges_cancelled_placeholder_without_running() {
        let (store, sent) = setup().await;
        let key = InternalKey::new(KEY);
        store
            .jobs()
            .enqueue_trigger(&JobTrigger::MessageSent(sent.clone()))
            .unwrap();
        // Cancelled while the process was down, before the trigger was acked.
        assert!(store.cancel_message(&key, &sent.message_id).await.unwrap());

        let agent = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("createFolder", serde_json::json!({"name": "src", "parentId": ""})),
            MockResponse::text("Created src."),
        ]));
        let bus = LocalJobBus::new(job_with_agent(&store, agent.clone()), store.jobs());

        assert_eq!(bus.recover().await.unwrap(), 0);
        assert_eq!(bus.in_flight(), 0);
        assert_eq!(agent.call_count(), 0);
        assert!(store.jobs().pending_triggers().unwrap().is_empty());
        assert!(store.list_files_by_project(&key, &sent.project_id).await.unwrap().is_empty());
        let message = store.get_message(&key, &sent.message_id).await.unwrap().unwrap();
        assert_eq!(message.status, Some(MessageStatus::Cancelled));
        assert_eq!(message.content, "");
    }

    #[tokio::test]
    async fn event_log_drains_until_the_job_is_dropped() {
        let (store, sent) = setup().await;
        let bus = LocalJobBus::new(job(&store, vec![MockResponse::text("logged")]), store.jobs());
        let log = bus.spawn_event_log();

        bus.send(JobTrigger::MessageSent(sent)).unwrap();
        wait_idle(&bus).await;
        assert!(!log.is_finished());

        drop(bus);
        tokio::time::timeout(Duration::from_secs(5), log)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_delivery_is_ignored_while_running() {
        let (store, sent) = setup().await;
        let job = job(
            &store,
            vec![MockResponse::delayed(Duration::from_millis(100), MockResponse::text("once"))],
        );
        let mut rx = job.subscribe();
        let bus = LocalJobBus::new(job, store.jobs());

        bus.send(JobTrigger::MessageSent(sent.clone())).unwrap();
        bus.send(JobTrigger::MessageSent(sent.clone())).unwrap();
        assert_eq!(bus.in_flight(), 1);

        assert_eq!(finished(&mut rx).await, JobOutcome::Completed);
        wait_idle(&bus).await;
    }
}
