use tracing::{debug, instrument};

use polaris_core::conversation::now_millis;
use polaris_core::events::JobTrigger;
use polaris_core::ids::MessageId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable job state: the per-run step journal and the trigger outbox.
#[derive(Clone)]
pub struct JobRepo {
    db: Database,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTrigger {
    pub trigger: JobTrigger,
    pub attempts: u32,
}

impl JobRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // Step journal

    /// Recorded JSON output of a completed step, if any.
    pub fn step_output(&self, run_id: &str, step: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT output FROM job_steps WHERE run_id = ?1 AND step = ?2")?;
            let mut rows = stmt.query([run_id, step])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_helpers::get(row, 0, "job_steps", "output")?)),
                None => Ok(None),
            }
        })
    }

    /// Record a step's output. The first recorded output wins.
    #[instrument(skip(self, output))]
    pub fn record_step(&self, run_id: &str, step: &str, output: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO job_steps (run_id, step, output, completed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![run_id, step, output, now_millis()],
            )?;
            if inserted == 0 {
                debug!(run_id, step, "step already journaled");
            }
            Ok(())
        })
    }

    /// Names of the completed steps of a run, in completion order.
    pub fn completed_steps(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT step FROM job_steps WHERE run_id = ?1 ORDER BY completed_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([run_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_helpers::get(row, 0, "job_steps", "step")?);
            }
            Ok(out)
        })
    }

    // Trigger outbox

    /// Persist a trigger before it is delivered. Re-enqueueing is a no-op.
    #[instrument(skip(self, trigger), fields(message_id = %trigger.message_id()))]
    pub fn enqueue_trigger(&self, trigger: &JobTrigger) -> Result<(), StoreError> {
        let payload = serde_json::to_string(trigger)?;
        self.db.with_conn(|conn| {
            let now = now_millis();
            let _ = conn.execute(
                "INSERT OR IGNORE INTO job_triggers (message_id, payload, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
                rusqlite::params![trigger.message_id().as_str(), payload, now],
            )?;
            Ok(())
        })
    }

    /// Count a delivery attempt; returns the new attempt number.
    pub fn mark_attempt(&self, message_id: &MessageId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "UPDATE job_triggers SET attempts = attempts + 1, updated_at = ?1 WHERE message_id = ?2",
                rusqlite::params![now_millis(), message_id.as_str()],
            )?;
            let attempts: u32 = conn
                .query_row(
                    "SELECT attempts FROM job_triggers WHERE message_id = ?1",
                    [message_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        StoreError::NotFound(format!("trigger {message_id}"))
                    }
                    other => other.into(),
                })?;
            Ok(attempts)
        })
    }

    /// Mark a trigger as handled; it will not be redelivered.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn ack_trigger(&self, message_id: &MessageId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "UPDATE job_triggers SET status = 'done', updated_at = ?1 WHERE message_id = ?2",
                rusqlite::params![now_millis(), message_id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Triggers not yet acknowledged, oldest first.
    pub fn pending_triggers(&self) -> Result<Vec<PendingTrigger>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload, attempts FROM job_triggers
                 WHERE status = 'pending' ORDER BY created_at ASC, rowid ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row_helpers::get(row, 0, "job_triggers", "payload")?;
                out.push(PendingTrigger {
                    trigger: row_helpers::parse_json(&payload, "job_triggers", "payload")?,
                    attempts: row_helpers::get(row, 1, "job_triggers", "attempts")?,
                });
            }
            Ok(out)
        })
    }
}
