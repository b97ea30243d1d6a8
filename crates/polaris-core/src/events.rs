use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ProjectId, ToolCallId};

/// Lifecycle events emitted while a message job runs.
/// Keyed by the placeholder message id, which doubles as the run id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "turn_start")]
    TurnStart { message_id: MessageId, turn: u32 },

    #[serde(rename = "tool_start")]
    ToolStart {
        message_id: MessageId,
        tool_call_id: ToolCallId,
        tool_name: String,
    },

    #[serde(rename = "tool_end")]
    ToolEnd {
        message_id: MessageId,
        tool_call_id: ToolCallId,
        result_preview: String,
        is_error: bool,
        duration_ms: u64,
    },

    #[serde(rename = "turn_complete")]
    TurnComplete {
        message_id: MessageId,
        turn: u32,
        tool_calls: usize,
    },

    #[serde(rename = "agent_complete")]
    AgentComplete {
        message_id: MessageId,
        iterations: u32,
        hit_cap: bool,
    },

    #[serde(rename = "step_completed")]
    StepCompleted {
        message_id: MessageId,
        step: String,
        replayed: bool,
    },

    #[serde(rename = "job_finished")]
    JobFinished {
        message_id: MessageId,
        outcome: JobOutcome,
    },
}

impl AgentEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::TurnStart { message_id, .. }
            | Self::ToolStart { message_id, .. }
            | Self::ToolEnd { message_id, .. }
            | Self::TurnComplete { message_id, .. }
            | Self::AgentComplete { message_id, .. }
            | Self::StepCompleted { message_id, .. }
            | Self::JobFinished { message_id, .. } => message_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::TurnComplete { .. } => "turn_complete",
            Self::AgentComplete { .. } => "agent_complete",
            Self::StepCompleted { .. } => "step_completed",
            Self::JobFinished { .. } => "job_finished",
        }
    }
}

/// Terminal state of a message job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Payload of a `message/sent` trigger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSent {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub project_id: ProjectId,
    pub message: String,
}

/// Events carried by the trigger bus.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "data")]
pub enum JobTrigger {
    #[serde(rename = "message/sent")]
    MessageSent(MessageSent),
    #[serde(rename = "message/cancel")]
    MessageCancel {
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl JobTrigger {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::MessageSent(sent) => &sent.message_id,
            Self::MessageCancel { message_id } => message_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent(_) => "message/sent",
            Self::MessageCancel { .. } => "message/cancel",
        }
    }
}
