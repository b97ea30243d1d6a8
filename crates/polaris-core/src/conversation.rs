use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ProjectId};

/// Title every conversation starts with until the first job renames it.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub project_id: ProjectId,
    pub title: String,
    pub updated_at: i64,
}

impl Conversation {
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CONVERSATION_TITLE
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// Status of an assistant message. The only externally visible job state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Processing,
    Completed,
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub project_id: ProjectId,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    pub created_at: i64,
}

impl ChatMessage {
    pub fn is_processing(&self) -> bool {
        self.status == Some(MessageStatus::Processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            MessageStatus::Processing,
            MessageStatus::Completed,
            MessageStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("done".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn role_parses() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn default_title_detected() {
        let conv = Conversation {
            id: ConversationId::new(),
            project_id: ProjectId::new(),
            title: DEFAULT_CONVERSATION_TITLE.into(),
            updated_at: now_millis(),
        };
        assert!(conv.has_default_title());
    }

    #[test]
    fn message_omits_absent_status() {
        let msg = ChatMessage {
            id: MessageId::from_raw("msg_1"),
            conversation_id: ConversationId::from_raw("conv_1"),
            project_id: ProjectId::from_raw("proj_1"),
            role: MessageRole::User,
            content: "hi".into(),
            status: None,
            created_at: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("status").is_none());
        assert_eq!(json["conversationId"], "conv_1");
        assert!(!msg.is_processing());
    }
}
