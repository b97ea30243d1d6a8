//! Prompt text for the coding agent and the title generator.

use polaris_core::context::LlmContext;
use polaris_core::conversation::{ChatMessage, MessageRole};
use polaris_core::ids::MessageId;
use polaris_core::messages::Message;

pub const CODING_AGENT_PROMPT: &str = "\
You are an expert coding assistant working inside a browser-based IDE. \
You can inspect and change the files of the user's project with the tools provided.

Rules:
- Call listFiles before referring to file or folder IDs; never invent IDs.
- Read a file with readFiles before changing it with updateFile.
- Create folders with createFolder before creating files inside them.
- Keep changes focused on what the user asked for.
- When you are finished, reply with a short summary of what you did. Do not call tools in that reply.";

pub const TITLE_PROMPT: &str = "\
Generate a short, descriptive title for a conversation that starts with the message below. \
Use at most 6 words. Reply with the title only: no quotes, no punctuation at the end, no explanation.";

const MAX_TITLE_CHARS: usize = 60;

/// Past turns rendered as labelled blocks, oldest first. The current
/// placeholder and empty messages are left out.
pub fn format_history(history: &[ChatMessage], current: &MessageId) -> Option<String> {
    let turns: Vec<String> = history
        .iter()
        .filter(|m| &m.id != current && !m.content.trim().is_empty())
        .map(|m| {
            let label = match m.role {
                MessageRole::User => "USER",
                MessageRole::Assistant => "ASSISTANT",
            };
            format!("{label}: {}", m.content.trim())
        })
        .collect();
    (!turns.is_empty()).then(|| turns.join("\n\n"))
}

/// The agent prompt, extended with recent history when there is any.
pub fn system_prompt(history: &[ChatMessage], current: &MessageId) -> String {
    match format_history(history, current) {
        Some(past) => format!(
            "{CODING_AGENT_PROMPT}\n\n\
             ## Previous conversation (for context only)\n\
             The messages below were already answered. Do not answer them again; \
             respond only to the user's newest message.\n\n\
             {past}"
        ),
        None => CODING_AGENT_PROMPT.to_string(),
    }
}

/// A single-shot, tool-free context for naming a conversation.
pub fn title_context(user_message: &str) -> LlmContext {
    let mut ctx = LlmContext::new(TITLE_PROMPT);
    ctx.push(Message::user_text(user_message));
    ctx
}

/// First line of a generated title, without quotes or trailing punctuation.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let trimmed = line
        .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim_end_matches(['.', '!', '?', ':'])
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_CHARS).collect())
}
