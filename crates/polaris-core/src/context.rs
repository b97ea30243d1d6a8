use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything a provider needs for one model call.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_prompt_and_messages() {
        let mut ctx = LlmContext::new("be brief");
        ctx.push(Message::user_text("hi"));
        assert_eq!(ctx.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(ctx.messages.len(), 1);
        assert!(ctx.tools.is_empty());
    }
}
