use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use polaris_core::context::LlmContext;
use polaris_core::errors::GatewayError;
use polaris_core::ids::ToolCallId;
use polaris_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolCallBlock};
use polaris_core::provider::{GenerateOptions, LlmProvider};

/// Pre-programmed responses for deterministic testing without a model.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this assistant message.
    Message(AssistantMessage),
    /// Fail the call.
    Error(GatewayError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Message(AssistantMessage::text(text))
    }

    /// A turn that requests one tool call.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![(name, arguments)])
    }

    /// A turn that requests several tool calls, in order.
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        let content = calls
            .into_iter()
            .map(|(name, arguments)| {
                AssistantContent::ToolCall(ToolCallBlock {
                    id: ToolCallId::new(),
                    name: name.to_string(),
                    arguments,
                })
            })
            .collect();
        Self::Message(AssistantMessage {
            content,
            stop_reason: Some(StopReason::ToolUse),
        })
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every context it was called with.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    contexts: Mutex<Vec<LlmContext>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Contexts seen so far, in call order.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        context: &LlmContext,
        _options: &GenerateOptions,
    ) -> Result<AssistantMessage, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context.clone());

        let Some(response) = self.responses.get(idx) else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };
        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: &MockResponse) -> Result<AssistantMessage, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Message(message) => return Ok(message.clone()),
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}
