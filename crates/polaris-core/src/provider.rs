use async_trait::async_trait;

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::messages::AssistantMessage;

/// Options controlling a single generation.
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

/// A model capability. Implementations decide where inference happens.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(
        &self,
        context: &LlmContext,
        options: &GenerateOptions,
    ) -> Result<AssistantMessage, GatewayError>;
}
