//! Vendor-neutral JSON model gateway.
//!
//! Request: `POST {base_url}/v1/generate` with the model, system prompt,
//! transcript, and tool definitions. Response: `{ "content": ..., "stop_reason": ... }`
//! where `content` is either a plain string or a list of text/tool-call fragments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use polaris_core::context::LlmContext;
use polaris_core::errors::GatewayError;
use polaris_core::ids::ToolCallId;
use polaris_core::messages::{AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock};
use polaris_core::provider::{GenerateOptions, LlmProvider};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpGatewayProvider {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl HttpGatewayProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/generate", base_url.trim_end_matches('/')),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmProvider for HttpGatewayProvider {
    fn name(&self) -> &str {
        "gateway"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, context, options), fields(model = %self.model, messages = context.messages.len()))]
    async fn generate(
        &self,
        context: &LlmContext,
        options: &GenerateOptions,
    ) -> Result<AssistantMessage, GatewayError> {
        let body = build_request_body(context, options, &self.model);

        let resp = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        let text = resp.text().await.map_err(|e| self.map_transport_error(e))?;
        let message = parse_response(&text)?;
        debug!(
            tool_calls = message.tool_calls().len(),
            has_text = message.has_text(),
            "gateway response"
        );
        Ok(message)
    }
}

impl HttpGatewayProvider {
    fn map_transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::NetworkError(e.to_string())
        }
    }
}

/// Convert an [`LlmContext`] into the gateway request body.
pub fn build_request_body(context: &LlmContext, options: &GenerateOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": context.messages.iter().map(convert_message).collect::<Vec<_>>(),
    });

    if let Some(system) = &context.system_prompt {
        body["system"] = json!(system);
    }
    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }
    if !options.stop_sequences.is_empty() {
        body["stop"] = json!(options.stop_sequences);
    }
    if !context.tools.is_empty() {
        body["tools"] = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema,
                })
            })
            .collect();
    }

    body
}

fn convert_message(message: &Message) -> Value {
    match message {
        Message::User(user) => json!({"role": "user", "content": user.content}),
        Message::Assistant(assistant) => {
            let content: Vec<Value> = assistant
                .content
                .iter()
                .map(|c| match c {
                    AssistantContent::Text { text } => json!({"type": "text", "text": text}),
                    AssistantContent::ToolCall(call) => json!({
                        "type": "tool_call",
                        "id": call.id.as_str(),
                        "name": call.name,
                        "arguments": call.arguments,
                    }),
                })
                .collect();
            json!({"role": "assistant", "content": content})
        }
        Message::ToolResult(result) => json!({
            "role": "tool",
            "tool_call_id": result.tool_call_id.as_str(),
            "name": result.tool_name,
            "content": result.content,
            "is_error": result.is_error,
        }),
    }
}

#[derive(Deserialize)]
struct GatewayResponse {
    content: GatewayContent,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GatewayContent {
    Text(String),
    Fragments(Vec<GatewayFragment>),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GatewayFragment {
    Text {
        text: String,
    },
    ToolCall {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

/// Parse a gateway response body. Missing tool call ids are generated.
pub fn parse_response(text: &str) -> Result<AssistantMessage, GatewayError> {
    let parsed: GatewayResponse =
        serde_json::from_str(text).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

    let content: Vec<AssistantContent> = match parsed.content {
        GatewayContent::Text(text) => vec![AssistantContent::Text { text }],
        GatewayContent::Fragments(fragments) => fragments
            .into_iter()
            .map(|f| match f {
                GatewayFragment::Text { text } => AssistantContent::Text { text },
                GatewayFragment::ToolCall { id, name, arguments } => {
                    AssistantContent::ToolCall(ToolCallBlock {
                        id: id.map(ToolCallId::from_raw).unwrap_or_default(),
                        name,
                        arguments: if arguments.is_null() { json!({}) } else { arguments },
                    })
                }
            })
            .collect(),
    };

    let has_calls = content
        .iter()
        .any(|c| matches!(c, AssistantContent::ToolCall(_)));
    let stop_reason = match parsed.stop_reason.as_deref() {
        Some("tool_use") => Some(StopReason::ToolUse),
        Some("max_tokens") => Some(StopReason::MaxTokens),
        Some("stop_sequence") => Some(StopReason::StopSequence),
        Some("end_turn") => Some(StopReason::EndTurn),
        _ if has_calls => Some(StopReason::ToolUse),
        _ => Some(StopReason::EndTurn),
    };

    Ok(AssistantMessage {
        content,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use polaris_core::tools::ToolDefinition;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn request_body_carries_transcript_and_tools() {
        let mut ctx = LlmContext::new("you edit files").with_tools(vec![ToolDefinition {
            name: "listFiles".into(),
            description: "List files".into(),
            parameters_schema: json!({"type": "object"}),
        }]);
        ctx.push(Message::user_text("hi"));
        ctx.push(Message::tool_result(ToolCallId::from_raw("toolu_1"), "listFiles", "[]", false));

        let options = GenerateOptions {
            max_tokens: Some(1024),
            ..Default::default()
        };
        let body = build_request_body(&ctx, &options, "agent-default");
        assert_eq!(body["model"], "agent-default");
        assert_eq!(body["system"], "you edit files");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "tool");
        assert_eq!(body["messages"][1]["tool_call_id"], "toolu_1");
        assert_eq!(body["tools"][0]["name"], "listFiles");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parses_plain_string_content() {
        let msg = parse_response(r#"{"content":"Hello"}"#).unwrap();
        assert_eq!(msg.text_content(), "Hello");
        assert_eq!(msg.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn parses_fragments_with_tool_calls() {
        let msg = parse_response(
            r#"{"content":[
                {"type":"text","text":"Let me look."},
                {"type":"tool_call","id":"toolu_9","name":"listFiles"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(msg.text_content(), "Let me look.");
        let calls = msg.tool_calls();
        assert_eq!(calls[0].id.as_str(), "toolu_9");
        assert_eq!(calls[0].arguments, json!({}));
        assert_eq!(msg.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn malformed_body_is_fatal() {
        let err = parse_response("not json").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn generate_round_trip_against_local_gateway() {
        let router = Router::new().route(
            "/v1/generate",
            post(|Json(body): Json<Value>| async move {
                let last = body["messages"][0]["content"].as_str().unwrap_or("").to_string();
                Json(json!({"content": format!("echo: {last}")}))
            }),
        );
        let base = serve(router).await;

        let provider = HttpGatewayProvider::new(&base, "agent-default", Duration::from_secs(5)).unwrap();
        let mut ctx = LlmContext::default();
        ctx.push(Message::user_text("ping"));
        let reply = provider.generate(&ctx, &GenerateOptions::default()).await.unwrap();
        assert_eq!(reply.text_content(), "echo: ping");
    }

    #[tokio::test]
    async fn rate_limit_status_carries_retry_after() {
        let router = Router::new().route(
            "/v1/generate",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
        );
        let base = serve(router).await;

        let provider = HttpGatewayProvider::new(&base, "m", Duration::from_secs(5)).unwrap();
        let err = provider
            .generate(&LlmContext::default(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let router = Router::new().route(
            "/v1/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(router).await;

        let provider = HttpGatewayProvider::new(&base, "m", Duration::from_secs(5)).unwrap();
        let err = provider
            .generate(&LlmContext::default(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let provider = HttpGatewayProvider::new("http://gw.local/", "m", Duration::from_secs(1)).unwrap();
        assert_eq!(provider.endpoint(), "http://gw.local/v1/generate");
    }
}
