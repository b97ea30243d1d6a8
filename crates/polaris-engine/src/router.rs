//! Agent router: the bounded ReAct loop.
//!
//! Each model turn and each tool call is a journaled step, so a resumed job
//! replays finished turns and never repeats a finished tool side effect.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use polaris_core::context::LlmContext;
use polaris_core::events::AgentEvent;
use polaris_core::messages::{AssistantMessage, Message, ToolCallBlock};
use polaris_core::provider::{GenerateOptions, LlmProvider};
use polaris_core::tools::{ToolContext, ToolError, ToolResult};

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::steps::StepRunner;
use crate::truncate::{preview, truncate_output, DEFAULT_MAX_OUTPUT};

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Answer used when the loop ends without any assistant text.
pub const FALLBACK_ANSWER: &str =
    "I wasn't able to put together a response for that. Please try rephrasing your request.";

const PREVIEW_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub max_iterations: u32,
    pub generate_options: GenerateOptions,
    pub tool_timeout: Duration,
    pub tool_output_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            generate_options: GenerateOptions::default(),
            tool_timeout: Duration::from_secs(120),
            tool_output_limit: DEFAULT_MAX_OUTPUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterState {
    Thinking,
    /// The last turn is being inspected.
    Deciding,
    ToolExecuting,
    Done,
}

impl RouterState {
    /// Advance one transition. `reply` is the model turn being inspected and
    /// only matters when leaving `Deciding`.
    pub fn next(self, reply: &AssistantMessage) -> Self {
        match self {
            Self::Thinking => Self::Deciding,
            Self::Deciding => Self::after_turn(reply),
            Self::ToolExecuting => Self::Thinking,
            Self::Done => Self::Done,
        }
    }

    /// Where the loop goes after inspecting one model turn.
    pub fn after_turn(reply: &AssistantMessage) -> Self {
        if reply.has_text() && !reply.has_tool_calls() {
            Self::Done
        } else if reply.has_tool_calls() {
            Self::ToolExecuting
        } else {
            Self::Thinking
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterOutcome {
    pub answer: String,
    pub iterations: u32,
    pub hit_cap: bool,
}

pub struct AgentRouter {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: RouterConfig,
}

impl AgentRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: RouterConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn send_event(&self, steps: &StepRunner, event: AgentEvent) {
        if steps.events().send(event).is_err() {
            debug!("no event receivers, router event dropped");
        }
    }

    /// Run the loop until the model answers with text only or the
    /// iteration cap is reached.
    #[instrument(skip_all, fields(message_id = %steps.run_id(), model = self.provider.model()))]
    pub async fn run(
        &self,
        steps: &StepRunner,
        system_prompt: &str,
        user_message: &str,
        ctx: &ToolContext,
    ) -> Result<RouterOutcome, EngineError> {
        let mut context = LlmContext::new(system_prompt).with_tools(self.tools.definitions());
        context.push(Message::user_text(user_message));

        let mut state = RouterState::Thinking;
        let mut iterations = 0u32;
        let mut last_text: Option<String> = None;

        while iterations < self.config.max_iterations {
            iterations += 1;
            self.send_event(
                steps,
                AgentEvent::TurnStart {
                    message_id: steps.run_id().clone(),
                    turn: iterations,
                },
            );

            let reply: AssistantMessage = {
                let provider = &self.provider;
                let options = &self.config.generate_options;
                let context = &context;
                steps
                    .run(&format!("agent-turn-{iterations}"), move || async move {
                        Ok(provider.generate(context, options).await?)
                    })
                    .await?
            };

            if reply.has_text() {
                last_text = Some(reply.text_content());
            }
            let calls: Vec<ToolCallBlock> = reply.tool_calls().into_iter().cloned().collect();
            state = state.next(&reply);
            debug!(turn = iterations, state = ?state, "inspecting turn");
            state = state.next(&reply);
            debug!(turn = iterations, state = ?state, tool_calls = calls.len(), "turn decided");
            context.push(Message::Assistant(reply));

            self.send_event(
                steps,
                AgentEvent::TurnComplete {
                    message_id: steps.run_id().clone(),
                    turn: iterations,
                    tool_calls: calls.len(),
                },
            );

            match state {
                RouterState::Done => break,
                RouterState::ToolExecuting => {
                    for (index, call) in calls.iter().enumerate() {
                        let result: ToolResult = steps
                            .run(&format!("tool-{iterations}-{index}-{}", call.name), move || async move {
                                Ok(self.execute_tool(steps, call, ctx).await)
                            })
                            .await?;
                        context.push(Message::tool_result(
                            call.id.clone(),
                            call.name.clone(),
                            result.content,
                            result.is_error,
                        ));
                    }
                    state = RouterState::Thinking;
                }
                RouterState::Thinking | RouterState::Deciding => {
                    debug!(turn = iterations, "turn had neither text nor tool calls");
                    state = RouterState::Thinking;
                }
            }
        }

        let hit_cap = state != RouterState::Done;
        if hit_cap {
            warn!(iterations, "iteration cap reached, using best available answer");
        }
        let answer = last_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_ANSWER.to_string());

        info!(iterations, hit_cap, answer_len = answer.len(), "agent loop finished");
        self.send_event(
            steps,
            AgentEvent::AgentComplete {
                message_id: steps.run_id().clone(),
                iterations,
                hit_cap,
            },
        );

        Ok(RouterOutcome {
            answer,
            iterations,
            hit_cap,
        })
    }

    /// Execute one tool call. Every failure, including timeouts and panics,
    /// comes back as an error result for the model.
    async fn execute_tool(&self, steps: &StepRunner, call: &ToolCallBlock, ctx: &ToolContext) -> ToolResult {
        self.send_event(
            steps,
            AgentEvent::ToolStart {
                message_id: steps.run_id().clone(),
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
            },
        );

        let start = Instant::now();
        let result: ToolResult = match self.tools.get(&call.name) {
            None => {
                warn!(tool = %call.name, "model requested an unknown tool");
                ToolError::UnknownTool(call.name.clone()).into()
            }
            Some(tool) => {
                let outcome = tokio::time::timeout(
                    self.config.tool_timeout,
                    AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind(),
                )
                .await;
                match outcome {
                    Ok(Ok(Ok(result))) => result,
                    Ok(Ok(Err(e))) => e.into(),
                    Ok(Err(panic)) => {
                        error!(tool = %call.name, panic = %panic_message(&*panic), "tool panicked during execution");
                        ToolResult::error("Error: the tool crashed while running")
                    }
                    Err(_) => {
                        warn!(
                            tool = %call.name,
                            timeout_ms = self.config.tool_timeout.as_millis() as u64,
                            "tool timed out"
                        );
                        ToolError::Timeout(self.config.tool_timeout).into()
                    }
                }
            }
        };

        let mut result = result.with_duration(start.elapsed());
        result.content = truncate_output(&result.content, self.config.tool_output_limit);

        self.send_event(
            steps,
            AgentEvent::ToolEnd {
                message_id: steps.run_id().clone(),
                tool_call_id: call.id.clone(),
                result_preview: preview(&result.content, PREVIEW_CHARS),
                is_error: result.is_error,
                duration_ms: result.duration.as_millis() as u64,
            },
        );
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::{MemoryJournal, RetryPolicy, StepJournal};
    use crate::tools::test_support::fixture;
    use async_trait::async_trait;
    use polaris_core::errors::GatewayError;
    use polaris_core::ids::MessageId;
    use polaris_core::messages::{AssistantContent, StopReason};
    use polaris_core::tools::Tool;
    use polaris_llm::mock::{MockProvider, MockResponse};
    use polaris_store::FileStore;
    use serde_json::{json, Value};
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    fn steps_with(journal: Arc<dyn StepJournal>) -> (StepRunner, broadcast::Receiver<AgentEvent>) {
        let (tx, rx) = broadcast::channel(256);
        let runner = StepRunner::new(
            MessageId::from_raw("msg_router"),
            journal,
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            CancellationToken::new(),
            tx,
        );
        (runner, rx)
    }

    fn router(mock: Arc<MockProvider>, tools: ToolRegistry, max_iterations: u32) -> AgentRouter {
        AgentRouter::new(
            mock,
            Arc::new(tools),
            RouterConfig {
                max_iterations,
                ..Default::default()
            },
        )
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::ok("late"))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            panic!("kaboom");
        }
    }

    #[test]
    fn decision_rule() {
        assert_eq!(RouterState::after_turn(&AssistantMessage::text("done")), RouterState::Done);
        assert_eq!(RouterState::after_turn(&AssistantMessage::default()), RouterState::Thinking);
        let mixed = AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "looking".into() },
                AssistantContent::ToolCall(ToolCallBlock {
                    id: Default::default(),
                    name: "listFiles".into(),
                    arguments: json!({}),
                }),
            ],
            stop_reason: Some(StopReason::ToolUse),
        };
        assert_eq!(RouterState::after_turn(&mixed), RouterState::ToolExecuting);
    }

    #[test]
    fn every_turn_passes_through_deciding() {
        let answer = AssistantMessage::text("done");
        let empty = AssistantMessage::default();
        let state = RouterState::Thinking.next(&answer);
        assert_eq!(state, RouterState::Deciding);
        assert_eq!(state.next(&answer), RouterState::Done);
        assert_eq!(state.next(&empty), RouterState::Thinking);
        assert_eq!(RouterState::ToolExecuting.next(&empty), RouterState::Thinking);
        assert_eq!(RouterState::Done.next(&empty), RouterState::Done);
    }

    #[tokio::test]
    async fn text_only_turn_finishes_immediately() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![MockResponse::text("Hello there")]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock.clone(), fx.toolset.registry(), 20)
            .run(&steps, "system", "hi", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Hello there");
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.hit_cap);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn create_file_then_answer() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call(
                "createFiles",
                json!({"parentId": "", "files": [{"name": "index.js", "content": "console.log(1)"}]}),
            ),
            MockResponse::text("Created index.js for you."),
        ]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock.clone(), fx.toolset.registry(), 20)
            .run(&steps, "system", "Create a file named index.js", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Created index.js for you.");
        assert_eq!(outcome.iterations, 2);

        let files = fx
            .store
            .list_files_by_project(&fx.key, &fx.ctx.project_id)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "index.js");
        assert_eq!(files[0].text(), Some("console.log(1)"));

        // The second model call saw the tool result.
        let second = &mock.contexts()[1];
        assert!(matches!(second.messages.last(), Some(Message::ToolResult(r)) if !r.is_error));
    }

    #[tokio::test]
    async fn loop_stops_at_the_cap() {
        let fx = fixture().await;
        let responses = (0..25)
            .map(|_| MockResponse::tool_call("listFiles", json!({})))
            .collect();
        let mock = Arc::new(MockProvider::new(responses));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock.clone(), fx.toolset.registry(), 20)
            .run(&steps, "system", "keep listing", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 20);
        assert!(outcome.hit_cap);
        assert_eq!(outcome.answer, FALLBACK_ANSWER);
        assert_eq!(mock.call_count(), 20);
    }

    #[tokio::test]
    async fn cap_keeps_last_partial_text() {
        let fx = fixture().await;
        let turn = MockResponse::Message(AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "Still working".into() },
                AssistantContent::ToolCall(ToolCallBlock {
                    id: Default::default(),
                    name: "listFiles".into(),
                    arguments: json!({}),
                }),
            ],
            stop_reason: Some(StopReason::ToolUse),
        });
        let mock = Arc::new(MockProvider::new(vec![turn.clone(), turn.clone(), turn]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock, fx.toolset.registry(), 3)
            .run(&steps, "system", "go", &fx.ctx)
            .await
            .unwrap();
        assert!(outcome.hit_cap);
        assert_eq!(outcome.answer, "Still working");
    }

    #[tokio::test]
    async fn empty_turn_re_enters_thinking() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::Message(AssistantMessage::default()),
            MockResponse::text("second try"),
        ]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock, fx.toolset.registry(), 20)
            .run(&steps, "system", "hi", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "second try");
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn final_text_fragments_concatenate() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![MockResponse::Message(AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "Part one. ".into() },
                AssistantContent::Text { text: "Part two.".into() },
            ],
            stop_reason: Some(StopReason::EndTurn),
        })]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock, fx.toolset.registry(), 20)
            .run(&steps, "system", "hi", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Part one. Part two.");
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("runShell", json!({"cmd": "ls"})),
            MockResponse::text("I can't run commands."),
        ]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock.clone(), fx.toolset.registry(), 20)
            .run(&steps, "system", "ls", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "I can't run commands.");
        let Some(Message::ToolResult(result)) = mock.contexts()[1].messages.last().cloned() else {
            panic!("expected tool result");
        };
        assert!(result.is_error);
        assert_eq!(result.content, "Error: Unknown tool \"runShell\"");
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let fx = fixture().await;
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SlowTool));
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("slow", json!({})),
            MockResponse::text("gave up"),
        ]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));
        let router = AgentRouter::new(
            mock.clone(),
            Arc::new(tools),
            RouterConfig {
                tool_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let outcome = router.run(&steps, "system", "go", &fx.ctx).await.unwrap();
        assert_eq!(outcome.answer, "gave up");
        let Some(Message::ToolResult(result)) = mock.contexts()[1].messages.last().cloned() else {
            panic!("expected tool result");
        };
        assert!(result.is_error);
        assert!(result.content.contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_tool_is_contained() {
        let fx = fixture().await;
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(PanicTool));
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("explode", json!({})),
            MockResponse::text("recovered"),
        ]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let outcome = router(mock.clone(), tools, 20)
            .run(&steps, "system", "go", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(outcome.answer, "recovered");
        let Some(Message::ToolResult(result)) = mock.contexts()[1].messages.last().cloned() else {
            panic!("expected tool result");
        };
        assert_eq!(result.content, "Error: the tool crashed while running");
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![MockResponse::Error(
            GatewayError::AuthenticationFailed("bad key".into()),
        )]));
        let (steps, _rx) = steps_with(Arc::new(MemoryJournal::new()));

        let err = router(mock, fx.toolset.registry(), 20)
            .run(&steps, "system", "hi", &fx.ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn resumed_run_replays_turns_and_tool_calls() {
        let fx = fixture().await;
        let journal: Arc<dyn StepJournal> = Arc::new(MemoryJournal::new());
        let first = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("createFolder", json!({"name": "src", "parentId": ""})),
            MockResponse::text("Made src."),
        ]));
        let (steps, _rx) = steps_with(journal.clone());
        let outcome = router(first, fx.toolset.registry(), 20)
            .run(&steps, "system", "make src", &fx.ctx)
            .await
            .unwrap();

        // A second pass over the same journal needs no model and no tool.
        let second = Arc::new(MockProvider::new(vec![]));
        let (steps, _rx) = steps_with(journal);
        let replayed = router(second.clone(), fx.toolset.registry(), 20)
            .run(&steps, "system", "make src", &fx.ctx)
            .await
            .unwrap();
        assert_eq!(replayed, outcome);
        assert_eq!(second.call_count(), 0);

        let files = fx
            .store
            .list_files_by_project(&fx.key, &fx.ctx.project_id)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn events_describe_the_loop() {
        let fx = fixture().await;
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::tool_call("listFiles", json!({})),
            MockResponse::text("nothing here"),
        ]));
        let (steps, mut rx) = steps_with(Arc::new(MemoryJournal::new()));
        router(mock, fx.toolset.registry(), 20)
            .run(&steps, "system", "hi", &fx.ctx)
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, AgentEvent::StepCompleted { .. }) {
                kinds.push(event.event_type());
            }
        }
        assert_eq!(
            kinds,
            vec![
                "turn_start",
                "turn_complete",
                "tool_start",
                "tool_end",
                "turn_start",
                "turn_complete",
                "agent_complete"
            ]
        );
    }
}
