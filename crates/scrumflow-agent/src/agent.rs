//! Agent: a reasoning service bound to a prompt, tools and an output schema
//!
//! `run` loops reason → call tools → reason until the service gives a final
//! answer, an interruption point is reached, or the step limit trips.
//! `resume` answers the pending tool calls of an interrupted run and carries on.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::schema::OutputSchema;
use crate::service::{ReasoningRequest, ReasoningService};
use crate::tools::{ToolContext, ToolEffect, ToolRegistry};
use scrumflow_core::{
    dangling_tool_calls, Interrupt, InterruptKind, Message, ResumeCommand, Result, ScrumError,
    ToolCall,
};

const DEFAULT_MAX_STEPS: usize = 25;

/// Which tool calls pause the agent before running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterruptPolicy {
    /// Only human-input tools pause
    #[default]
    Never,
    /// Creates and writes wait for approval
    Mutating,
    /// Every tool call waits for approval
    AllTools,
}

/// Outcome of one agent run
#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    /// Messages produced by this run, in order
    pub messages: Vec<Message>,
    /// Validated structured answer, when an output schema is configured
    pub structured: Option<Value>,
    /// Set when the run stopped at an interruption point
    pub interrupt: Option<Interrupt>,
}

impl AgentRun {
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_some()
    }

    /// The final assistant message
    pub fn final_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Decode the structured answer
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        self.structured
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A named reasoning loop
#[derive(Clone)]
pub struct Agent {
    name: String,
    system_prompt: String,
    model: Option<String>,
    service: Arc<dyn ReasoningService>,
    tools: ToolRegistry,
    output: Option<OutputSchema>,
    interrupt: InterruptPolicy,
    max_steps: usize,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools)
            .field("output", &self.output.as_ref().map(|o| o.name().to_string()))
            .field("interrupt", &self.interrupt)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        service: Arc<dyn ReasoningService>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model: None,
            service,
            tools: ToolRegistry::new(),
            output: None,
            interrupt: InterruptPolicy::Never,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Add tools discovered for a single invocation
    pub fn with_extra_tools(mut self, tools: &ToolRegistry) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_output(mut self, schema: OutputSchema) -> Self {
        self.output = Some(schema);
        self
    }

    pub fn with_interrupt(mut self, policy: InterruptPolicy) -> Self {
        self.interrupt = policy;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run from `history` until a final answer or an interruption point
    pub async fn run(&self, history: &[Message], ctx: &ToolContext) -> Result<AgentRun> {
        info!("Agent '{}' starting with {} messages", self.name, history.len());
        self.drive(history.to_vec(), history.len(), ctx).await
    }

    /// Answer the dangling tool calls at the end of `history` and continue
    pub async fn resume(
        &self,
        history: &[Message],
        ctx: &ToolContext,
        command: ResumeCommand,
    ) -> Result<AgentRun> {
        let pending = dangling_tool_calls(history);
        if pending.is_empty() {
            return Err(ScrumError::InvalidResume(format!(
                "agent '{}' has no pending tool calls",
                self.name
            )));
        }

        let kind = if pending.iter().any(|c| self.is_human_input(c)) {
            InterruptKind::HumanInput
        } else {
            InterruptKind::Approval
        };
        info!(
            "Agent '{}' resuming {} pending calls ({:?})",
            self.name,
            pending.len(),
            kind
        );

        let results = match (kind, command) {
            (InterruptKind::HumanInput, ResumeCommand::Provide { value }) => {
                self.answer_with(&pending, &value, ctx).await
            }
            (InterruptKind::HumanInput, ResumeCommand::Reject { reason }) => {
                refuse(&pending, &format!("The user declined to answer: {}", reason))
            }
            (InterruptKind::HumanInput, ResumeCommand::Approve) => {
                return Err(ScrumError::InvalidResume(format!(
                    "agent '{}' is waiting for an answer, not an approval",
                    self.name
                )))
            }
            (InterruptKind::Approval, ResumeCommand::Approve) => {
                self.tools.execute_calls(&pending, ctx).await
            }
            (InterruptKind::Approval, ResumeCommand::Reject { reason }) => {
                refuse(&pending, &format!("Rejected by the user: {}", reason))
            }
            (InterruptKind::Approval, ResumeCommand::Provide { .. }) => {
                return Err(ScrumError::InvalidResume(format!(
                    "agent '{}' is waiting for approval of {} tool calls",
                    self.name,
                    pending.len()
                )))
            }
        };

        let mut transcript = history.to_vec();
        transcript.extend(results);
        self.drive(transcript, history.len(), ctx).await
    }

    /// The interruption a history ending in dangling calls stands for
    pub fn pending_interrupt(&self, history: &[Message]) -> Option<Interrupt> {
        let pending = dangling_tool_calls(history);
        if pending.is_empty() {
            return None;
        }
        self.interrupt_for(&pending)
            .or_else(|| Some(Interrupt::approval(&self.name, pending)))
    }

    async fn drive(
        &self,
        mut transcript: Vec<Message>,
        produced_from: usize,
        ctx: &ToolContext,
    ) -> Result<AgentRun> {
        let tools = self.tools.specs();

        for step in 1..=self.max_steps {
            let request = ReasoningRequest {
                agent: self.name.clone(),
                model: self.model.clone(),
                system_prompt: self.system_prompt.clone(),
                messages: transcript.clone(),
                tools: tools.clone(),
                output_schema: self.output.clone(),
            };
            debug!(
                "Agent '{}' step {}/{} with {} messages",
                self.name,
                step,
                self.max_steps,
                transcript.len()
            );

            let response = self.service.invoke(&request).await?;
            let message = response.message.with_default_name(&self.name);
            let calls = message.tool_calls().to_vec();
            transcript.push(message);

            if calls.is_empty() {
                let structured = self.validate_answer(response.structured, &transcript);
                return Ok(AgentRun {
                    messages: transcript.split_off(produced_from),
                    structured,
                    interrupt: None,
                });
            }

            if let Some(interrupt) = self.interrupt_for(&calls) {
                info!(
                    "Agent '{}' suspended before {} tool calls ({:?})",
                    self.name,
                    calls.len(),
                    interrupt.kind
                );
                return Ok(AgentRun {
                    messages: transcript.split_off(produced_from),
                    structured: None,
                    interrupt: Some(interrupt),
                });
            }

            let results = self.tools.execute_calls(&calls, ctx).await;
            transcript.extend(results);
        }

        Err(ScrumError::MaxStepsExceeded {
            agent: self.name.clone(),
            max_steps: self.max_steps,
        })
    }

    fn validate_answer(&self, structured: Option<Value>, transcript: &[Message]) -> Option<Value> {
        let schema = self.output.as_ref()?;
        let content = transcript.last().map(|m| m.content()).unwrap_or_default();
        match schema.extract(structured, content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "Agent '{}' answer failed {} validation: {}",
                    self.name,
                    schema.name(),
                    e
                );
                None
            }
        }
    }

    fn is_human_input(&self, call: &ToolCall) -> bool {
        self.tools.effect_of(&call.name) == Some(ToolEffect::HumanInput)
    }

    fn interrupt_for(&self, calls: &[ToolCall]) -> Option<Interrupt> {
        if let Some(asking) = calls.iter().find(|c| self.is_human_input(c)) {
            let question = self
                .tools
                .get(&asking.name)
                .and_then(|tool| tool.question(&asking.arguments));
            return Some(Interrupt::human_input(&self.name, question, calls.to_vec()));
        }

        let gated = match self.interrupt {
            InterruptPolicy::Never => false,
            InterruptPolicy::Mutating => calls.iter().any(|c| {
                self.tools
                    .effect_of(&c.name)
                    .is_some_and(|effect| effect.is_mutating())
            }),
            InterruptPolicy::AllTools => true,
        };
        gated.then(|| Interrupt::approval(&self.name, calls.to_vec()))
    }

    /// Human-input calls receive `value`; the rest of the turn executes
    async fn answer_with(&self, pending: &[ToolCall], value: &str, ctx: &ToolContext) -> Vec<Message> {
        let others: Vec<ToolCall> = pending
            .iter()
            .filter(|c| !self.is_human_input(c))
            .cloned()
            .collect();
        let mut executed = self.tools.execute_calls(&others, ctx).await.into_iter();

        pending
            .iter()
            .filter_map(|call| {
                if self.is_human_input(call) {
                    Some(Message::tool(&call.id, &call.name, value))
                } else {
                    executed.next()
                }
            })
            .collect()
    }
}

fn refuse(pending: &[ToolCall], text: &str) -> Vec<Message> {
    pending
        .iter()
        .map(|call| Message::tool(&call.id, &call.name, text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{builtin_tools, COLLECT_MORE_DATA, ESTIMATE_EFFORT};
    use crate::mock::{MockReasoningService, MockReply};
    use crate::tools::{Tool, ToolSpec};
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Titles {
        titles: Vec<String>,
    }

    struct CountingWrite {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingWrite {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("save_sprint", "persist a sprint", ToolEffect::Write)
        }

        async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> Result<String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok("saved".to_string())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("thread-1")
    }

    #[tokio::test]
    async fn test_tool_loop_then_structured_answer() {
        let mock = Arc::new(
            MockReasoningService::new()
                .with_tool_calls(
                    "planner",
                    vec![ToolCall::new("c1", ESTIMATE_EFFORT, json!({"title": "Login page"}))],
                )
                .with_structured("planner", json!({"titles": ["Login page"]})),
        );
        let agent = Agent::new("planner", "plan things", mock.clone())
            .with_tools(builtin_tools())
            .with_output(OutputSchema::of::<Titles>("titles"));

        let run = agent.run(&[Message::human("Build login")], &ctx()).await.unwrap();

        assert!(!run.is_interrupted());
        assert_eq!(run.messages.len(), 3);
        assert_eq!(run.messages[1].content(), r#"{"story_points":4}"#);
        let titles: Titles = run.parse().unwrap();
        assert_eq!(titles.titles, vec!["Login page"]);

        let second = &mock.requests("planner")[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.tools.len(), builtin_tools().len());
    }

    #[tokio::test]
    async fn test_invalid_answer_keeps_raw_message() {
        let mock = Arc::new(MockReasoningService::new().with_text("planner", "I could not decide"));
        let agent = Agent::new("planner", "plan", mock)
            .with_output(OutputSchema::of::<Titles>("titles"));

        let run = agent.run(&[Message::human("hi")], &ctx()).await.unwrap();
        assert!(run.structured.is_none());
        assert_eq!(run.final_message().unwrap().content(), "I could not decide");
    }

    #[tokio::test]
    async fn test_step_limit_is_fatal() {
        let mock = Arc::new(MockReasoningService::new().with_fallback(
            "looper",
            MockReply::tool_calls(vec![ToolCall::new("c", ESTIMATE_EFFORT, json!({"title": "x"}))]),
        ));
        let agent = Agent::new("looper", "loop", mock.clone())
            .with_tools(builtin_tools())
            .with_max_steps(3);

        let err = agent.run(&[Message::human("go")], &ctx()).await.unwrap_err();
        assert!(matches!(err, ScrumError::MaxStepsExceeded { max_steps: 3, .. }));
        assert_eq!(mock.calls("looper"), 3);
    }

    #[tokio::test]
    async fn test_question_suspends_and_resume_continues() {
        let mock = Arc::new(
            MockReasoningService::new()
                .with_tool_calls(
                    "planner",
                    vec![ToolCall::new(
                        "q1",
                        COLLECT_MORE_DATA,
                        json!({"question": "Web or mobile?"}),
                    )],
                )
                .with_text("planner", "Planning a web app"),
        );
        let agent = Agent::new("planner", "plan", mock.clone()).with_tools(builtin_tools());
        let history = vec![Message::human("Build an app")];

        let run = agent.run(&history, &ctx()).await.unwrap();
        let interrupt = run.interrupt.clone().unwrap();
        assert_eq!(interrupt.kind, InterruptKind::HumanInput);
        assert_eq!(interrupt.question.as_deref(), Some("Web or mobile?"));
        assert_eq!(mock.calls("planner"), 1);

        let mut suspended = history.clone();
        suspended.extend(run.messages);
        assert_eq!(agent.pending_interrupt(&suspended), Some(interrupt));

        let resumed = agent
            .resume(&suspended, &ctx(), ResumeCommand::provide("web"))
            .await
            .unwrap();
        assert_eq!(resumed.messages[0], Message::tool("q1", COLLECT_MORE_DATA, "web"));
        assert_eq!(resumed.final_message().unwrap().content(), "Planning a web app");

        let err = agent
            .resume(&history, &ctx(), ResumeCommand::provide("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::InvalidResume(_)));
    }

    #[tokio::test]
    async fn test_mutating_calls_wait_for_approval() {
        let count = Arc::new(AtomicUsize::new(0));
        let tools = builtin_tools().with(CountingWrite {
            count: count.clone(),
        });
        let save = ToolCall::new("w1", "save_sprint", json!({}));
        let mock = Arc::new(
            MockReasoningService::new()
                .with_tool_calls("sprinter", vec![save.clone()])
                .with_text("sprinter", "Saved")
                .with_text("sprinter", "Not saved"),
        );
        let agent = Agent::new("sprinter", "plan sprints", mock)
            .with_tools(tools)
            .with_interrupt(InterruptPolicy::Mutating);
        let history = vec![Message::human("save it")];

        let run = agent.run(&history, &ctx()).await.unwrap();
        assert_eq!(run.interrupt.as_ref().unwrap().kind, InterruptKind::Approval);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let mut suspended = history.clone();
        suspended.extend(run.messages);

        let err = agent
            .resume(&suspended, &ctx(), ResumeCommand::provide("yes"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::InvalidResume(_)));

        let approved = agent
            .resume(&suspended, &ctx(), ResumeCommand::Approve)
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(approved.messages[0].content(), "saved");

        let rejected = agent
            .resume(&suspended, &ctx(), ResumeCommand::reject("wrong dates"))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(rejected.messages[0].content().contains("wrong dates"));
    }

    #[tokio::test]
    async fn test_read_only_calls_run_without_approval() {
        let mock = Arc::new(
            MockReasoningService::new()
                .with_tool_calls(
                    "sprinter",
                    vec![ToolCall::new("r1", ESTIMATE_EFFORT, json!({"title": "a b"}))],
                )
                .with_text("sprinter", "done"),
        );
        let agent = Agent::new("sprinter", "plan", mock)
            .with_tools(builtin_tools())
            .with_interrupt(InterruptPolicy::Mutating);

        let run = agent.run(&[Message::human("go")], &ctx()).await.unwrap();
        assert!(!run.is_interrupted());
        assert_eq!(run.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_approved_resume_matches_direct_execution() {
        let calls = vec![
            ToolCall::new("w1", "save_sprint", json!({})),
            ToolCall::new("r1", ESTIMATE_EFFORT, json!({"title": "Sprint board"})),
        ];
        let script = || {
            Arc::new(
                MockReasoningService::new()
                    .with_tool_calls("sprinter", calls.clone())
                    .with_text("sprinter", "Saved"),
            )
        };
        let tools = || {
            builtin_tools().with(CountingWrite {
                count: Arc::new(AtomicUsize::new(0)),
            })
        };
        let history = vec![Message::human("save the plan")];

        let direct_mock = script();
        let direct = Agent::new("sprinter", "plan sprints", direct_mock.clone())
            .with_tools(tools())
            .with_interrupt(InterruptPolicy::Never)
            .run(&history, &ctx())
            .await
            .unwrap();

        let gated_mock = script();
        let gated = Agent::new("sprinter", "plan sprints", gated_mock.clone())
            .with_tools(tools())
            .with_interrupt(InterruptPolicy::Mutating);
        let first = gated.run(&history, &ctx()).await.unwrap();
        assert!(first.is_interrupted());
        let mut suspended = history.clone();
        suspended.extend(first.messages);
        let resumed = gated
            .resume(&suspended, &ctx(), ResumeCommand::Approve)
            .await
            .unwrap();

        let mut via_resume = suspended.clone();
        via_resume.extend(resumed.messages);
        let mut via_direct = history.clone();
        via_direct.extend(direct.messages);
        assert_eq!(via_resume, via_direct);

        // The service saw the same conversation after the tool results
        assert_eq!(
            gated_mock.requests("sprinter")[1].messages,
            direct_mock.requests("sprinter")[1].messages
        );
    }

    #[tokio::test]
    async fn test_answered_question_reads_like_a_tool_result() {
        let ask = ToolCall::new("q1", COLLECT_MORE_DATA, json!({"question": "How many devs?"}));
        let estimate = ToolCall::new("r1", ESTIMATE_EFFORT, json!({"title": "Login page"}));
        let mock = Arc::new(
            MockReasoningService::new()
                .with_tool_calls("planner", vec![ask.clone(), estimate.clone()])
                .with_text("planner", "Two devs noted"),
        );
        let agent = Agent::new("planner", "plan", mock.clone()).with_tools(builtin_tools());
        let history = vec![Message::human("Plan the login work")];

        let run = agent.run(&history, &ctx()).await.unwrap();
        let mut suspended = history.clone();
        suspended.extend(run.messages);
        let resumed = agent
            .resume(&suspended, &ctx(), ResumeCommand::provide("two"))
            .await
            .unwrap();

        // Same as if the question tool had returned the answer itself
        let mut expected = suspended.clone();
        expected.push(Message::tool("q1", COLLECT_MORE_DATA, "two"));
        expected.extend(builtin_tools().execute_calls(&[estimate], &ctx()).await);
        assert_eq!(mock.requests("planner")[1].messages, expected);

        expected.push(resumed.final_message().unwrap().clone());
        let mut actual = suspended;
        actual.extend(resumed.messages);
        assert_eq!(actual, expected);
    }
}
