//! Team supervisor: picks the next member to act, or FINISH
//!
//! A member that ends its turn with a blocking message (it needs the user, or
//! it failed) stops the team immediately without asking the reasoning
//! service. Otherwise the service chooses among the members; an answer that
//! names nobody valid also finishes the run.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::graph::END;
use crate::node::{Node, NodeContext, NodeOutcome};
use crate::state::{StateUpdate, WorkflowState};
use scrumflow_agent::{OutputSchema, ReasoningRequest, ReasoningService};
use scrumflow_core::{Message, Result, ScrumError};

/// Routing target that ends the team's run
pub const FINISH: &str = "FINISH";

/// Author name of the supervisor's closing message
pub const SUPERVISOR_NAME: &str = "Supervisor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RoutingDecision {
    /// A member name or FINISH
    pub next: String,
    #[serde(default)]
    pub reason: String,
}

impl RoutingDecision {
    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            next: FINISH.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_finish(&self) -> bool {
        self.next == FINISH
    }
}

/// State carrying the supervisor's last routing choice
pub trait SupervisedState: WorkflowState {
    /// Field the supervisor writes its choice to
    const NEXT_FIELD: &'static str = "next";

    fn next_member(&self) -> Option<&str>;
}

pub struct TeamSupervisor {
    members: Vec<String>,
    service: Arc<dyn ReasoningService>,
    prompt: String,
    model: Option<String>,
}

impl TeamSupervisor {
    pub fn new(members: Vec<String>, service: Arc<dyn ReasoningService>) -> Self {
        let prompt = default_prompt(&members);
        Self {
            members,
            service,
            prompt,
            model: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Choose who acts next given the conversation so far
    pub async fn route(&self, history: &[Message]) -> Result<RoutingDecision> {
        if let Some(last) = history.last().filter(|m| m.is_blocking()) {
            info!("Last message is blocking, finishing without routing");
            return Ok(RoutingDecision::finish(format!(
                "Stopping until the user responds: {}",
                last.content()
            )));
        }

        let mut request = ReasoningRequest::new("supervisor", &self.prompt, history.to_vec());
        request.model = self.model.clone();
        let schema = self.output_schema();
        request.output_schema = Some(schema.clone());

        let response = self.service.invoke(&request).await?;
        match schema.extract(response.structured, response.message.content()) {
            Ok(value) => {
                let decision: RoutingDecision = serde_json::from_value(value)?;
                debug!("Supervisor chose '{}': {}", decision.next, decision.reason);
                Ok(decision)
            }
            Err(e) => {
                warn!("Supervisor gave no usable routing decision, finishing: {}", e);
                Ok(RoutingDecision::finish(
                    "No valid routing decision was returned",
                ))
            }
        }
    }

    fn output_schema(&self) -> OutputSchema {
        let mut options: Vec<String> = self.members.clone();
        options.push(FINISH.to_string());
        let allowed = options.clone();

        let mut schema = OutputSchema::of::<RoutingDecision>("route").with_check(move |value: &Value| {
            let next = value.get("next").and_then(Value::as_str).unwrap_or_default();
            if allowed.iter().any(|o| o == next) {
                Ok(())
            } else {
                Err(ScrumError::SchemaValidation(format!(
                    "'{}' is not one of {}",
                    next,
                    allowed.join(", ")
                )))
            }
        });
        if let Some(next) = schema
            .schema_mut()
            .get_mut("properties")
            .and_then(|p| p.get_mut("next"))
        {
            next["enum"] = json!(options);
        }
        schema
    }
}

fn default_prompt(members: &[String]) -> String {
    format!(
        "You are a supervisor managing a conversation between these workers: {}. \
         Given the user request and the conversation so far, respond with the worker \
         to act next. Each worker performs a task and responds with its results. \
         When the request is satisfied, respond with {}. \
         Answer with JSON: {{\"next\": <worker or {}>, \"reason\": <short reason>}}.",
        members.join(", "),
        FINISH,
        FINISH
    )
}

/// Graph node wrapping a [`TeamSupervisor`]
pub struct SupervisorNode {
    supervisor: TeamSupervisor,
}

impl SupervisorNode {
    pub fn new(supervisor: TeamSupervisor) -> Self {
        Self { supervisor }
    }

    /// Path map for `add_conditional_edges`: every member plus FINISH → END
    pub fn paths(&self) -> Vec<(String, String)> {
        let mut paths: Vec<(String, String)> = self
            .supervisor
            .members
            .iter()
            .map(|m| (m.clone(), m.clone()))
            .collect();
        paths.push((FINISH.to_string(), END.to_string()));
        paths
    }
}

#[async_trait]
impl<S: SupervisedState> Node<S> for SupervisorNode {
    async fn run(&self, state: &S, _ctx: &NodeContext) -> Result<NodeOutcome> {
        let decision = match self.supervisor.route(state.messages()).await {
            Ok(decision) => decision,
            Err(e) if e.is_recoverable() => {
                warn!("Supervisor could not reach the reasoning service: {}", e);
                RoutingDecision::finish(format!("Routing failed: {}", e))
            }
            Err(e) => return Err(e),
        };

        let mut update = StateUpdate::new().with(S::NEXT_FIELD, &decision.next)?;
        if decision.is_finish() {
            update = update.with_message(Message::assistant_named(
                SUPERVISOR_NAME,
                finish_text(&decision),
            ))?;
        }
        Ok(NodeOutcome::Update(update))
    }
}

fn finish_text(decision: &RoutingDecision) -> String {
    if decision.reason.is_empty() {
        "Work is complete.".to_string()
    } else {
        decision.reason.clone()
    }
}

/// Router for the supervisor's conditional edges
pub fn route_by_next<S: SupervisedState>(state: &S) -> String {
    state.next_member().unwrap_or(FINISH).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrumflow_agent::{MockReasoningService, MockReply};

    fn members() -> Vec<String> {
        vec!["BacklogAgent".to_string(), "SprintAgent".to_string()]
    }

    #[tokio::test]
    async fn test_blocking_message_finishes_without_service() {
        let mock = Arc::new(MockReasoningService::new());
        let supervisor = TeamSupervisor::new(members(), mock.clone());
        let history = vec![
            Message::human("plan sprints"),
            Message::failure(
                "SprintAgent",
                &ScrumError::MissingPrecondition("Which workspace should I use?".to_string()),
            ),
        ];

        let decision = supervisor.route(&history).await.unwrap();
        assert!(decision.is_finish());
        assert!(decision.reason.contains("Which workspace"));
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_valid_choice_is_returned() {
        let mock = Arc::new(MockReasoningService::new().with_structured(
            "supervisor",
            json!({"next": "SprintAgent", "reason": "backlog is ready"}),
        ));
        let supervisor = TeamSupervisor::new(members(), mock.clone());

        let decision = supervisor.route(&[Message::human("go")]).await.unwrap();
        assert_eq!(decision.next, "SprintAgent");

        let request = &mock.requests("supervisor")[0];
        let schema = request.output_schema.as_ref().unwrap().schema();
        assert_eq!(
            schema["properties"]["next"]["enum"],
            json!(["BacklogAgent", "SprintAgent", "FINISH"])
        );
    }

    #[tokio::test]
    async fn test_unknown_member_falls_back_to_finish() {
        let mock = Arc::new(
            MockReasoningService::new()
                .with_structured("supervisor", json!({"next": "QaAgent"}))
                .with_text("supervisor", "I think we are done"),
        );
        let supervisor = TeamSupervisor::new(members(), mock);

        assert!(supervisor.route(&[Message::human("go")]).await.unwrap().is_finish());
        assert!(supervisor.route(&[Message::human("go")]).await.unwrap().is_finish());
    }

    #[tokio::test]
    async fn test_service_errors_propagate() {
        let mock = Arc::new(
            MockReasoningService::new().with_reply("supervisor", MockReply::fail("bad request")),
        );
        let supervisor = TeamSupervisor::new(members(), mock);
        assert!(matches!(
            supervisor.route(&[Message::human("go")]).await,
            Err(ScrumError::Service(_))
        ));
    }

    #[test]
    fn test_paths_include_finish() {
        let node = SupervisorNode::new(TeamSupervisor::new(
            members(),
            Arc::new(MockReasoningService::new()),
        ));
        let paths = node.paths();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&(FINISH.to_string(), END.to_string())));
    }
}
