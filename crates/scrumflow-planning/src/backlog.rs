//! Hierarchical backlog generation
//!
//! Requirements are decomposed one level at a time: use cases, then epics,
//! user stories and tasks. The root level runs once over the conversation.
//! Every lower level fans out one branch per parent item, runs the branches
//! concurrently and gathers their children back in parent order.

use async_trait::async_trait;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::prompts;
use scrumflow_agent::builtin::estimate_effort;
use scrumflow_agent::{builtin_tools, Agent, OutputSchema, ReasoningService, ToolContext, ToolRegistry};
use scrumflow_core::config::BacklogConfig;
use scrumflow_core::{
    BacklogItem, BacklogKind, Interrupt, ItemDraft, Message, ResumeCommand, Result,
};
use scrumflow_orchestrator::{
    CheckpointStore, CompiledGraph, GraphBuilder, MergePolicy, Node, NodeContext, NodeOutcome,
    StateUpdate, WorkflowState, END,
};

pub const USE_CASE_GENERATOR: &str = "use_case_generator";
pub const EPIC_GENERATOR: &str = "epic_generator";
pub const USER_STORY_GENERATOR: &str = "user_story_generator";
pub const TASK_GENERATOR: &str = "task_generator";

/// State of the backlog team's graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacklogState {
    pub messages: Vec<Message>,
    pub requirements: String,
    pub use_cases: Vec<BacklogItem>,
    pub epics: Vec<BacklogItem>,
    pub user_stories: Vec<BacklogItem>,
    pub tasks: Vec<BacklogItem>,
}

impl WorkflowState for BacklogState {
    fn fields() -> &'static [(&'static str, MergePolicy)] {
        &[
            ("messages", MergePolicy::AccumulateMessages),
            ("requirements", MergePolicy::Replace),
            ("use_cases", MergePolicy::Append),
            ("epics", MergePolicy::Append),
            ("user_stories", MergePolicy::Append),
            ("tasks", MergePolicy::Append),
        ]
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl BacklogState {
    pub fn items(&self, kind: BacklogKind) -> &[BacklogItem] {
        match kind {
            BacklogKind::UseCase => &self.use_cases,
            BacklogKind::Epic => &self.epics,
            BacklogKind::UserStory => &self.user_stories,
            BacklogKind::Task => &self.tasks,
        }
    }

    pub fn into_backlog(self) -> Backlog {
        Backlog {
            use_cases: self.use_cases,
            epics: self.epics,
            user_stories: self.user_stories,
            tasks: self.tasks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UseCaseList {
    pub use_cases: Vec<ItemDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EpicList {
    pub epics: Vec<ItemDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserStoryList {
    pub user_stories: Vec<ItemDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskList {
    pub tasks: Vec<ItemDraft>,
}

/// The four levels of a generated backlog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backlog {
    pub use_cases: Vec<BacklogItem>,
    pub epics: Vec<BacklogItem>,
    pub user_stories: Vec<BacklogItem>,
    pub tasks: Vec<BacklogItem>,
}

impl Backlog {
    pub fn len(&self) -> usize {
        self.use_cases.len() + self.epics.len() + self.user_stories.len() + self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State field holding the items of `kind`
pub fn field_for(kind: BacklogKind) -> &'static str {
    match kind {
        BacklogKind::UseCase => "use_cases",
        BacklogKind::Epic => "epics",
        BacklogKind::UserStory => "user_stories",
        BacklogKind::Task => "tasks",
    }
}

/// Name of the agent generating `kind`
pub fn generator_name(kind: BacklogKind) -> &'static str {
    match kind {
        BacklogKind::UseCase => USE_CASE_GENERATOR,
        BacklogKind::Epic => EPIC_GENERATOR,
        BacklogKind::UserStory => USER_STORY_GENERATOR,
        BacklogKind::Task => TASK_GENERATOR,
    }
}

fn parent_of(kind: BacklogKind) -> Option<BacklogKind> {
    match kind {
        BacklogKind::UseCase => None,
        BacklogKind::Epic => Some(BacklogKind::UseCase),
        BacklogKind::UserStory => Some(BacklogKind::Epic),
        BacklogKind::Task => Some(BacklogKind::UserStory),
    }
}

fn plural(kind: BacklogKind) -> &'static str {
    match kind {
        BacklogKind::UseCase => "use cases",
        BacklogKind::Epic => "epics",
        BacklogKind::UserStory => "user stories",
        BacklogKind::Task => "tasks",
    }
}

fn output_schema(kind: BacklogKind) -> OutputSchema {
    match kind {
        BacklogKind::UseCase => OutputSchema::of::<UseCaseList>("use_cases"),
        BacklogKind::Epic => OutputSchema::of::<EpicList>("epics"),
        BacklogKind::UserStory => OutputSchema::of::<UserStoryList>("user_stories"),
        BacklogKind::Task => OutputSchema::of::<TaskList>("tasks"),
    }
}

/// Summary message a stage leaves in the conversation
pub fn stage_summary(kind: BacklogKind, count: usize) -> Message {
    let noun = if count == 1 {
        kind.to_string()
    } else {
        plural(kind).to_string()
    };
    Message::assistant_named(generator_name(kind), format!("Created {} {}.", count, noun))
}

/// Result of the root stage
#[derive(Debug, Clone, Default)]
pub struct StageRun {
    pub items: Vec<BacklogItem>,
    /// Messages to add to the conversation
    pub messages: Vec<Message>,
    pub interrupt: Option<Interrupt>,
}

/// Turns requirements into a four-level backlog
#[derive(Clone)]
pub struct BacklogGenerator {
    service: Arc<dyn ReasoningService>,
    settings: BacklogConfig,
    tools: ToolRegistry,
    max_steps: usize,
    model: Option<String>,
}

impl BacklogGenerator {
    pub fn new(service: Arc<dyn ReasoningService>, settings: BacklogConfig) -> Self {
        Self {
            service,
            settings,
            tools: builtin_tools(),
            max_steps: 25,
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn max_children(&self) -> usize {
        self.settings.max_children.max(1)
    }

    /// The agent generating one level
    pub fn agent(&self, kind: BacklogKind) -> Agent {
        Agent::new(
            generator_name(kind),
            prompts::backlog_stage(kind, self.max_children()),
            self.service.clone(),
        )
        .with_tools(self.tools.clone())
        .with_output(output_schema(kind))
        .with_max_steps(self.max_steps)
        .with_model(self.model.clone())
    }

    /// Generate the whole hierarchy without pausing for the user
    ///
    /// A root stage that asks a question yields an empty backlog.
    pub async fn generate(&self, requirements: &str, ctx: &ToolContext) -> Result<Backlog> {
        let history = vec![Message::human(requirements)];
        let root = self.use_cases(&history, ctx, None).await?;
        if let Some(interrupt) = &root.interrupt {
            warn!(
                "Use case generation stopped for the user ({}), backlog left empty",
                interrupt.prompt()
            );
            return Ok(Backlog::default());
        }

        let epics = self.expand(BacklogKind::Epic, &root.items, requirements, ctx).await?;
        let user_stories = self
            .expand(BacklogKind::UserStory, &epics, requirements, ctx)
            .await?;
        let tasks = self
            .expand(BacklogKind::Task, &user_stories, requirements, ctx)
            .await?;

        Ok(Backlog {
            use_cases: root.items,
            epics,
            user_stories,
            tasks,
        })
    }

    /// Run (or resume) the root stage over the conversation
    pub async fn use_cases(
        &self,
        history: &[Message],
        ctx: &ToolContext,
        resume: Option<ResumeCommand>,
    ) -> Result<StageRun> {
        let agent = self.agent(BacklogKind::UseCase);
        let run = match resume {
            Some(command) => agent.resume(history, ctx, command).await?,
            None => agent.run(history, ctx).await?,
        };

        if run.is_interrupted() {
            return Ok(StageRun {
                items: Vec::new(),
                messages: run.messages,
                interrupt: run.interrupt,
            });
        }

        let mut messages = run.messages;
        if run.structured.is_none() {
            warn!("Use case generator returned no structured answer");
            return Ok(StageRun {
                items: Vec::new(),
                messages,
                interrupt: None,
            });
        }

        let items = self.normalize(BacklogKind::UseCase, run.structured.as_ref(), None);
        // The raw JSON answer is replaced by a readable summary
        messages.pop();
        messages.push(stage_summary(BacklogKind::UseCase, items.len()));
        info!("Generated {} use cases", items.len());
        Ok(StageRun {
            items,
            messages,
            interrupt: None,
        })
    }

    /// Generate `kind` items for every parent, one concurrent branch each
    ///
    /// Children come back grouped by parent, in parent order. A branch that
    /// gives no structured answer or stops for the user contributes nothing.
    pub async fn expand(
        &self,
        kind: BacklogKind,
        parents: &[BacklogItem],
        requirements: &str,
        ctx: &ToolContext,
    ) -> Result<Vec<BacklogItem>> {
        if parents.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        debug!(
            "Expanding {} parents into {} (concurrency {})",
            parents.len(),
            plural(kind),
            self.settings.concurrency.max(1)
        );

        let branches = parents.iter().map(|parent| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.ok();
                self.branch(kind, parent, requirements, ctx).await
            }
        });

        let children: Vec<Vec<BacklogItem>> = join_all(branches)
            .await
            .into_iter()
            .collect::<Result<_>>()?;
        let children: Vec<BacklogItem> = children.into_iter().flatten().collect();
        info!(
            "Generated {} {} from {} parents",
            children.len(),
            plural(kind),
            parents.len()
        );
        Ok(children)
    }

    async fn branch(
        &self,
        kind: BacklogKind,
        parent: &BacklogItem,
        requirements: &str,
        ctx: &ToolContext,
    ) -> Result<Vec<BacklogItem>> {
        let request =
            prompts::branch_request(requirements, parent.kind, &parent.title, &parent.description);
        let run = self.agent(kind).run(&[Message::human(request)], ctx).await?;

        if let Some(interrupt) = &run.interrupt {
            warn!(
                "{} for {} asked the user ({}), branch left empty",
                generator_name(kind),
                parent.id,
                interrupt.prompt()
            );
            return Ok(Vec::new());
        }
        if run.structured.is_none() {
            warn!(
                "{} gave no structured answer for {}",
                generator_name(kind),
                parent.id
            );
            return Ok(Vec::new());
        }
        Ok(self.normalize(kind, run.structured.as_ref(), Some(parent)))
    }

    /// Decode drafts, cap them per parent and assign ids
    fn normalize(
        &self,
        kind: BacklogKind,
        structured: Option<&Value>,
        parent: Option<&BacklogItem>,
    ) -> Vec<BacklogItem> {
        let mut drafts: Vec<ItemDraft> = structured
            .and_then(|value| value.get(field_for(kind)))
            .and_then(|list| serde_json::from_value(list.clone()).ok())
            .unwrap_or_default();

        let cap = self.max_children();
        if drafts.len() > cap {
            warn!(
                "{} returned {} {}, keeping the first {}",
                generator_name(kind),
                drafts.len(),
                plural(kind),
                cap
            );
            drafts.truncate(cap);
        }

        drafts
            .into_iter()
            .enumerate()
            .map(|(position, draft)| {
                let mut item = draft.into_item(kind, parent, position);
                if item.estimated_effort == 0 {
                    item.estimated_effort = estimate_effort(&item.title);
                }
                item
            })
            .collect()
    }
}

/// Root stage node: use cases from the conversation
struct UseCaseStage {
    generator: Arc<BacklogGenerator>,
}

#[async_trait]
impl Node<BacklogState> for UseCaseStage {
    async fn run(&self, state: &BacklogState, ctx: &NodeContext) -> Result<NodeOutcome> {
        let mut update = StateUpdate::new();
        let mut history = state.messages.clone();
        if history.is_empty() {
            let request = Message::human(state.requirements.clone());
            update = update.with_message(request.clone())?;
            history.push(request);
        }

        let stage = self
            .generator
            .use_cases(&history, &ctx.tool_context(), ctx.resume.clone())
            .await?;
        let update = update.merge(StateUpdate::new().with_messages(stage.messages)?);

        match stage.interrupt {
            Some(interrupt) => Ok(NodeOutcome::Interrupt { update, interrupt }),
            None => Ok(NodeOutcome::Update(
                update.merge(StateUpdate::new().with("use_cases", stage.items)?),
            )),
        }
    }
}

/// Fan-out node generating one level below the previous stage
struct ExpandStage {
    generator: Arc<BacklogGenerator>,
    kind: BacklogKind,
}

#[async_trait]
impl Node<BacklogState> for ExpandStage {
    async fn run(&self, state: &BacklogState, ctx: &NodeContext) -> Result<NodeOutcome> {
        let parents = parent_of(self.kind)
            .map(|parent| state.items(parent))
            .unwrap_or_default();
        if parents.is_empty() {
            debug!("No parents to expand into {}", plural(self.kind));
            return Ok(NodeOutcome::Update(StateUpdate::new()));
        }

        let children = self
            .generator
            .expand(self.kind, parents, &state.requirements, &ctx.tool_context())
            .await?;
        let summary = stage_summary(self.kind, children.len());
        Ok(NodeOutcome::Update(
            StateUpdate::new()
                .with(field_for(self.kind), children)?
                .with_message(summary)?,
        ))
    }
}

/// The backlog team: use_case → epic → user_story → task
pub fn backlog_graph(
    generator: Arc<BacklogGenerator>,
    store: Arc<dyn CheckpointStore>,
) -> Result<CompiledGraph<BacklogState>> {
    GraphBuilder::new("backlog")
        .add_node(
            "use_case",
            UseCaseStage {
                generator: generator.clone(),
            },
        )
        .add_node(
            "epic",
            ExpandStage {
                generator: generator.clone(),
                kind: BacklogKind::Epic,
            },
        )
        .add_node(
            "user_story",
            ExpandStage {
                generator: generator.clone(),
                kind: BacklogKind::UserStory,
            },
        )
        .add_node(
            "task",
            ExpandStage {
                generator,
                kind: BacklogKind::Task,
            },
        )
        .add_edge("use_case", "epic")
        .add_edge("epic", "user_story")
        .add_edge("user_story", "task")
        .add_edge("task", END)
        .set_entry_point("use_case")
        .compile(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrumflow_agent::builtin::COLLECT_MORE_DATA;
    use scrumflow_agent::{MockReasoningService, MockReply};
    use scrumflow_core::ToolCall;
    use scrumflow_orchestrator::{MemoryCheckpointStore, RunConfig};
    use serde_json::json;

    fn settings(max_children: usize) -> BacklogConfig {
        BacklogConfig {
            max_children,
            concurrency: 2,
        }
    }

    /// Each branch answers with children named after the parent it was given
    fn branching_mock(children: usize) -> MockReasoningService {
        let reply = move |field: &'static str| {
            move |request: &scrumflow_agent::ReasoningRequest| {
                let parent = request
                    .last_human()
                    .and_then(|h| h.lines().last())
                    .unwrap_or_default()
                    .to_string();
                let items: Vec<Value> = (1..=children)
                    .map(|i| json!({ "title": format!("{} / {}", parent, i), "estimated_effort": 3 }))
                    .collect();
                MockReply::structured(json!({ field: items }))
            }
        };
        MockReasoningService::new()
            .with_structured(
                USE_CASE_GENERATOR,
                json!({ "use_cases": [{"title": "Checkout"}, {"title": "Catalog"}] }),
            )
            .with_handler(EPIC_GENERATOR, reply("epics"))
            .with_handler(USER_STORY_GENERATOR, reply("user_stories"))
            .with_handler(TASK_GENERATOR, reply("tasks"))
    }

    #[tokio::test]
    async fn test_generate_full_hierarchy() {
        let generator = BacklogGenerator::new(Arc::new(branching_mock(2)), settings(2));
        let backlog = generator
            .generate("Build a shop", &ToolContext::new("t"))
            .await
            .unwrap();

        assert_eq!(backlog.use_cases.len(), 2);
        assert_eq!(backlog.epics.len(), 4);
        assert_eq!(backlog.user_stories.len(), 8);
        assert_eq!(backlog.tasks.len(), 16);

        // Children stay grouped under their parents in parent order
        assert_eq!(backlog.epics[0].parent_id.as_deref(), Some("UC1"));
        assert_eq!(backlog.epics[2].parent_id.as_deref(), Some("UC2"));
        assert_eq!(backlog.tasks[0].id, "UC1-E1-S1-T1");
        assert_eq!(backlog.tasks[15].id, "UC2-E2-S2-T2");
    }

    #[tokio::test]
    async fn test_children_are_capped_per_parent() {
        let generator = BacklogGenerator::new(Arc::new(branching_mock(5)), settings(2));
        let backlog = generator
            .generate("Build a shop", &ToolContext::new("t"))
            .await
            .unwrap();

        for epic in &backlog.epics {
            let stories = backlog
                .user_stories
                .iter()
                .filter(|s| s.parent_id.as_deref() == Some(epic.id.as_str()))
                .count();
            assert!(stories <= 2);
        }
        assert_eq!(backlog.tasks.len(), 16);
    }

    #[tokio::test]
    async fn test_missing_effort_is_estimated() {
        let mock = MockReasoningService::new().with_structured(
            USE_CASE_GENERATOR,
            json!({ "use_cases": [{"title": "Manage orders"}] }),
        );
        let generator = BacklogGenerator::new(Arc::new(mock), settings(2));
        let stage = generator
            .use_cases(&[Message::human("shop")], &ToolContext::new("t"), None)
            .await
            .unwrap();

        assert_eq!(stage.items[0].estimated_effort, estimate_effort("Manage orders"));
        assert_eq!(stage.items[0].order, 1);
        assert_eq!(stage.messages.last().unwrap().content(), "Created 1 use case.");
    }

    #[tokio::test]
    async fn test_failed_branch_is_empty() {
        let mock = MockReasoningService::new()
            .with_structured(EPIC_GENERATOR, json!({ "epics": [{"title": "Cart"}] }))
            .with_text(EPIC_GENERATOR, "I cannot produce epics for this");
        let sequential = BacklogConfig {
            max_children: 2,
            concurrency: 1,
        };
        let generator = BacklogGenerator::new(Arc::new(mock), sequential);
        let parents = vec![
            ItemDraft::new("Checkout").into_item(BacklogKind::UseCase, None, 0),
            ItemDraft::new("Catalog").into_item(BacklogKind::UseCase, None, 1),
        ];

        let epics = generator
            .expand(BacklogKind::Epic, &parents, "shop", &ToolContext::new("t"))
            .await
            .unwrap();
        assert_eq!(epics.len(), 1);
        assert_eq!(epics[0].parent_id.as_deref(), Some("UC1"));
    }

    #[tokio::test]
    async fn test_service_error_fails_the_stage() {
        let mock = MockReasoningService::new().with_reply(EPIC_GENERATOR, MockReply::fail("bad request"));
        let generator = BacklogGenerator::new(Arc::new(mock), settings(2));
        let parents = vec![ItemDraft::new("Checkout").into_item(BacklogKind::UseCase, None, 0)];

        assert!(generator
            .expand(BacklogKind::Epic, &parents, "shop", &ToolContext::new("t"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_graph_summaries_and_question() {
        let ask = ToolCall::new(
            "q1",
            COLLECT_MORE_DATA,
            json!({ "question": "Who are the users?" }),
        );
        let mock = MockReasoningService::new()
            .with_tool_calls(USE_CASE_GENERATOR, vec![ask])
            .with_structured(
                USE_CASE_GENERATOR,
                json!({ "use_cases": [{"title": "Browse"}] }),
            )
            .with_structured(EPIC_GENERATOR, json!({ "epics": [{"title": "Search"}] }))
            .with_structured(
                USER_STORY_GENERATOR,
                json!({ "user_stories": [{"title": "Search by name"}] }),
            )
            .with_structured(
                TASK_GENERATOR,
                json!({ "tasks": [{"title": "Index products", "estimated_effort": 5}] }),
            );
        let generator = Arc::new(BacklogGenerator::new(Arc::new(mock), settings(2)));
        let graph = backlog_graph(generator, Arc::new(MemoryCheckpointStore::new())).unwrap();

        let input = BacklogState {
            requirements: "A product catalog".to_string(),
            ..Default::default()
        };
        let run = graph.start("b1", input, RunConfig::default()).await.unwrap();
        assert_eq!(run.interrupt.as_ref().unwrap().prompt(), "Who are the users?");
        assert!(run.state.messages[0].is_human());

        let run = graph
            .resume("b1", ResumeCommand::provide("Shoppers"), RunConfig::default())
            .await
            .unwrap();
        assert!(!run.is_suspended());
        assert_eq!(run.state.tasks.len(), 1);
        assert_eq!(run.state.tasks[0].estimated_effort, 5);

        let summaries: Vec<&str> = run
            .state
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::Assistant { name: Some(_), tool_calls, .. } if tool_calls.is_empty() => {
                    Some(m.content())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            summaries,
            vec![
                "Created 1 use case.",
                "Created 1 epic.",
                "Created 1 user story.",
                "Created 1 task."
            ]
        );
    }
}
