//! Sprint planning
//!
//! The heuristic planner packs tasks greedily: most important first, each
//! sprint filled until the next task would exceed the team's capacity. A task
//! larger than the capacity gets a sprint of its own. The agent planner lets
//! a reasoning service build the plan with the same calculations as tools.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::prompts;
use crate::tools::sprint_tools;
use scrumflow_agent::builtin::{COLLECT_MORE_DATA, GET_TODAY_DATE};
use scrumflow_agent::{
    builtin_tools, connect_remote_tools, Agent, InterruptPolicy, OutputSchema, ReasoningService,
};
use scrumflow_core::config::RemoteToolsConfig;
use scrumflow_core::{
    BacklogItem, BacklogStatus, Message, Priority, Result, ScrumError, Sprint, SprintItemRef,
    SprintStatus, TeamConstraints,
};
use scrumflow_orchestrator::{
    CheckpointStore, CompiledGraph, GraphBuilder, MergePolicy, Node, NodeContext, NodeOutcome,
    StateUpdate, WorkflowState, END,
};

pub const SPRINT_PLANNER: &str = "sprint_planner";

/// Goal text lists at most this many task titles
const GOAL_TITLES: usize = 3;

/// The fields of a backlog item that scheduling looks at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanItem {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub order: u32,
    #[serde(default, alias = "story_points")]
    pub estimated_effort: u32,
}

impl From<&BacklogItem> for PlanItem {
    fn from(item: &BacklogItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            priority: item.priority,
            order: item.order,
            estimated_effort: item.estimated_effort,
        }
    }
}

/// Pack items into consecutive sprints of at most `capacity` points
///
/// Items are taken by priority, then original order, then effort, all
/// descending. Only a single item larger than `capacity` may exceed it.
pub fn distribute(items: &[PlanItem], capacity: u32) -> Vec<Vec<PlanItem>> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        b.priority
            .weight()
            .cmp(&a.priority.weight())
            .then(b.order.cmp(&a.order))
            .then(b.estimated_effort.cmp(&a.estimated_effort))
    });

    let mut sprints = Vec::new();
    let mut current: Vec<PlanItem> = Vec::new();
    let mut load = 0u32;
    for item in sorted {
        if !current.is_empty() && load.saturating_add(item.estimated_effort) > capacity {
            sprints.push(std::mem::take(&mut current));
            load = 0;
        }
        load = load.saturating_add(item.estimated_effort);
        current.push(item);
    }
    if !current.is_empty() {
        sprints.push(current);
    }
    sprints
}

/// Start and end of sprint `number` (1-based); sprints are back to back
pub fn sprint_dates(start: NaiveDate, number: u32, weeks: u32) -> (NaiveDate, NaiveDate) {
    let length = Duration::weeks(i64::from(weeks.max(1)));
    let begin = start + length * (number.max(1) as i32 - 1);
    (begin, begin + length - Duration::days(1))
}

/// Deterministic greedy sprint planner
#[derive(Debug, Clone)]
pub struct SprintPlanner {
    team: TeamConstraints,
}

impl SprintPlanner {
    pub fn new(team: TeamConstraints) -> Self {
        Self { team }
    }

    pub fn team(&self) -> &TeamConstraints {
        &self.team
    }

    pub fn capacity(&self) -> u32 {
        self.team.capacity()
    }

    /// Schedule every open task; finished and archived ones are skipped
    pub fn plan(&self, tasks: &[BacklogItem]) -> Vec<Sprint> {
        let capacity = self.capacity();
        let open: Vec<PlanItem> = tasks
            .iter()
            .filter(|t| !matches!(t.status, BacklogStatus::Done | BacklogStatus::Archived))
            .map(PlanItem::from)
            .collect();

        let sprints: Vec<Sprint> = distribute(&open, capacity)
            .into_iter()
            .enumerate()
            .map(|(index, items)| self.sprint(index as u32 + 1, items, capacity))
            .collect();
        info!(
            "Planned {} sprints for {} tasks at {} points per sprint",
            sprints.len(),
            open.len(),
            capacity
        );
        sprints
    }

    fn sprint(&self, number: u32, items: Vec<PlanItem>, capacity: u32) -> Sprint {
        let (start_date, end_date) =
            sprint_dates(self.team.start_date, number, self.team.sprint_duration_weeks);
        let committed_effort = items.iter().map(|i| i.estimated_effort).sum();
        let goal = sprint_goal(&items);
        Sprint {
            name: format!("Sprint {}", number),
            sprint_number: number,
            goal,
            start_date,
            end_date,
            status: SprintStatus::Planned,
            backlog_ids: items
                .into_iter()
                .enumerate()
                .map(|(position, item)| SprintItemRef {
                    backlog_id: item.id,
                    title: item.title,
                    order: position as u32 + 1,
                })
                .collect(),
            capacity,
            committed_effort,
        }
    }
}

fn sprint_goal(items: &[PlanItem]) -> String {
    let mut titles: Vec<&str> = items
        .iter()
        .take(GOAL_TITLES)
        .map(|i| i.title.as_str())
        .collect();
    if items.len() > GOAL_TITLES {
        titles.push("and more");
    }
    format!("Deliver {}", titles.join(", "))
}

/// Sprint plan returned by the planning agent
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SprintPlan {
    pub sprints: Vec<Sprint>,
}

/// State of the sprint team's graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SprintState {
    pub messages: Vec<Message>,
    pub tasks: Vec<BacklogItem>,
    pub team: Option<TeamConstraints>,
    pub sprints: Vec<Sprint>,
}

impl WorkflowState for SprintState {
    fn fields() -> &'static [(&'static str, MergePolicy)] {
        &[
            ("messages", MergePolicy::AccumulateMessages),
            ("tasks", MergePolicy::Replace),
            ("team", MergePolicy::Replace),
            ("sprints", MergePolicy::Replace),
        ]
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }
}

fn no_tasks() -> ScrumError {
    ScrumError::MissingPrecondition(
        "there are no tasks to schedule yet; generate a backlog first".to_string(),
    )
}

fn no_team() -> ScrumError {
    ScrumError::MissingPrecondition(
        "the team size and sprint length are unknown; describe the team".to_string(),
    )
}

/// Heuristic planning node
struct HeuristicStage;

#[async_trait]
impl Node<SprintState> for HeuristicStage {
    async fn run(&self, state: &SprintState, _ctx: &NodeContext) -> Result<NodeOutcome> {
        if state.tasks.is_empty() {
            return Err(no_tasks());
        }
        let team = state.team.clone().ok_or_else(no_team)?;
        let planner = SprintPlanner::new(team);
        let sprints = planner.plan(&state.tasks);
        let planned: usize = sprints.iter().map(|s| s.backlog_ids.len()).sum();

        let summary = Message::assistant_named(
            SPRINT_PLANNER,
            format!(
                "Planned {} sprint(s) of {} week(s) for {} task(s), {} story points per sprint.",
                sprints.len(),
                planner.team().sprint_duration_weeks,
                planned,
                planner.capacity()
            ),
        );
        Ok(NodeOutcome::Update(
            StateUpdate::new()
                .with("sprints", sprints)?
                .with_message(summary)?,
        ))
    }
}

/// Planning agent node
///
/// The tasks and team are placed in the system prompt so the conversation
/// only carries what the user said.
struct AgentStage {
    agent: Agent,
    remote_tools: RemoteToolsConfig,
}

impl AgentStage {
    fn briefing(state: &SprintState, team: &TeamConstraints) -> Result<String> {
        let items: Vec<PlanItem> = state.tasks.iter().map(PlanItem::from).collect();
        Ok(format!(
            "{}\n\nTeam: {} people, {}-week sprints, {} points per person per week, \
             first sprint starts {}.\n\nTasks:\n{}",
            prompts::SPRINT_PLANNER,
            team.team_size,
            team.sprint_duration_weeks,
            team.points_per_person_per_week,
            team.start_date.format("%Y-%m-%d"),
            serde_json::to_string_pretty(&items)?
        ))
    }
}

#[async_trait]
impl Node<SprintState> for AgentStage {
    async fn run(&self, state: &SprintState, ctx: &NodeContext) -> Result<NodeOutcome> {
        if state.tasks.is_empty() {
            return Err(no_tasks());
        }
        let team = state.team.clone().ok_or_else(no_team)?;

        let remote = connect_remote_tools(&self.remote_tools, ctx.config.credential.as_deref()).await?;
        let agent = self
            .agent
            .clone()
            .with_system_prompt(Self::briefing(state, &team)?)
            .with_extra_tools(&remote);

        let tool_ctx = ctx.tool_context();
        let run = match &ctx.resume {
            Some(command) => agent.resume(&state.messages, &tool_ctx, command.clone()).await?,
            None => agent.run(&state.messages, &tool_ctx).await?,
        };

        let messages = StateUpdate::new().with_messages(run.messages.clone())?;
        if let Some(interrupt) = run.interrupt.clone() {
            return Ok(NodeOutcome::Interrupt {
                update: messages,
                interrupt,
            });
        }

        match run.parse::<SprintPlan>() {
            Some(plan) => {
                debug!("Planning agent produced {} sprints", plan.sprints.len());
                Ok(NodeOutcome::Update(messages.with("sprints", plan.sprints)?))
            }
            None => Ok(NodeOutcome::Update(messages)),
        }
    }
}

/// The agent used in agent planning mode
pub fn planning_agent(service: Arc<dyn ReasoningService>, max_steps: usize) -> Agent {
    let tools = builtin_tools()
        .subset(&[GET_TODAY_DATE, COLLECT_MORE_DATA])
        .merged(&sprint_tools());
    Agent::new(SPRINT_PLANNER, prompts::SPRINT_PLANNER, service)
        .with_tools(tools)
        .with_output(OutputSchema::of::<SprintPlan>("sprint_plan"))
        .with_interrupt(InterruptPolicy::Mutating)
        .with_max_steps(max_steps)
}

/// Single-node sprint graph using greedy packing
pub fn heuristic_sprint_graph(store: Arc<dyn CheckpointStore>) -> Result<CompiledGraph<SprintState>> {
    GraphBuilder::new("sprint")
        .add_node(SPRINT_PLANNER, HeuristicStage)
        .add_edge(SPRINT_PLANNER, END)
        .set_entry_point(SPRINT_PLANNER)
        .compile(store)
}

/// Single-node sprint graph driven by the planning agent
pub fn agent_sprint_graph(
    agent: Agent,
    remote_tools: RemoteToolsConfig,
    store: Arc<dyn CheckpointStore>,
) -> Result<CompiledGraph<SprintState>> {
    GraphBuilder::new("sprint")
        .add_node(
            SPRINT_PLANNER,
            AgentStage {
                agent,
                remote_tools,
            },
        )
        .add_edge(SPRINT_PLANNER, END)
        .set_entry_point(SPRINT_PLANNER)
        .compile(store)
}
