//! The scrum team: a supervisor routing between backlog, sprint and project
//! members, each of which is its own checkpointed graph.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backlog::{backlog_graph, Backlog, BacklogGenerator, BacklogState};
use crate::project::{project_graph, ProjectReporter, ProjectState};
use crate::prompts;
use crate::sprint::{agent_sprint_graph, heuristic_sprint_graph, planning_agent, SprintState};
use scrumflow_agent::ReasoningService;
use scrumflow_core::{
    next_monday, BacklogItem, Message, ProjectStatusReport, Result, ScrumConfig, Sprint,
    SprintMode, TeamConstraints,
};
use scrumflow_orchestrator::{
    route_by_next, ActivityLogger, CheckpointStore, CompiledGraph, GraphBuilder, MergePolicy,
    StateUpdate, SubgraphNode, SupervisedState, SupervisorNode, TeamSupervisor, WorkflowState,
};

pub const SUPERVISOR: &str = "supervisor";
pub const BACKLOG_AGENT: &str = "BacklogAgent";
pub const SPRINT_AGENT: &str = "SprintAgent";
pub const PROJECT_AGENT: &str = "ProjectAgent";

/// State of the top-level scrum graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrumState {
    pub messages: Vec<Message>,
    pub requirements: String,
    pub team: Option<TeamConstraints>,
    pub use_cases: Vec<BacklogItem>,
    pub epics: Vec<BacklogItem>,
    pub user_stories: Vec<BacklogItem>,
    pub tasks: Vec<BacklogItem>,
    pub sprints: Vec<Sprint>,
    pub project_report: Option<ProjectStatusReport>,
    /// Last routing decision of the supervisor
    pub next: Option<String>,
}

impl WorkflowState for ScrumState {
    fn fields() -> &'static [(&'static str, MergePolicy)] {
        &[
            ("messages", MergePolicy::AccumulateMessages),
            ("requirements", MergePolicy::Replace),
            ("team", MergePolicy::Replace),
            ("use_cases", MergePolicy::Replace),
            ("epics", MergePolicy::Replace),
            ("user_stories", MergePolicy::Replace),
            ("tasks", MergePolicy::Replace),
            ("sprints", MergePolicy::Replace),
            ("project_report", MergePolicy::Replace),
            ("next", MergePolicy::Replace),
        ]
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl SupervisedState for ScrumState {
    fn next_member(&self) -> Option<&str> {
        self.next.as_deref()
    }
}

impl ScrumState {
    /// Requirements for backlog generation: the stored ones, or everything
    /// the user has said so far
    pub fn request(&self) -> String {
        if !self.requirements.is_empty() {
            return self.requirements.clone();
        }
        self.messages
            .iter()
            .filter(|m| m.is_human())
            .map(Message::content)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn backlog(&self) -> Backlog {
        Backlog {
            use_cases: self.use_cases.clone(),
            epics: self.epics.clone(),
            user_stories: self.user_stories.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

/// Input for a new user turn
pub fn user_turn(text: &str) -> Result<StateUpdate> {
    StateUpdate::new().with_message(Message::human(text))
}

/// Builds the scrum graph and its member graphs from configuration
#[derive(Clone)]
pub struct ScrumTeam {
    service: Arc<dyn ReasoningService>,
    config: ScrumConfig,
    today: Option<NaiveDate>,
    activity: Option<Arc<ActivityLogger>>,
}

impl ScrumTeam {
    pub fn new(service: Arc<dyn ReasoningService>, config: ScrumConfig) -> Self {
        Self {
            service,
            config,
            today: None,
            activity: None,
        }
    }

    /// Pin the date sprint schedules are computed from
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_activity_logger(mut self, logger: Arc<ActivityLogger>) -> Self {
        self.activity = Some(logger);
        self
    }

    pub fn config(&self) -> &ScrumConfig {
        &self.config
    }

    /// Team settings when the conversation says nothing about the team
    pub fn default_team(&self) -> TeamConstraints {
        let today = self
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        TeamConstraints {
            team_size: self.config.sprint.default_team_size,
            sprint_duration_weeks: self.config.sprint.default_sprint_weeks,
            points_per_person_per_week: self.config.sprint.points_per_person_per_week,
            start_date: next_monday(today),
        }
    }

    /// The known team (or the defaults) updated by whatever the user said
    /// about it, later messages winning
    pub fn team_for(&self, state: &ScrumState) -> TeamConstraints {
        let base = state.team.clone().unwrap_or_else(|| self.default_team());
        state
            .messages
            .iter()
            .filter(|m| m.is_human())
            .fold(base, |team, m| TeamConstraints::from_text(m.content(), team))
    }

    fn finish<S: WorkflowState>(&self, graph: CompiledGraph<S>) -> CompiledGraph<S> {
        graph
            .with_max_steps(self.config.graph.max_steps)
            .with_suspension_ttl(self.config.graph.suspension_ttl())
    }

    pub fn backlog_graph(&self, store: Arc<dyn CheckpointStore>) -> Result<CompiledGraph<BacklogState>> {
        let generator = BacklogGenerator::new(self.service.clone(), self.config.backlog.clone())
            .with_max_steps(self.config.agent.max_steps);
        Ok(self.finish(backlog_graph(Arc::new(generator), store)?))
    }

    pub fn sprint_graph(&self, store: Arc<dyn CheckpointStore>) -> Result<CompiledGraph<SprintState>> {
        let graph = match self.config.sprint.mode {
            SprintMode::Heuristic => heuristic_sprint_graph(store)?,
            SprintMode::Agent => agent_sprint_graph(
                planning_agent(self.service.clone(), self.config.agent.max_steps),
                self.config.remote_tools.clone(),
                store,
            )?,
        };
        Ok(self.finish(graph))
    }

    pub fn project_graph(&self, store: Arc<dyn CheckpointStore>) -> Result<CompiledGraph<ProjectState>> {
        let reporter =
            ProjectReporter::new(self.service.clone()).with_max_steps(self.config.agent.max_steps);
        Ok(self.finish(project_graph(Arc::new(reporter), store)?))
    }

    /// supervisor → member → supervisor … until the supervisor answers FINISH
    pub fn build(&self, store: Arc<dyn CheckpointStore>) -> Result<CompiledGraph<ScrumState>> {
        let supervisor = TeamSupervisor::new(
            vec![
                BACKLOG_AGENT.to_string(),
                SPRINT_AGENT.to_string(),
                PROJECT_AGENT.to_string(),
            ],
            self.service.clone(),
        )
        .with_prompt(prompts::SCRUM_SUPERVISOR)
        .with_model(Some(self.config.supervisor_model().to_string()));
        let supervisor = SupervisorNode::new(supervisor);
        let paths = supervisor.paths();

        let backlog = SubgraphNode::new(
            Arc::new(self.backlog_graph(store.clone())?),
            |s: &ScrumState| {
                Ok(BacklogState {
                    messages: s.messages.clone(),
                    requirements: s.request(),
                    ..Default::default()
                })
            },
            |c: &BacklogState, _p: &ScrumState| {
                let update = StateUpdate::new().with("requirements", &c.requirements)?;
                if c.use_cases.is_empty() {
                    return Ok(update);
                }
                update
                    .with("use_cases", &c.use_cases)?
                    .with("epics", &c.epics)?
                    .with("user_stories", &c.user_stories)?
                    .with("tasks", &c.tasks)
            },
        );

        let team = self.clone();
        let sprint = SubgraphNode::new(
            Arc::new(self.sprint_graph(store.clone())?),
            move |s: &ScrumState| {
                Ok(SprintState {
                    messages: s.messages.clone(),
                    tasks: s.tasks.clone(),
                    team: Some(team.team_for(s)),
                    sprints: s.sprints.clone(),
                })
            },
            |c: &SprintState, _p: &ScrumState| {
                let update = StateUpdate::new().with("team", &c.team)?;
                if c.sprints.is_empty() {
                    return Ok(update);
                }
                update.with("sprints", &c.sprints)
            },
        );

        let project = SubgraphNode::new(
            Arc::new(self.project_graph(store.clone())?),
            |s: &ScrumState| {
                Ok(ProjectState {
                    messages: s.messages.clone(),
                    tasks: s.tasks.clone(),
                    sprints: s.sprints.clone(),
                    project_report: s.project_report.clone(),
                })
            },
            |c: &ProjectState, _p: &ScrumState| match &c.project_report {
                Some(report) => StateUpdate::new().with("project_report", Some(report)),
                None => Ok(StateUpdate::new()),
            },
        );

        let mut graph = GraphBuilder::new("scrum")
            .add_node(SUPERVISOR, supervisor)
            .add_node(BACKLOG_AGENT, backlog)
            .add_node(SPRINT_AGENT, sprint)
            .add_node(PROJECT_AGENT, project)
            .add_edge(BACKLOG_AGENT, SUPERVISOR)
            .add_edge(SPRINT_AGENT, SUPERVISOR)
            .add_edge(PROJECT_AGENT, SUPERVISOR)
            .add_conditional_edges(SUPERVISOR, route_by_next::<ScrumState>, paths)
            .set_entry_point(SUPERVISOR)
            .compile(store)?;
        graph = self.finish(graph);
        if let Some(logger) = &self.activity {
            graph = graph.with_activity_logger(logger.clone());
        }
        Ok(graph)
    }
}

/// Compile the scrum graph with default member settings from `config`
pub fn build_scrum_graph(
    service: Arc<dyn ReasoningService>,
    config: ScrumConfig,
    store: Arc<dyn CheckpointStore>,
) -> Result<CompiledGraph<ScrumState>> {
    ScrumTeam::new(service, config).build(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrumflow_agent::MockReasoningService;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn team() -> ScrumTeam {
        ScrumTeam::new(Arc::new(MockReasoningService::new()), ScrumConfig::default())
            .with_today(day("2026-10-21"))
    }

    #[test]
    fn test_team_from_conversation() {
        let state = ScrumState {
            messages: vec![
                Message::human("Build a todo app, team: 2 backend devs, duration 2 weeks"),
                Message::assistant("ok"),
                Message::human("Actually make the sprints 1 week long"),
            ],
            ..Default::default()
        };
        let constraints = team().team_for(&state);
        assert_eq!(constraints.team_size, 2);
        assert_eq!(constraints.sprint_duration_weeks, 1);
        assert_eq!(constraints.start_date, day("2026-10-26"));
    }

    #[test]
    fn test_known_team_is_kept() {
        let known = TeamConstraints::new(5, 3, day("2026-11-02"));
        let state = ScrumState {
            messages: vec![Message::human("Plan the sprints please")],
            team: Some(known.clone()),
            ..Default::default()
        };
        assert_eq!(team().team_for(&state), known);
    }

    #[test]
    fn test_request_defaults_to_human_messages() {
        let state = ScrumState {
            messages: vec![Message::human("a"), Message::assistant("b"), Message::human("c")],
            ..Default::default()
        };
        assert_eq!(state.request(), "a\nc");
    }

    #[test]
    fn test_graph_compiles() {
        let store: Arc<dyn CheckpointStore> = Arc::new(scrumflow_orchestrator::MemoryCheckpointStore::new());
        let graph = team().build(store).unwrap();
        assert_eq!(graph.name(), "scrum");
    }
}
