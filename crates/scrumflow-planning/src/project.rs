//! Project status reporting

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::prompts;
use scrumflow_agent::builtin::{COLLECT_MORE_DATA, ESTIMATE_DURATION, GET_TODAY_DATE};
use scrumflow_agent::{builtin_tools, Agent, OutputSchema, ReasoningService, ToolContext};
use scrumflow_core::{
    BacklogItem, Interrupt, Message, ProjectHealth, ProjectStatusReport, ResumeCommand, Result,
    ScrumError, Sprint,
};
use scrumflow_orchestrator::{
    CheckpointStore, CompiledGraph, GraphBuilder, MergePolicy, Node, NodeContext, NodeOutcome,
    StateUpdate, WorkflowState, END,
};

pub const PROJECT_MANAGER: &str = "project_manager";

/// Tasks listed in the reporter's briefing
const BRIEFING_TASK_LIMIT: usize = 50;

/// Plain-text view of the plan given to the reporter
pub fn plan_summary(tasks: &[BacklogItem], sprints: &[Sprint]) -> String {
    let mut out = String::new();
    let total: u32 = tasks.iter().map(|t| t.estimated_effort).sum();
    let _ = writeln!(out, "Tasks ({}, {} story points):", tasks.len(), total);
    for task in tasks.iter().take(BRIEFING_TASK_LIMIT) {
        let _ = writeln!(
            out,
            "- {} {} [{} pts, {} priority]",
            task.id, task.title, task.estimated_effort, task.priority
        );
    }
    if tasks.len() > BRIEFING_TASK_LIMIT {
        let _ = writeln!(out, "- ... {} more", tasks.len() - BRIEFING_TASK_LIMIT);
    }

    let _ = writeln!(out, "\nSprints ({}):", sprints.len());
    for sprint in sprints {
        let _ = writeln!(
            out,
            "- {} ({} to {}): {} items, {}/{} points. {}",
            sprint.name,
            sprint.start_date.format("%Y-%m-%d"),
            sprint.end_date.format("%Y-%m-%d"),
            sprint.backlog_ids.len(),
            sprint.committed_effort,
            sprint.capacity,
            sprint.goal
        );
    }
    out
}

fn health_label(health: ProjectHealth) -> &'static str {
    match health {
        ProjectHealth::OnTrack => "on track",
        ProjectHealth::AtRisk => "at risk",
        ProjectHealth::OffTrack => "off track",
    }
}

/// Readable rendering of a report for the conversation
pub fn render_report(report: &ProjectStatusReport) -> String {
    let mut out = format!(
        "Project is {} (about {}% complete). {}",
        health_label(report.overall_status),
        report.completion_percentage_estimate.min(100),
        report.summary
    );
    if !report.risks.is_empty() {
        out.push_str("\nRisks:");
        for risk in &report.risks {
            let _ = write!(
                out,
                "\n- {:?}: {} Mitigation: {}",
                risk.severity, risk.risk_description, risk.mitigation
            );
        }
    }
    if !report.resource_recommendations.is_empty() {
        out.push_str("\nResource recommendations:");
        for rec in &report.resource_recommendations {
            let _ = write!(out, "\n- {}: {}", rec.role, rec.recommendation);
        }
    }
    if !report.next_steps.is_empty() {
        out.push_str("\nNext steps:");
        for step in &report.next_steps {
            let _ = write!(out, "\n- {}", step);
        }
    }
    out
}

/// Outcome of a reporting run
#[derive(Debug, Clone, Default)]
pub struct ReportRun {
    pub report: Option<ProjectStatusReport>,
    pub messages: Vec<Message>,
    pub interrupt: Option<Interrupt>,
}

/// Reviews a sprint plan and writes a status report
#[derive(Clone)]
pub struct ProjectReporter {
    agent: Agent,
}

impl ProjectReporter {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        let tools = builtin_tools().subset(&[GET_TODAY_DATE, ESTIMATE_DURATION, COLLECT_MORE_DATA]);
        let agent = Agent::new(PROJECT_MANAGER, prompts::PROJECT_MANAGER, service)
            .with_tools(tools)
            .with_output(OutputSchema::of::<ProjectStatusReport>("project_status_report"));
        Self { agent }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.agent = self.agent.with_max_steps(max_steps);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.agent = self.agent.with_model(model);
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Produce a report for the plan, continuing `history`
    pub async fn report(
        &self,
        history: &[Message],
        tasks: &[BacklogItem],
        sprints: &[Sprint],
        ctx: &ToolContext,
        resume: Option<ResumeCommand>,
    ) -> Result<ReportRun> {
        if sprints.is_empty() {
            return Err(ScrumError::MissingPrecondition(
                "there is no sprint plan to report on yet; plan sprints first".to_string(),
            ));
        }

        let agent = self.agent.clone().with_system_prompt(format!(
            "{}\n\nCurrent plan:\n{}",
            prompts::PROJECT_MANAGER,
            plan_summary(tasks, sprints)
        ));
        let run = match resume {
            Some(command) => agent.resume(history, ctx, command).await?,
            None => agent.run(history, ctx).await?,
        };
        if run.is_interrupted() {
            return Ok(ReportRun {
                report: None,
                messages: run.messages,
                interrupt: run.interrupt,
            });
        }

        let mut messages = run.messages.clone();
        let report = run.parse::<ProjectStatusReport>();
        match &report {
            Some(report) => {
                info!(
                    "Project report: {} at {}%",
                    health_label(report.overall_status),
                    report.completion_percentage_estimate
                );
                messages.pop();
                messages.push(Message::assistant_named(PROJECT_MANAGER, render_report(report)));
            }
            None => warn!("Project manager returned no usable report"),
        }
        Ok(ReportRun {
            report,
            messages,
            interrupt: None,
        })
    }
}

/// State of the project team's graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    pub messages: Vec<Message>,
    pub tasks: Vec<BacklogItem>,
    pub sprints: Vec<Sprint>,
    pub project_report: Option<ProjectStatusReport>,
}

impl WorkflowState for ProjectState {
    fn fields() -> &'static [(&'static str, MergePolicy)] {
        &[
            ("messages", MergePolicy::AccumulateMessages),
            ("tasks", MergePolicy::Replace),
            ("sprints", MergePolicy::Replace),
            ("project_report", MergePolicy::Replace),
        ]
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }
}

struct ReportStage {
    reporter: Arc<ProjectReporter>,
}

#[async_trait]
impl Node<ProjectState> for ReportStage {
    async fn run(&self, state: &ProjectState, ctx: &NodeContext) -> Result<NodeOutcome> {
        let run = self
            .reporter
            .report(
                &state.messages,
                &state.tasks,
                &state.sprints,
                &ctx.tool_context(),
                ctx.resume.clone(),
            )
            .await?;

        let update = StateUpdate::new().with_messages(run.messages)?;
        match (run.interrupt, run.report) {
            (Some(interrupt), _) => Ok(NodeOutcome::Interrupt { update, interrupt }),
            (None, Some(report)) => Ok(NodeOutcome::Update(
                update.with("project_report", Some(report))?,
            )),
            (None, None) => Ok(NodeOutcome::Update(update)),
        }
    }
}

/// Single-node project reporting graph
pub fn project_graph(
    reporter: Arc<ProjectReporter>,
    store: Arc<dyn CheckpointStore>,
) -> Result<CompiledGraph<ProjectState>> {
    GraphBuilder::new("project")
        .add_node(PROJECT_MANAGER, ReportStage { reporter })
        .add_edge(PROJECT_MANAGER, END)
        .set_entry_point(PROJECT_MANAGER)
        .compile(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use scrumflow_agent::MockReasoningService;
    use scrumflow_core::{BacklogKind, ItemDraft, SprintStatus};
    use scrumflow_orchestrator::{MemoryCheckpointStore, RunConfig};
    use serde_json::json;

    fn sprint() -> Sprint {
        Sprint {
            name: "Sprint 1".to_string(),
            sprint_number: 1,
            goal: "Deliver API".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 18).unwrap(),
            status: SprintStatus::Planned,
            backlog_ids: Vec::new(),
            capacity: 24,
            committed_effort: 5,
        }
    }

    fn report_json() -> serde_json::Value {
        json!({
            "overall_status": "At Risk",
            "completion_percentage_estimate": 10,
            "summary": "One sprint is planned.",
            "risks": [{"risk_description": "Single backend dev", "severity": "High", "mitigation": "Pair on reviews"}],
            "resource_recommendations": [{"role": "Backend Developer", "recommendation": "Add a second backend dev"}],
            "next_steps": ["Start sprint 1"]
        })
    }

    #[test]
    fn test_summary_is_capped() {
        let tasks: Vec<BacklogItem> = (0..60)
            .map(|i| ItemDraft::new(format!("task {}", i)).into_item(BacklogKind::Task, None, i))
            .collect();
        let summary = plan_summary(&tasks, &[sprint()]);
        assert!(summary.contains("T50 task 49"));
        assert!(!summary.contains("T51 task 50"));
        assert!(summary.contains("10 more"));
        assert!(summary.contains("Sprint 1 (2026-01-05 to 2026-01-18)"));
    }

    #[tokio::test]
    async fn test_report_requires_sprints() {
        let reporter = ProjectReporter::new(Arc::new(MockReasoningService::new()));
        let err = reporter
            .report(&[Message::human("status?")], &[], &[], &ToolContext::new("t"), None)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_graph_stores_report() {
        let mock = Arc::new(MockReasoningService::new().with_structured(PROJECT_MANAGER, report_json()));
        let reporter = Arc::new(ProjectReporter::new(mock.clone()));
        let graph = project_graph(reporter, Arc::new(MemoryCheckpointStore::new())).unwrap();

        let input = ProjectState {
            messages: vec![Message::human("How is the project looking?")],
            sprints: vec![sprint()],
            ..Default::default()
        };
        let run = graph.start("p1", input, RunConfig::default()).await.unwrap();

        let report = run.state.project_report.unwrap();
        assert_eq!(report.overall_status, ProjectHealth::AtRisk);
        let last = run.state.messages.last().unwrap();
        assert!(last.content().starts_with("Project is at risk (about 10% complete)."));
        assert!(last.content().contains("Pair on reviews"));
        assert!(last
            .content()
            .contains("Resource recommendations:\n- Backend Developer: Add a second backend dev"));

        let request = &mock.requests(PROJECT_MANAGER)[0];
        assert!(request.system_prompt.contains("Sprint 1"));
    }

    #[test]
    fn test_render_lists_every_section() {
        let report: ProjectStatusReport = serde_json::from_value(report_json()).unwrap();
        let text = render_report(&report);
        let risks = text.find("\nRisks:").unwrap();
        let resources = text.find("\nResource recommendations:").unwrap();
        let steps = text.find("\nNext steps:").unwrap();
        assert!(risks < resources && resources < steps);
        assert!(text.ends_with("- Start sprint 1"));
    }
}
