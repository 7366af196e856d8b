//! Built-in tools available to every planning agent

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{parse_args, Tool, ToolContext, ToolEffect, ToolRegistry, ToolSpec};
use scrumflow_core::{Result, ScrumError};

pub const GET_TODAY_DATE: &str = "get_today_date";
pub const ESTIMATE_EFFORT: &str = "estimate_effort";
pub const ESTIMATE_DURATION: &str = "estimate_duration";
pub const COLLECT_MORE_DATA: &str = "collect_more_data_from_user";
pub const REQUEST_WORKSPACE_SELECTION: &str = "request_workspace_selection";
pub const REQUEST_PROJECT_SELECTION: &str = "request_project_selection";

/// Story points for a title: two per word, between 1 and 13
pub fn estimate_effort(title: &str) -> u32 {
    let words = title.split_whitespace().count() as u32;
    words.saturating_mul(2).clamp(1, 13)
}

/// Working days for an effort: 0.75 day per point shared by the team, at least 1
pub fn estimate_duration(story_points: u32, team_size: u32) -> u32 {
    let days = f64::from(story_points) * 0.75 / f64::from(team_size.max(1));
    (days.ceil() as u32).max(1)
}

/// Current date, or a fixed one for reproducible runs
#[derive(Debug, Clone, Default)]
pub struct TodayTool {
    fixed: Option<NaiveDate>,
}

impl TodayTool {
    pub fn fixed(date: NaiveDate) -> Self {
        Self { fixed: Some(date) }
    }
}

#[async_trait]
impl Tool for TodayTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            GET_TODAY_DATE,
            "Get today's date in YYYY-MM-DD format.",
            ToolEffect::ReadOnly,
        )
    }

    async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> Result<String> {
        let today = self
            .fixed
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        Ok(today.format("%Y-%m-%d").to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EffortArgs {
    /// Title of the item to estimate
    title: String,
}

#[derive(Debug, Clone, Default)]
pub struct EffortTool;

#[async_trait]
impl Tool for EffortTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            ESTIMATE_EFFORT,
            "Estimate the effort of a backlog item in story points.",
            ToolEffect::ReadOnly,
        )
        .with_args::<EffortArgs>()
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<String> {
        let args: EffortArgs = parse_args(ESTIMATE_EFFORT, arguments)?;
        Ok(json!({ "story_points": estimate_effort(&args.title) }).to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DurationArgs {
    story_points: u32,
    #[serde(default = "one")]
    team_size: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default)]
pub struct DurationTool;

#[async_trait]
impl Tool for DurationTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            ESTIMATE_DURATION,
            "Estimate working days needed for a number of story points.",
            ToolEffect::ReadOnly,
        )
        .with_args::<DurationArgs>()
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<String> {
        let args: DurationArgs = parse_args(ESTIMATE_DURATION, arguments)?;
        let days = estimate_duration(args.story_points, args.team_size);
        Ok(json!({ "estimated_duration_days": days }).to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct QuestionArgs {
    /// Question to ask the user
    question: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ProjectSelectionArgs {
    workspace_id: String,
}

/// Tools answered by the human instead of executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumanInputTool {
    CollectMoreData,
    WorkspaceSelection,
    ProjectSelection,
}

fn human_input_error(tool: &str) -> ScrumError {
    ScrumError::ToolExecution {
        tool: tool.to_string(),
        message: "answered by the user, not executed".to_string(),
    }
}

impl HumanInputTool {
    fn name(&self) -> &'static str {
        match self {
            Self::CollectMoreData => COLLECT_MORE_DATA,
            Self::WorkspaceSelection => REQUEST_WORKSPACE_SELECTION,
            Self::ProjectSelection => REQUEST_PROJECT_SELECTION,
        }
    }
}

#[async_trait]
impl Tool for HumanInputTool {
    fn spec(&self) -> ToolSpec {
        match self {
            Self::CollectMoreData => ToolSpec::new(
                COLLECT_MORE_DATA,
                "Ask the user a question when the requirements are too vague to continue.",
                ToolEffect::HumanInput,
            )
            .with_args::<QuestionArgs>(),
            Self::WorkspaceSelection => ToolSpec::new(
                REQUEST_WORKSPACE_SELECTION,
                "Ask the user to pick the workspace to work in.",
                ToolEffect::HumanInput,
            ),
            Self::ProjectSelection => ToolSpec::new(
                REQUEST_PROJECT_SELECTION,
                "Ask the user to pick a project inside a workspace.",
                ToolEffect::HumanInput,
            )
            .with_args::<ProjectSelectionArgs>(),
        }
    }

    async fn call(&self, _arguments: Value, _ctx: &ToolContext) -> Result<String> {
        Err(human_input_error(self.name()))
    }

    fn question(&self, arguments: &Value) -> Option<String> {
        match self {
            Self::CollectMoreData => arguments
                .get("question")
                .and_then(|q| q.as_str())
                .map(str::to_string)
                .or_else(|| Some("Could you tell me more about the project?".to_string())),
            Self::WorkspaceSelection => Some("Please select a workspace.".to_string()),
            Self::ProjectSelection => {
                let workspace = arguments
                    .get("workspace_id")
                    .and_then(|w| w.as_str())
                    .unwrap_or("the selected workspace");
                Some(format!("Please select a project in {}.", workspace))
            }
        }
    }
}

/// Date, estimation and human-input tools
pub fn builtin_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with(TodayTool::default())
        .with(EffortTool)
        .with(DurationTool)
        .with(HumanInputTool::CollectMoreData)
        .with(HumanInputTool::WorkspaceSelection)
        .with(HumanInputTool::ProjectSelection)
}
