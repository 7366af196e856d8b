//! Calculation tools for the sprint planning agent

use async_trait::async_trait;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::sprint::{distribute, sprint_dates, PlanItem};
use scrumflow_agent::{parse_args, Tool, ToolContext, ToolEffect, ToolRegistry, ToolSpec};
use scrumflow_core::{Result, ScrumError, TeamConstraints};

pub const CALCULATE_SPRINT_DATES: &str = "calculate_sprint_dates";
pub const ESTIMATE_TEAM_CAPACITY: &str = "estimate_team_capacity";
pub const DISTRIBUTE_BACKLOG_ITEMS: &str = "distribute_backlog_items";

#[derive(Debug, Deserialize, JsonSchema)]
struct SprintDatesArgs {
    /// First day of sprint 1, YYYY-MM-DD
    start_date: String,
    /// 1-based sprint number
    sprint_number: u32,
    sprint_duration_weeks: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SprintDatesTool;

#[async_trait]
impl Tool for SprintDatesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            CALCULATE_SPRINT_DATES,
            "Calculate the start and end date of a sprint.",
            ToolEffect::ReadOnly,
        )
        .with_args::<SprintDatesArgs>()
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<String> {
        let args: SprintDatesArgs = parse_args(CALCULATE_SPRINT_DATES, arguments)?;
        let start = NaiveDate::parse_from_str(args.start_date.trim(), "%Y-%m-%d").map_err(|e| {
            ScrumError::ToolExecution {
                tool: CALCULATE_SPRINT_DATES.to_string(),
                message: format!("invalid start_date '{}': {}", args.start_date, e),
            }
        })?;
        let (begin, end) = sprint_dates(start, args.sprint_number, args.sprint_duration_weeks);
        Ok(json!({
            "start_date": begin.format("%Y-%m-%d").to_string(),
            "end_date": end.format("%Y-%m-%d").to_string(),
        })
        .to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CapacityArgs {
    team_size: u32,
    sprint_duration_weeks: u32,
    #[serde(default = "default_points")]
    points_per_person_per_week: u32,
}

fn default_points() -> u32 {
    6
}

#[derive(Debug, Clone, Default)]
pub struct TeamCapacityTool;

#[async_trait]
impl Tool for TeamCapacityTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            ESTIMATE_TEAM_CAPACITY,
            "Estimate the story points a team can complete in one sprint.",
            ToolEffect::ReadOnly,
        )
        .with_args::<CapacityArgs>()
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<String> {
        let args: CapacityArgs = parse_args(ESTIMATE_TEAM_CAPACITY, arguments)?;
        let team = TeamConstraints {
            team_size: args.team_size,
            sprint_duration_weeks: args.sprint_duration_weeks,
            points_per_person_per_week: args.points_per_person_per_week,
            start_date: NaiveDate::default(),
        };
        Ok(json!({ "team_capacity": team.capacity() }).to_string())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DistributeArgs {
    backlog_items: Vec<PlanItem>,
    /// Story points per sprint
    team_capacity: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DistributeTool;

#[async_trait]
impl Tool for DistributeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            DISTRIBUTE_BACKLOG_ITEMS,
            "Distribute backlog items across sprints by priority without exceeding capacity.",
            ToolEffect::ReadOnly,
        )
        .with_args::<DistributeArgs>()
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<String> {
        let args: DistributeArgs = parse_args(DISTRIBUTE_BACKLOG_ITEMS, arguments)?;
        let sprints: Vec<Value> = distribute(&args.backlog_items, args.team_capacity)
            .into_iter()
            .enumerate()
            .map(|(index, items)| {
                let effort: u32 = items.iter().map(|i| i.estimated_effort).sum();
                let items: Vec<Value> = items
                    .into_iter()
                    .enumerate()
                    .map(|(position, item)| {
                        json!({
                            "backlog_id": item.id,
                            "title": item.title,
                            "order": position + 1,
                            "original_order": item.order,
                        })
                    })
                    .collect();
                json!({
                    "sprint_number": index + 1,
                    "committed_effort": effort,
                    "items": items,
                })
            })
            .collect();
        Ok(Value::Array(sprints).to_string())
    }
}

/// Sprint date, capacity and distribution tools
pub fn sprint_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with(SprintDatesTool)
        .with(TeamCapacityTool)
        .with(DistributeTool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("test")
    }

    #[tokio::test]
    async fn test_sprint_dates_tool() {
        let out = SprintDatesTool
            .call(
                json!({"start_date": "2026-03-02", "sprint_number": 2, "sprint_duration_weeks": 2}),
                &ctx(),
            )
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["start_date"], "2026-03-16");
        assert_eq!(value["end_date"], "2026-03-29");
    }

    #[tokio::test]
    async fn test_sprint_dates_rejects_bad_date() {
        let err = SprintDatesTool
            .call(
                json!({"start_date": "next monday", "sprint_number": 1, "sprint_duration_weeks": 2}),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_team_capacity_tool() {
        let out = TeamCapacityTool
            .call(json!({"team_size": 3, "sprint_duration_weeks": 2}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!({"team_capacity": 36}).to_string());
    }

    #[tokio::test]
    async fn test_distribute_tool() {
        let out = DistributeTool
            .call(
                json!({
                    "team_capacity": 10,
                    "backlog_items": [
                        {"id": "T1", "title": "API", "priority": "high", "order": 1, "estimated_effort": 8},
                        {"id": "T2", "title": "UI", "priority": "low", "order": 2, "story_points": 5},
                    ]
                }),
                &ctx(),
            )
            .await
            .unwrap();
        let sprints: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(sprints.len(), 2);
        assert_eq!(sprints[0]["items"][0]["backlog_id"], "T1");
        assert_eq!(sprints[1]["committed_effort"], 5);
    }

    #[test]
    fn test_registry_contents() {
        let tools = sprint_tools();
        assert_eq!(tools.len(), 3);
        assert_eq!(
            tools.effect_of(DISTRIBUTE_BACKLOG_ITEMS),
            Some(ToolEffect::ReadOnly)
        );
    }
}
