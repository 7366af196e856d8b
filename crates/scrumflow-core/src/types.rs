//! Canonical planning entities
//!
//! Every entity has one representation shared by generation, sprint planning
//! and reporting. Drafts produced by agents are normalized into these types
//! before they enter workflow state.

use chrono::{Datelike, NaiveDate, Weekday};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;

/// Priority levels for backlog items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Ordering weight, higher is more important
    pub fn weight(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Map a numeric rank (1 = most important) onto the three levels
    pub fn from_rank(rank: i64) -> Self {
        match rank {
            i64::MIN..=2 => Self::High,
            3 => Self::Medium,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "critical" | "urgent" | "high" => Ok(Self::High),
            "medium" | "normal" => Ok(Self::Medium),
            "low" | "minor" => Ok(Self::Low),
            other => other
                .parse::<i64>()
                .map(Self::from_rank)
                .map_err(|_| format!("Invalid priority: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Rank(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Rank(rank) => Ok(Self::from_rank(rank)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Lifecycle of a backlog item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BacklogStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
    Archived,
}

impl std::fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "TODO"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::InReview => write!(f, "IN_REVIEW"),
            Self::Done => write!(f, "DONE"),
            Self::Archived => write!(f, "ARCHIVED"),
        }
    }
}

/// Level of a backlog item in the use case hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BacklogKind {
    UseCase,
    Epic,
    UserStory,
    Task,
}

impl BacklogKind {
    /// Short prefix used in hierarchical item ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::UseCase => "UC",
            Self::Epic => "E",
            Self::UserStory => "S",
            Self::Task => "T",
        }
    }

    /// The level generated below this one
    pub fn child(&self) -> Option<Self> {
        match self {
            Self::UseCase => Some(Self::Epic),
            Self::Epic => Some(Self::UserStory),
            Self::UserStory => Some(Self::Task),
            Self::Task => None,
        }
    }
}

impl std::fmt::Display for BacklogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseCase => write!(f, "use case"),
            Self::Epic => write!(f, "epic"),
            Self::UserStory => write!(f, "user story"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// A generated unit of work at any level of the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BacklogItem {
    /// Hierarchical id, e.g. `UC1-E2-S1-T1`
    pub id: String,
    pub kind: BacklogKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    /// Story points
    #[serde(default)]
    pub estimated_effort: u32,
    /// Working days
    #[serde(default)]
    pub estimated_duration: Option<u32>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Position among siblings, starting at 1
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: BacklogStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_value: Option<String>,
}

/// Item shape accepted from generation agents
///
/// Lenient on field names and priority encoding; normalized by
/// [`ItemDraft::into_item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, alias = "story_points", alias = "estimated_effort_points")]
    pub estimated_effort: u32,
    #[serde(default, alias = "estimated_duration_days")]
    pub estimated_duration: Option<u32>,
    #[serde(default, alias = "assignee")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub business_value: Option<String>,
}

impl ItemDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            estimated_effort: 0,
            estimated_duration: None,
            assigned_to: None,
            order: None,
            acceptance_criteria: Vec::new(),
            business_value: None,
        }
    }

    /// Normalize into a canonical item at `position` (0-based) under `parent`
    pub fn into_item(self, kind: BacklogKind, parent: Option<&BacklogItem>, position: usize) -> BacklogItem {
        let index = position + 1;
        let id = match parent {
            Some(p) => format!("{}-{}{}", p.id, kind.id_prefix(), index),
            None => format!("{}{}", kind.id_prefix(), index),
        };
        BacklogItem {
            id,
            kind,
            title: self.title,
            description: self.description,
            priority: self.priority,
            estimated_effort: self.estimated_effort,
            estimated_duration: self.estimated_duration,
            assigned_to: self.assigned_to,
            order: self.order.filter(|o| *o > 0).unwrap_or(index as u32),
            parent_id: parent.map(|p| p.id.clone()),
            status: BacklogStatus::Todo,
            acceptance_criteria: self.acceptance_criteria,
            business_value: self.business_value,
        }
    }
}

/// Sprint lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SprintStatus {
    #[default]
    Planned,
    Active,
    Completed,
    Aborted,
}

/// Reference from a sprint to a backlog item it commits to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SprintItemRef {
    pub backlog_id: String,
    #[serde(default)]
    pub title: String,
    /// Position inside the sprint, starting at 1
    pub order: u32,
}

/// A time-boxed iteration holding references to backlog items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sprint {
    pub name: String,
    pub sprint_number: u32,
    #[serde(default)]
    pub goal: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub status: SprintStatus,
    #[serde(default)]
    pub backlog_ids: Vec<SprintItemRef>,
    /// Story points the team can absorb
    #[serde(default)]
    pub capacity: u32,
    /// Story points committed
    #[serde(default)]
    pub committed_effort: u32,
}

/// Team and timeline inputs for sprint planning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TeamConstraints {
    pub team_size: u32,
    pub sprint_duration_weeks: u32,
    #[serde(default = "default_points_per_person_per_week")]
    pub points_per_person_per_week: u32,
    pub start_date: NaiveDate,
}

fn default_points_per_person_per_week() -> u32 {
    6
}

fn team_role_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(\d+)\s+(?:[a-z-]+\s+){0,2}?(?:devs?|developers?|engineers?|designers?|testers?|people|persons?|members?)\b",
            )
            .ok()
        })
        .as_ref()
}

fn team_size_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\bteam(?:\s+size)?\s*(?:of|:|=|is)?\s*(\d+)\b").ok())
        .as_ref()
}

fn weeks_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(\d+)[\s-]*weeks?\b").ok())
        .as_ref()
}

fn date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").ok())
        .as_ref()
}

impl TeamConstraints {
    pub fn new(team_size: u32, sprint_duration_weeks: u32, start_date: NaiveDate) -> Self {
        Self {
            team_size,
            sprint_duration_weeks,
            points_per_person_per_week: default_points_per_person_per_week(),
            start_date,
        }
    }

    /// Story points per sprint: team size x weeks x points per person-week
    pub fn capacity(&self) -> u32 {
        self.team_size
            .max(1)
            .saturating_mul(self.sprint_duration_weeks.max(1))
            .saturating_mul(self.points_per_person_per_week.max(1))
    }

    /// Override fields of `base` with whatever `text` states explicitly
    ///
    /// Recognizes head counts ("2 backend devs", "team of 3"), a sprint
    /// length ("duration 2 weeks") and an ISO start date.
    pub fn from_text(text: &str, base: TeamConstraints) -> TeamConstraints {
        let mut constraints = base;

        let role_total: u32 = team_role_pattern()
            .map(|re| {
                re.captures_iter(text)
                    .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
                    .sum()
            })
            .unwrap_or(0);
        let team_size = if role_total > 0 {
            Some(role_total)
        } else {
            team_size_pattern()
                .and_then(|re| re.captures(text))
                .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
                .filter(|n| *n > 0)
        };
        if let Some(size) = team_size {
            constraints.team_size = size;
        }

        if let Some(weeks) = weeks_pattern()
            .and_then(|re| re.captures(text))
            .and_then(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            constraints.sprint_duration_weeks = weeks;
        }

        if let Some(date) = date_pattern()
            .and_then(|re| re.captures(text))
            .and_then(|c| NaiveDate::parse_from_str(c.get(1)?.as_str(), "%Y-%m-%d").ok())
        {
            constraints.start_date = date;
        }

        constraints
    }
}

/// The Monday on or after `date`
pub fn next_monday(date: NaiveDate) -> NaiveDate {
    let offset = match date.weekday() {
        Weekday::Mon => 0,
        other => 7 - other.num_days_from_monday(),
    };
    date + chrono::Duration::days(i64::from(offset))
}

/// Overall health in a status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProjectHealth {
    #[serde(alias = "On Track", alias = "on track")]
    OnTrack,
    #[serde(alias = "At Risk", alias = "at risk")]
    AtRisk,
    #[serde(alias = "Off Track", alias = "off track")]
    OffTrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Low")]
    Low,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "High")]
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Risk {
    pub risk_description: String,
    pub severity: Severity,
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRecommendation {
    pub role: String,
    pub recommendation: String,
}

/// Structured project status produced by the project reporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectStatusReport {
    pub overall_status: ProjectHealth,
    /// 0 to 100
    pub completion_percentage_estimate: u8,
    pub summary: String,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub resource_recommendations: Vec<ResourceRecommendation>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}
