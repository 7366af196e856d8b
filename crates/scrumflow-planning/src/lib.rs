//! # scrumflow-planning
//!
//! The agile planning team built on the orchestrator:
//!
//! - [`backlog`]: use cases → epics → user stories → tasks, fanned out per parent
//! - [`sprint`]: greedy sprint packing, or a planning agent with [`tools`]
//! - [`project`]: a status report over the plan
//! - [`scrum`]: the supervisor graph tying the three members together

pub mod backlog;
pub mod project;
pub mod prompts;
pub mod scrum;
pub mod sprint;
pub mod tools;

pub use backlog::{Backlog, BacklogGenerator, BacklogState};
pub use project::{ProjectReporter, ProjectState};
pub use scrum::{build_scrum_graph, user_turn, ScrumState, ScrumTeam};
pub use sprint::{distribute, sprint_dates, PlanItem, SprintPlanner, SprintState};
pub use tools::sprint_tools;
