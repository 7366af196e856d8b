//! Pure state machine for graph run control flow
//!
//! No async and no I/O: `transition(state, event) -> (state, actions)` is
//! deterministic. The engine feeds it events as nodes complete, suspend or
//! fail, and carries out the returned actions. Invalid transitions land in
//! `Failed`; this module never panics.

/// Run state of one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Nothing scheduled
    Idle,
    /// `node` is about to execute; `steps` nodes have executed so far
    Running {
        node: String,
        steps: usize,
        max_steps: usize,
    },
    /// Waiting for a human at `node`
    Suspended { node: String, steps: usize },
    /// Reached the end of the graph
    Finished { steps: usize },
    Failed { error: String, cause: FailureCause },
}

/// Why a run ended in [`RunState::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    StepLimit,
    /// A node returned an error the run cannot absorb
    NodeError,
    /// An event arrived that the current state cannot handle
    InvalidTransition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Begin at `entry`
    Start { entry: String, max_steps: usize },
    /// The current node finished and routing picked `next` (None means the end)
    NodeCompleted { next: Option<String> },
    /// The current node stopped at an interruption point
    Interrupted,
    /// A human answered a suspended thread
    Resumed { max_steps: usize },
    /// The current node failed
    Error { message: String },
}

/// Side effects for the engine to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Execute a node
    RunNode { node: String },
    /// Persist a snapshot with `node` pending
    SaveCheckpoint { next: Option<String> },
    /// Persist a snapshot suspended at `node`
    SaveSuspension { node: String },
    LogActivity { message: String },
}

pub fn transition(state: RunState, event: RunEvent) -> (RunState, Vec<RunAction>) {
    match (state, event) {
        (RunState::Idle, RunEvent::Start { entry, max_steps }) => {
            let actions = vec![
                RunAction::LogActivity {
                    message: format!("Starting at '{}'", entry),
                },
                RunAction::RunNode { node: entry.clone() },
            ];
            (
                RunState::Running {
                    node: entry,
                    steps: 0,
                    max_steps,
                },
                actions,
            )
        }

        (
            RunState::Running {
                node,
                steps,
                max_steps,
            },
            RunEvent::NodeCompleted { next },
        ) => {
            let steps = steps + 1;
            match next {
                None => (
                    RunState::Finished { steps },
                    vec![
                        RunAction::SaveCheckpoint { next: None },
                        RunAction::LogActivity {
                            message: format!("'{}' finished the run after {} steps", node, steps),
                        },
                    ],
                ),
                Some(next) if steps >= max_steps => (
                    RunState::Failed {
                        error: format!(
                            "step limit of {} reached before '{}' could run",
                            max_steps, next
                        ),
                        cause: FailureCause::StepLimit,
                    },
                    vec![RunAction::SaveCheckpoint { next: Some(next) }],
                ),
                Some(next) => (
                    RunState::Running {
                        node: next.clone(),
                        steps,
                        max_steps,
                    },
                    vec![
                        RunAction::SaveCheckpoint {
                            next: Some(next.clone()),
                        },
                        RunAction::RunNode { node: next },
                    ],
                ),
            }
        }

        (RunState::Running { node, steps, .. }, RunEvent::Interrupted) => {
            let actions = vec![
                RunAction::SaveSuspension { node: node.clone() },
                RunAction::LogActivity {
                    message: format!("Suspended at '{}'", node),
                },
            ];
            (
                RunState::Suspended {
                    node,
                    steps: steps + 1,
                },
                actions,
            )
        }

        // A resumed run gets a fresh step allowance
        (RunState::Suspended { node, .. }, RunEvent::Resumed { max_steps }) => {
            let actions = vec![
                RunAction::LogActivity {
                    message: format!("Resuming at '{}'", node),
                },
                RunAction::RunNode { node: node.clone() },
            ];
            (
                RunState::Running {
                    node,
                    steps: 0,
                    max_steps,
                },
                actions,
            )
        }

        (RunState::Idle, RunEvent::Error { message })
        | (RunState::Running { .. }, RunEvent::Error { message })
        | (RunState::Suspended { .. }, RunEvent::Error { message }) => {
            let actions = vec![RunAction::LogActivity {
                message: format!("Error: {}", message),
            }];
            (
                RunState::Failed {
                    error: message,
                    cause: FailureCause::NodeError,
                },
                actions,
            )
        }

        (RunState::Finished { steps }, event) => (
            RunState::Failed {
                error: format!(
                    "Invalid transition from Finished state (steps: {}) on event: {:?}",
                    steps, event
                ),
                cause: FailureCause::InvalidTransition,
            },
            vec![],
        ),

        (RunState::Failed { error, .. }, event) => (
            RunState::Failed {
                error: format!(
                    "Invalid transition from Failed state (error: {}) on event: {:?}",
                    error, event
                ),
                cause: FailureCause::InvalidTransition,
            },
            vec![],
        ),

        (state, event) => (
            RunState::Failed {
                error: format!(
                    "Invalid state transition: {:?} cannot handle event {:?}",
                    state, event
                ),
                cause: FailureCause::InvalidTransition,
            },
            vec![],
        ),
    }
}
