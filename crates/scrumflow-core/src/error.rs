//! Unified error types for scrumflow

use thiserror::Error;

/// Unified error type for all scrumflow operations
#[derive(Error, Debug)]
pub enum ScrumError {
    // Reasoning service errors
    #[error("Transient service error: {0}")]
    TransientService(String),

    #[error("Reasoning service unavailable after {attempts} attempts: {message}")]
    ServiceUnavailable { attempts: u32, message: String },

    #[error("Reasoning service error: {0}")]
    Service(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Agent and tool errors
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing precondition: {0}")]
    MissingPrecondition(String),

    #[error("Agent '{agent}' exceeded {max_steps} reasoning steps")]
    MaxStepsExceeded { agent: String, max_steps: usize },

    #[error("Invalid conversation history: {0}")]
    InvalidHistory(String),

    // Graph errors
    #[error("Graph configuration error: {0}")]
    GraphConfiguration(String),

    #[error("Unknown state field: {0}")]
    UnknownField(String),

    #[error("Invalid resume: {0}")]
    InvalidResume(String),

    #[error("Thread '{0}' is suspended awaiting input")]
    ThreadSuspended(String),

    #[error("Suspension for thread '{0}' has expired")]
    SuspensionExpired(String),

    #[error("Node '{node}' failed on thread '{thread_id}': {source}")]
    NodeFailed {
        thread_id: String,
        node: String,
        #[source]
        source: Box<ScrumError>,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Stable classification of a [`ScrumError`], used in run failures and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientService,
    ServiceUnavailable,
    Service,
    SchemaValidation,
    ToolExecution,
    MissingPrecondition,
    GraphConfiguration,
    MaxSteps,
    Resume,
    State,
    Io,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientService => write!(f, "transient_service"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::Service => write!(f, "service"),
            Self::SchemaValidation => write!(f, "schema_validation"),
            Self::ToolExecution => write!(f, "tool_execution"),
            Self::MissingPrecondition => write!(f, "missing_precondition"),
            Self::GraphConfiguration => write!(f, "graph_configuration"),
            Self::MaxSteps => write!(f, "max_steps"),
            Self::Resume => write!(f, "resume"),
            Self::State => write!(f, "state"),
            Self::Io => write!(f, "io"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ScrumError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientService(_) => ErrorKind::TransientService,
            Self::ServiceUnavailable { .. } | Self::CircuitOpen(_) => ErrorKind::ServiceUnavailable,
            Self::Service(_) | Self::Auth(_) => ErrorKind::Service,
            Self::SchemaValidation(_) => ErrorKind::SchemaValidation,
            Self::ToolExecution { .. } | Self::UnknownTool(_) => ErrorKind::ToolExecution,
            Self::MissingPrecondition(_) => ErrorKind::MissingPrecondition,
            Self::GraphConfiguration(_) => ErrorKind::GraphConfiguration,
            Self::MaxStepsExceeded { .. } => ErrorKind::MaxSteps,
            Self::InvalidResume(_) | Self::ThreadSuspended(_) | Self::SuspensionExpired(_) => {
                ErrorKind::Resume
            }
            Self::InvalidHistory(_) | Self::UnknownField(_) | Self::Checkpoint(_) => {
                ErrorKind::State
            }
            Self::NodeFailed { source, .. } => source.kind(),
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) | Self::Config(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }

    /// Node failures the conversation can absorb: the node stops, the problem is
    /// reported as a message, and routing continues so the supervisor can finish.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. }
                | Self::CircuitOpen(_)
                | Self::MissingPrecondition(_)
        )
    }
}

/// Result type alias using ScrumError
pub type Result<T> = std::result::Result<T, ScrumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_failure_reports_inner_kind() {
        let err = ScrumError::NodeFailed {
            thread_id: "t-1".to_string(),
            node: "SprintAgent".to_string(),
            source: Box::new(ScrumError::MaxStepsExceeded {
                agent: "sprint_planner".to_string(),
                max_steps: 5,
            }),
        };
        assert_eq!(err.kind(), ErrorKind::MaxSteps);
        let text = err.to_string();
        assert!(text.contains("SprintAgent"));
        assert!(text.contains("t-1"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ScrumError::MissingPrecondition("token".into()).is_recoverable());
        assert!(ScrumError::ServiceUnavailable {
            attempts: 4,
            message: "timeout".into()
        }
        .is_recoverable());
        assert!(!ScrumError::GraphConfiguration("x".into()).is_recoverable());
        assert!(ScrumError::TransientService("503".into()).is_transient());
        assert!(!ScrumError::Service("400".into()).is_transient());
    }
}
