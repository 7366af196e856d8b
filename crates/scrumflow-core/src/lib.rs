//! # scrumflow-core
//!
//! Shared vocabulary for the scrumflow agile planning orchestrator.
//!
//! - Conversation history with tool-call pairing rules ([`Message`])
//! - Suspension notices and human answers ([`Interrupt`], [`ResumeCommand`])
//! - Canonical planning entities ([`BacklogItem`], [`Sprint`], [`ProjectStatusReport`])
//! - Error taxonomy ([`ScrumError`]) and configuration ([`ScrumConfig`])

pub mod config;
mod error;
pub mod fail_open;
mod interrupt;
mod message;
mod types;

pub use config::{ScrumConfig, SprintMode};
pub use error::{ErrorKind, Result, ScrumError};
pub use interrupt::{Interrupt, InterruptKind, ResumeCommand};
pub use message::{
    dangling_tool_calls, validate_history, Message, ToolCall, ERROR_MARKER,
    NEEDS_USER_INPUT_MARKER,
};
pub use types::*;
