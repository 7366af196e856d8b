//! # scrumflow-agent
//!
//! Everything an agent needs to think and act:
//!
//! - [`ReasoningService`]: the black-box text generation seam, with an
//!   OpenAI-compatible HTTP client ([`OpenAiClient`]), a retry/timeout wrapper
//!   ([`RetryingService`]) and a scripted mock ([`MockReasoningService`])
//! - [`ToolRegistry`]: built-in estimators and human-input tools plus tools
//!   discovered on a remote JSON-RPC server
//! - [`Agent`]: the bounded reasoning + tool loop with interrupt/resume

mod agent;
pub mod auth;
pub mod builtin;
mod circuit_breaker;
mod client;
pub mod mock;
pub mod remote;
mod retry;
mod schema;
mod service;
mod tools;
pub mod types;

pub use agent::{Agent, AgentRun, InterruptPolicy};
pub use builtin::builtin_tools;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::OpenAiClient;
pub use mock::{MockReasoningService, MockReply};
pub use remote::{connect_remote_tools, RemoteToolProvider};
pub use retry::{RetryPolicy, RetryingService};
pub use schema::{parse_json_text, OutputSchema};
pub use service::{ReasoningRequest, ReasoningResponse, ReasoningService};
pub use tools::{parse_args, Tool, ToolContext, ToolEffect, ToolRegistry, ToolSpec};
