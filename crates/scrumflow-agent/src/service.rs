//! The external reasoning service seam
//!
//! Agents never talk HTTP directly. They build a [`ReasoningRequest`] and hand
//! it to a [`ReasoningService`], which may be the OpenAI-compatible client,
//! a retrying wrapper, or a scripted mock.

use async_trait::async_trait;
use serde_json::Value;

use crate::schema::OutputSchema;
use crate::tools::ToolSpec;
use scrumflow_core::{Message, Result, ToolCall};

/// Everything the service needs for one reasoning turn
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Name of the calling agent
    pub agent: String,
    /// Model override; the service default applies when `None`
    pub model: Option<String>,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub output_schema: Option<OutputSchema>,
}

impl ReasoningRequest {
    pub fn new(agent: impl Into<String>, system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            agent: agent.into(),
            model: None,
            system_prompt: system_prompt.into(),
            messages,
            tools: Vec::new(),
            output_schema: None,
        }
    }

    /// Text of the most recent human message
    pub fn last_human(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_human())
            .map(|m| m.content())
    }
}

/// One reasoning turn: an assistant message, optionally with tool calls,
/// and the structured payload when an output schema was requested
#[derive(Debug, Clone)]
pub struct ReasoningResponse {
    pub message: Message,
    pub structured: Option<Value>,
}

impl ReasoningResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(content),
            structured: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            message: Message::assistant(value.to_string()),
            structured: Some(value),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            message: Message::assistant("").with_tool_calls(calls),
            structured: None,
        }
    }
}

/// Black-box text generation with tool calling
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse>;
}
