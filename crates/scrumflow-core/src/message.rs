//! Conversation history
//!
//! A history is an append-only list of [`Message`]s. Every tool call issued by
//! an assistant turn must be answered by exactly one tool message before the
//! next human message. A call without an answer is "dangling" and marks the
//! owning run as suspended until the answer arrives.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::{Result, ScrumError};

/// Prefix marking a member that stopped because it needs the user
pub const NEEDS_USER_INPUT_MARKER: &str = "[NEEDS_USER_INPUT]";

/// Prefix marking a member that stopped because of a failure it could not absorb
pub const ERROR_MARKER: &str = "[ERROR]";

/// A request from the reasoning service to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    Human {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        /// Agent that produced the message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
            name: None,
        }
    }

    pub fn assistant_named(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
            name: Some(name.into()),
        }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// An assistant turn reporting a failure the member could not recover from
    pub fn failure(agent: &str, error: &ScrumError) -> Self {
        let content = match error {
            ScrumError::MissingPrecondition(what) => {
                format!("{} {} cannot continue: {}", NEEDS_USER_INPUT_MARKER, agent, what)
            }
            other => format!("{} {} could not complete: {}", ERROR_MARKER, agent, other),
        };
        Self::assistant_named(agent, content)
    }

    /// Attach tool calls to an assistant message. Other roles are returned unchanged.
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        match self {
            Self::Assistant { content, name, .. } => Self::Assistant {
                content,
                tool_calls: calls,
                name,
            },
            other => other,
        }
    }

    /// Set the producing agent of an assistant message if none is recorded
    pub fn with_default_name(self, agent: &str) -> Self {
        match self {
            Self::Assistant {
                content,
                tool_calls,
                name,
            } => Self::Assistant {
                content,
                tool_calls,
                name: name.or_else(|| Some(agent.to_string())),
            },
            other => other,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Human { content } | Self::Assistant { content, .. } | Self::Tool { content, .. } => {
                content
            }
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Human { .. } => "human",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    /// True when the message says its author is stuck and the user must act
    pub fn is_blocking(&self) -> bool {
        match self {
            Self::Assistant { content, .. } => {
                let trimmed = content.trim_start();
                trimmed.starts_with(NEEDS_USER_INPUT_MARKER) || trimmed.starts_with(ERROR_MARKER)
            }
            _ => false,
        }
    }
}

/// Tool calls that have not yet received a result, in issue order
pub fn dangling_tool_calls(history: &[Message]) -> Vec<ToolCall> {
    let mut pending: Vec<ToolCall> = Vec::new();
    for message in history {
        match message {
            Message::Assistant { tool_calls, .. } => pending.extend(tool_calls.iter().cloned()),
            Message::Tool { tool_call_id, .. } => pending.retain(|c| &c.id != tool_call_id),
            Message::Human { .. } => {}
        }
    }
    pending
}

/// Check the tool-call pairing rules of a history
///
/// Every tool message must answer a known call exactly once, and no human
/// message may arrive while calls are still open.
pub fn validate_history(history: &[Message]) -> Result<()> {
    let mut open: HashMap<&str, &str> = HashMap::new();
    let mut answered: HashSet<&str> = HashSet::new();

    for (index, message) in history.iter().enumerate() {
        match message {
            Message::Assistant { tool_calls, .. } => {
                for call in tool_calls {
                    if open.contains_key(call.id.as_str()) || answered.contains(call.id.as_str()) {
                        return Err(ScrumError::InvalidHistory(format!(
                            "duplicate tool call id '{}' at message {}",
                            call.id, index
                        )));
                    }
                    open.insert(&call.id, &call.name);
                }
            }
            Message::Tool { tool_call_id, .. } => {
                if open.remove(tool_call_id.as_str()).is_none() {
                    return Err(ScrumError::InvalidHistory(format!(
                        "tool result at message {} answers unknown or already answered call '{}'",
                        index, tool_call_id
                    )));
                }
                answered.insert(tool_call_id);
            }
            Message::Human { .. } => {
                if let Some((id, name)) = open.iter().next() {
                    return Err(ScrumError::InvalidHistory(format!(
                        "human message at {} while tool call '{}' ({}) is unanswered",
                        index, id, name
                    )));
                }
            }
        }
    }
    Ok(())
}
