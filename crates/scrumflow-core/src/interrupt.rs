//! Suspension notices and resumption commands for human-in-the-loop runs

use serde::{Deserialize, Serialize};

use crate::message::ToolCall;

/// Why a run stopped to wait for a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// An agent asked the user a question
    HumanInput,
    /// A restricted tool call waits for approval
    Approval,
}

/// A pending suspension point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub kind: InterruptKind,
    /// Agent that issued the pending calls
    pub agent: String,
    /// Graph node holding the suspension; filled in by the graph engine
    #[serde(default)]
    pub node: String,
    /// Question surfaced to the human, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Calls awaiting a result
    pub tool_calls: Vec<ToolCall>,
}

impl Interrupt {
    pub fn human_input(agent: impl Into<String>, question: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            kind: InterruptKind::HumanInput,
            agent: agent.into(),
            node: String::new(),
            question,
            tool_calls,
        }
    }

    pub fn approval(agent: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            kind: InterruptKind::Approval,
            agent: agent.into(),
            node: String::new(),
            question: None,
            tool_calls,
        }
    }

    pub fn at_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Text to show the human
    pub fn prompt(&self) -> String {
        match (&self.kind, &self.question) {
            (_, Some(question)) => question.clone(),
            (InterruptKind::Approval, None) => {
                let names: Vec<&str> = self.tool_calls.iter().map(|c| c.name.as_str()).collect();
                format!("{} wants to run: {}. Approve?", self.agent, names.join(", "))
            }
            (InterruptKind::HumanInput, None) => format!("{} needs more information", self.agent),
        }
    }
}

/// The human's answer to an [`Interrupt`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResumeCommand {
    /// Supply the answer to a question
    Provide { value: String },
    /// Let the pending restricted calls run
    Approve,
    /// Refuse the pending restricted calls
    Reject { reason: String },
}

impl ResumeCommand {
    pub fn provide(value: impl Into<String>) -> Self {
        Self::Provide {
            value: value.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }
}
