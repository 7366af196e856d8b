//! Tool registry
//!
//! Tools are named async callables with a JSON-schema input description and
//! an effect class. The effect class drives two things: which calls an agent
//! must pause on before running, and the order calls execute within a turn
//! (reads and creates before updates, saves and deletes).

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use scrumflow_core::{Message, Result, ScrumError, ToolCall};

/// What a tool does to the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    /// Lookups and pure computations
    ReadOnly,
    /// Creates new remote records
    Create,
    /// Updates, saves or deletes remote records
    Write,
    /// Needs an answer from the human; never executed by the agent
    HumanInput,
}

impl ToolEffect {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Create | Self::Write)
    }

    /// Execution phase within one turn
    fn phase(&self) -> u8 {
        match self {
            Self::ReadOnly | Self::Create => 0,
            Self::Write => 1,
            Self::HumanInput => 2,
        }
    }

    /// Classify a tool by its name verb. Unknown verbs count as writes.
    pub fn classify(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let verb = lowered.split(['_', '-', '.']).next().unwrap_or("");
        match verb {
            "get" | "list" | "read" | "search" | "fetch" | "find" | "query" | "describe"
            | "estimate" | "calculate" => Self::ReadOnly,
            "create" | "add" | "generate" | "new" => Self::Create,
            _ => Self::Write,
        }
    }
}

/// Tool declaration offered to the reasoning service
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
    #[serde(skip)]
    pub effect: ToolEffect,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, effect: ToolEffect) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({ "type": "object", "properties": {} }),
            effect,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Use the JSON schema of `T` as the argument schema
    pub fn with_args<T: JsonSchema>(self) -> Self {
        let parameters = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| json!({ "type": "object" }));
        self.with_parameters(parameters)
    }
}

/// Per-invocation context handed to tools
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub thread_id: String,
    /// Caller-supplied credential for remote resources
    pub credential: Option<String>,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

/// A callable the reasoning service may request
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<String>;

    /// Question to surface when this is a human-input tool
    fn question(&self, _arguments: &Value) -> Option<String> {
        None
    }
}

/// Deserialize tool arguments, reporting failures against the tool name
pub fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => json!({}),
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| ScrumError::ToolExecution {
        tool: tool.to_string(),
        message: format!("invalid arguments: {}", e),
    })
}

struct Entry {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

/// Named tools in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<Arc<Entry>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let spec = tool.spec();
        let entry = Arc::new(Entry { spec, tool });
        match self.index.get(&entry.spec.name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.spec.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        self
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Add every tool of `other`
    pub fn extend(&mut self, other: &ToolRegistry) {
        for entry in &other.entries {
            self.register(entry.tool.clone());
        }
    }

    pub fn merged(mut self, other: &ToolRegistry) -> Self {
        self.extend(other);
        self
    }

    /// Registry restricted to the named tools; unknown names are ignored
    pub fn subset(&self, names: &[&str]) -> Self {
        let mut subset = Self::new();
        for name in names {
            if let Some(entry) = self.entry(name) {
                subset.register(entry.tool.clone());
            }
        }
        subset
    }

    fn entry(&self, name: &str) -> Option<&Arc<Entry>> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entry(name).map(|e| e.tool.clone())
    }

    pub fn effect_of(&self, name: &str) -> Option<ToolEffect> {
        self.entry(name).map(|e| e.spec.effect)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.spec.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run one call. Failures become the tool message text so the agent can react.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Message {
        let content = match self.entry(&call.name) {
            None => {
                warn!("Agent requested unknown tool '{}'", call.name);
                format!("Error: {}", ScrumError::UnknownTool(call.name.clone()))
            }
            Some(entry) => {
                debug!("Executing tool '{}' ({:?})", call.name, entry.spec.effect);
                match entry.tool.call(call.arguments.clone(), ctx).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("Tool '{}' failed: {}", call.name, e);
                        format!("Error: {}", e)
                    }
                }
            }
        };
        Message::tool(&call.id, &call.name, content)
    }

    /// Run the calls of one turn, reads and creates before writes
    ///
    /// Each call runs once. Results come back in the order the calls were issued.
    pub async fn execute_calls(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Message> {
        let mut schedule: Vec<usize> = (0..calls.len()).collect();
        schedule.sort_by_key(|&i| {
            self.effect_of(&calls[i].name)
                .unwrap_or(ToolEffect::ReadOnly)
                .phase()
        });

        let mut results: Vec<Option<Message>> = vec![None; calls.len()];
        for i in schedule {
            results[i] = Some(self.execute(&calls[i], ctx).await);
        }
        results.into_iter().flatten().collect()
    }
}
