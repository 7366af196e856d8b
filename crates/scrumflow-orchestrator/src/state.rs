//! Workflow state and merge policies
//!
//! Each graph owns one state record. Nodes never mutate it directly: they
//! return a [`StateUpdate`] naming fields and values, and the engine merges
//! the update using the field's declared [`MergePolicy`]. Updates naming a
//! field the record does not declare are rejected.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

use scrumflow_core::{Message, Result, ScrumError};

/// How an update value combines with the current field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// The update value wins
    Replace,
    /// Array values are concatenated
    Append,
    /// Messages are appended, skipping tool results already recorded
    AccumulateMessages,
}

/// A state record with a declared field → merge policy table
pub trait WorkflowState:
    Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Every serialized field with its merge policy
    fn fields() -> &'static [(&'static str, MergePolicy)];

    /// Conversation history carried by this state
    fn messages(&self) -> &[Message];

    fn policy(field: &str) -> Option<MergePolicy> {
        Self::fields()
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, policy)| *policy)
    }
}

/// Partial state produced by a node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    values: Map<String, Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to the serialized `value`
    pub fn with<T: Serialize>(mut self, field: &str, value: T) -> Result<Self> {
        self.values
            .insert(field.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Append `messages` to the conversation
    pub fn with_messages(self, messages: Vec<Message>) -> Result<Self> {
        self.with("messages", messages)
    }

    pub fn with_message(self, message: Message) -> Result<Self> {
        self.with_messages(vec![message])
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Combine two updates; later values for the same field are merged by
    /// extending arrays, otherwise replaced
    pub fn merge(mut self, other: StateUpdate) -> Self {
        for (field, value) in other.values {
            match (self.values.get_mut(&field), value) {
                (Some(Value::Array(existing)), Value::Array(more)) => existing.extend(more),
                (_, value) => {
                    self.values.insert(field, value);
                }
            }
        }
        self
    }
}

/// Check that a state type's field table matches its serialized shape
pub fn validate_schema<S: WorkflowState>() -> Result<()> {
    let value = serde_json::to_value(S::default())?;
    let object = value.as_object().ok_or_else(|| {
        ScrumError::GraphConfiguration("workflow state must serialize to an object".to_string())
    })?;

    let mut declared = HashSet::new();
    for (field, policy) in S::fields() {
        if !declared.insert(*field) {
            return Err(ScrumError::GraphConfiguration(format!(
                "state field '{}' is declared twice",
                field
            )));
        }
        let current = object.get(*field).ok_or_else(|| {
            ScrumError::GraphConfiguration(format!(
                "declared state field '{}' is not part of the state record",
                field
            ))
        })?;
        if matches!(policy, MergePolicy::Append | MergePolicy::AccumulateMessages)
            && !current.is_array()
        {
            return Err(ScrumError::GraphConfiguration(format!(
                "state field '{}' uses {:?} but is not a list",
                field, policy
            )));
        }
    }

    if let Some(undeclared) = object.keys().find(|k| !declared.contains(k.as_str())) {
        return Err(ScrumError::GraphConfiguration(format!(
            "state field '{}' has no merge policy",
            undeclared
        )));
    }
    Ok(())
}

/// Merge `update` into `state` following each field's policy
pub fn apply_update<S: WorkflowState>(state: &S, update: &StateUpdate) -> Result<S> {
    let mut current = match serde_json::to_value(state)? {
        Value::Object(map) => map,
        _ => {
            return Err(ScrumError::GraphConfiguration(
                "workflow state must serialize to an object".to_string(),
            ))
        }
    };

    for (field, incoming) in &update.values {
        let policy =
            S::policy(field).ok_or_else(|| ScrumError::UnknownField(field.clone()))?;
        let merged = match policy {
            MergePolicy::Replace => incoming.clone(),
            MergePolicy::Append => {
                let mut items = take_array(&mut current, field);
                items.extend(as_items(incoming));
                Value::Array(items)
            }
            MergePolicy::AccumulateMessages => {
                let mut items = take_array(&mut current, field);
                accumulate_messages(&mut items, as_items(incoming));
                Value::Array(items)
            }
        };
        current.insert(field.clone(), merged);
    }

    Ok(serde_json::from_value(Value::Object(current))?)
}

fn take_array(map: &mut Map<String, Value>, field: &str) -> Vec<Value> {
    match map.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn as_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn accumulate_messages(existing: &mut Vec<Value>, incoming: Vec<Value>) {
    let mut answered: HashSet<String> = existing
        .iter()
        .filter_map(tool_result_id)
        .collect();
    for message in incoming {
        if let Some(id) = tool_result_id(&message) {
            if !answered.insert(id) {
                continue;
            }
        }
        existing.push(message);
    }
}

fn tool_result_id(message: &Value) -> Option<String> {
    if message.get("role").and_then(Value::as_str) == Some("tool") {
        message
            .get("tool_call_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Notes {
        messages: Vec<Message>,
        items: Vec<String>,
        title: Option<String>,
    }

    impl WorkflowState for Notes {
        fn fields() -> &'static [(&'static str, MergePolicy)] {
            &[
                ("messages", MergePolicy::AccumulateMessages),
                ("items", MergePolicy::Append),
                ("title", MergePolicy::Replace),
            ]
        }

        fn messages(&self) -> &[Message] {
            &self.messages
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Undeclared {
        messages: Vec<Message>,
        extra: u32,
    }

    impl WorkflowState for Undeclared {
        fn fields() -> &'static [(&'static str, MergePolicy)] {
            &[("messages", MergePolicy::AccumulateMessages)]
        }

        fn messages(&self) -> &[Message] {
            &self.messages
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct WrongPolicy {
        messages: Vec<Message>,
        count: u32,
    }

    impl WorkflowState for WrongPolicy {
        fn fields() -> &'static [(&'static str, MergePolicy)] {
            &[
                ("messages", MergePolicy::AccumulateMessages),
                ("count", MergePolicy::Append),
            ]
        }

        fn messages(&self) -> &[Message] {
            &self.messages
        }
    }

    #[test]
    fn test_policies_merge() {
        let state = Notes {
            items: vec!["a".into()],
            title: Some("old".into()),
            ..Default::default()
        };
        let update = StateUpdate::new()
            .with("items", vec!["b", "c"])
            .unwrap()
            .with("title", "new")
            .unwrap()
            .with_message(Message::human("hi"))
            .unwrap();

        let next = apply_update(&state, &update).unwrap();
        assert_eq!(next.items, vec!["a", "b", "c"]);
        assert_eq!(next.title.as_deref(), Some("new"));
        assert_eq!(next.messages, vec![Message::human("hi")]);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let update = StateUpdate::new().with("sprints", 3).unwrap();
        let err = apply_update(&Notes::default(), &update).unwrap_err();
        assert!(matches!(err, ScrumError::UnknownField(f) if f == "sprints"));
    }

    #[test]
    fn test_duplicate_tool_results_are_skipped() {
        let state = Notes {
            messages: vec![Message::tool("c1", "ask", "web")],
            ..Default::default()
        };
        let update = StateUpdate::new()
            .with_messages(vec![
                Message::tool("c1", "ask", "web"),
                Message::assistant("ok"),
            ])
            .unwrap();
        let next = apply_update(&state, &update).unwrap();
        assert_eq!(next.messages.len(), 2);
    }

    #[test]
    fn test_schema_validation() {
        assert!(validate_schema::<Notes>().is_ok());
        assert!(matches!(
            validate_schema::<Undeclared>(),
            Err(ScrumError::GraphConfiguration(m)) if m.contains("extra")
        ));
        assert!(validate_schema::<WrongPolicy>().is_err());
    }

    #[test]
    fn test_update_merge_extends_arrays() {
        let a = StateUpdate::new().with("items", vec!["x"]).unwrap();
        let b = StateUpdate::new()
            .with("items", vec!["y"])
            .unwrap()
            .with("title", "t")
            .unwrap();
        let merged = a.merge(b);
        assert_eq!(merged.get("items").unwrap(), &serde_json::json!(["x", "y"]));
        assert_eq!(merged.fields().count(), 2);
    }
}
