//! Required output schemas for structured agent answers

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use scrumflow_core::{Result, ScrumError};

type Validator = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A JSON schema the final answer must satisfy, with its validator
#[derive(Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
    validator: Validator,
}

impl std::fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish()
    }
}

impl OutputSchema {
    /// Schema derived from `T`; values are accepted when they deserialize into `T`
    /// and are normalized through `T`'s serializer.
    pub fn of<T>(name: impl Into<String>) -> Self
    where
        T: JsonSchema + DeserializeOwned + Serialize + 'static,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| json!({ "type": "object" }));
        Self {
            name: name.into(),
            schema,
            validator: Arc::new(|value: &Value| {
                let typed: T = serde_json::from_value(value.clone())
                    .map_err(|e| ScrumError::SchemaValidation(e.to_string()))?;
                Ok(serde_json::to_value(typed)?)
            }),
        }
    }

    /// Replace the advertised schema, keeping the validator
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Add a check that runs after the base validation
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        let base = self.validator.clone();
        self.validator = Arc::new(move |value: &Value| {
            let normalized = base(value)?;
            check(&normalized)?;
            Ok(normalized)
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Value {
        &mut self.schema
    }

    pub fn validate(&self, value: &Value) -> Result<Value> {
        (self.validator)(value)
    }

    /// Validate a final answer: the service's structured payload if present,
    /// otherwise the message text parsed as JSON.
    pub fn extract(&self, structured: Option<Value>, content: &str) -> Result<Value> {
        let candidate = match structured {
            Some(value) => value,
            None => parse_json_text(content).ok_or_else(|| {
                ScrumError::SchemaValidation(format!(
                    "answer for '{}' is not JSON",
                    self.name
                ))
            })?,
        };
        self.validate(&candidate)
    }
}

/// Parse JSON from model text, tolerating a surrounding markdown fence
pub fn parse_json_text(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find(['{', '['])?;
    let end = trimmed.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Answer {
        items: Vec<String>,
        #[serde(default)]
        note: Option<String>,
    }

    #[test]
    fn test_schema_is_generated() {
        let schema = OutputSchema::of::<Answer>("answer");
        assert_eq!(schema.name(), "answer");
        assert!(schema.schema()["properties"].get("items").is_some());
    }

    #[test]
    fn test_extract_from_fenced_text() {
        let schema = OutputSchema::of::<Answer>("answer");
        let value = schema
            .extract(None, "Here you go:\n```json\n{\"items\": [\"a\"]}\n```")
            .unwrap();
        assert_eq!(value["items"][0], "a");
    }

    #[test]
    fn test_extract_rejects_wrong_shape() {
        let schema = OutputSchema::of::<Answer>("answer");
        let err = schema.extract(Some(json!({"items": 3})), "").unwrap_err();
        assert!(matches!(err, ScrumError::SchemaValidation(_)));
        assert!(schema.extract(None, "no json at all").is_err());
    }

    #[test]
    fn test_additional_check() {
        let schema = OutputSchema::of::<Answer>("answer").with_check(|value| {
            if value["items"].as_array().map_or(true, |a| a.is_empty()) {
                Err(ScrumError::SchemaValidation("items must not be empty".into()))
            } else {
                Ok(())
            }
        });
        assert!(schema.validate(&json!({"items": []})).is_err());
        assert!(schema.validate(&json!({"items": ["x"]})).is_ok());
    }
}
