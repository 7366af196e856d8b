//! Remote tool provider over JSON-RPC 2.0
//!
//! The tool server exposes `tools/list` and `tools/call`. Connections are made
//! per invocation with the caller's bearer credential. Discovery failures
//! degrade to an empty tool set; a missing credential is only an error when
//! the configuration demands one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::tools::{Tool, ToolContext, ToolEffect, ToolRegistry, ToolSpec};
use scrumflow_core::config::RemoteToolsConfig;
use scrumflow_core::fail_open::fail_open_retrying;
use scrumflow_core::{Result, ScrumError};

const REMOTE_TIMEOUT_SECS: u64 = 30;

/// Tool metadata advertised by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "object_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn object_schema() -> Value {
    json!({ "type": "object" })
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client for one tool server connection
pub struct RemoteToolProvider {
    http: reqwest::Client,
    url: String,
    credential: Option<String>,
    next_id: AtomicU64,
}

impl RemoteToolProvider {
    pub fn new(url: impl Into<String>, credential: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
            credential,
            next_id: AtomicU64::new(1),
        }
    }

    async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(token) = &self.credential {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ScrumError::TransientService(format!("{} request failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(ScrumError::Service(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ScrumError::Service(format!("{} returned invalid JSON: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(ScrumError::Service(format!(
                "{} failed: [{}] {}",
                method, error.code, error.message
            )));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>> {
        let result = self.send("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .send(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await
            .map_err(|e| ScrumError::ToolExecution {
                tool: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(tool_result_text(&result))
    }
}

/// Flatten a `tools/call` result into text
pub fn tool_result_text(result: &Value) -> String {
    if let Some(parts) = result.get("content").and_then(|c| c.as_array()) {
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// A tool backed by the remote server
pub struct RemoteTool {
    provider: Arc<RemoteToolProvider>,
    info: RemoteToolInfo,
    effect: ToolEffect,
}

#[async_trait]
impl Tool for RemoteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.info.name, &self.info.description, self.effect)
            .with_parameters(self.info.input_schema.clone())
    }

    async fn call(&self, arguments: Value, _ctx: &ToolContext) -> Result<String> {
        self.provider.call_tool(&self.info.name, arguments).await
    }
}

/// Wrap advertised tools, classifying each by its name
pub fn registry_from(provider: Arc<RemoteToolProvider>, tools: Vec<RemoteToolInfo>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for info in tools {
        let effect = ToolEffect::classify(&info.name);
        registry.register(Arc::new(RemoteTool {
            provider: provider.clone(),
            info,
            effect,
        }));
    }
    registry
}

/// Connect to the configured tool server for one invocation
pub async fn connect_remote_tools(
    settings: &RemoteToolsConfig,
    credential: Option<&str>,
) -> Result<ToolRegistry> {
    let credential = credential.filter(|c| !c.trim().is_empty());
    if settings.require_credential && credential.is_none() {
        return Err(ScrumError::MissingPrecondition(
            "an access token is required to use workspace tools; sign in and try again".to_string(),
        ));
    }

    let Some(url) = settings.url.as_deref() else {
        debug!("No remote tool server configured");
        return Ok(ToolRegistry::new());
    };

    let provider = Arc::new(RemoteToolProvider::new(url, credential.map(str::to_string)));
    let tools = fail_open_retrying("remote_tools::discover", settings.discovery_attempts, || {
        provider.list_tools()
    })
    .await
    .unwrap_or_default();
    info!("Discovered {} remote tools at {}", tools.len(), url);
    Ok(registry_from(provider, tools))
}
