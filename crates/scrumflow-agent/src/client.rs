//! OpenAI-compatible chat completion client
//!
//! One HTTP round trip per [`ReasoningService::invoke`]. Retries live in
//! [`crate::RetryingService`]; this client only classifies failures
//! (429, 5xx and connection problems are transient) and keeps a circuit
//! breaker so a dead endpoint is not hammered.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::schema::parse_json_text;
use crate::service::{ReasoningRequest, ReasoningResponse, ReasoningService};
use crate::types::{
    ChatFunction, ChatFunctionCall, ChatMessage, ChatRequest, ChatResponse, ChatTool, ChatToolCall,
};
use scrumflow_core::config::ModelConfig;
use scrumflow_core::{Message, Result, ScrumError, ToolCall};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Chat completion client with a per-instance circuit breaker
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    breaker: Arc<CircuitBreaker>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Build from configuration, reading the API key from the environment
    pub fn from_config(models: &ModelConfig) -> Result<Self> {
        let api_key = auth::get_api_key(&models.api_key_env)?;
        Ok(Self::new(&models.base_url, &models.default, api_key))
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Arc::new(breaker);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, body: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ScrumError::TransientService(format!("request failed: {}", e))
                } else {
                    ScrumError::Service(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            let message = format!("chat completion error {}: {}", status, error_text);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                ScrumError::TransientService(message)
            } else {
                ScrumError::Service(message)
            });
        }

        response
            .json()
            .await
            .map_err(|e| ScrumError::Service(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl ReasoningService for OpenAiClient {
    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse> {
        if !self.breaker.can_execute() {
            return Err(ScrumError::CircuitOpen(format!(
                "too many reasoning service failures, retry in {} seconds",
                self.breaker.time_until_retry() / 1000
            )));
        }

        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = build_chat_request(request, &model);
        tracing::debug!(
            "Sending {} messages for agent '{}' to {}",
            body.messages.len(),
            request.agent,
            model
        );

        match self.send(&body).await {
            Ok(response) => {
                self.breaker.record_success();
                if let Some(usage) = &response.usage {
                    tracing::debug!(
                        "Agent '{}' used {} prompt / {} completion tokens",
                        request.agent,
                        usage.prompt_tokens,
                        usage.completion_tokens
                    );
                }
                parse_chat_response(response, request.output_schema.is_some())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}

/// Translate a reasoning request into the chat wire format
pub fn build_chat_request(request: &ReasoningRequest, model: &str) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: Some(request.system_prompt.clone()),
        ..Default::default()
    });
    messages.extend(request.messages.iter().map(to_chat_message));

    let tools = request
        .tools
        .iter()
        .map(|spec| ChatTool {
            kind: "function".to_string(),
            function: ChatFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        })
        .collect();

    let response_format = request.output_schema.as_ref().map(|schema| {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name(),
                "schema": schema.schema(),
            }
        })
    });

    ChatRequest {
        model: model.to_string(),
        messages,
        tools,
        response_format,
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    match message {
        Message::Human { content } => ChatMessage {
            role: "user".to_string(),
            content: Some(content.clone()),
            ..Default::default()
        },
        Message::Assistant {
            content,
            tool_calls,
            name,
        } => ChatMessage {
            role: "assistant".to_string(),
            content: Some(content.clone()),
            tool_calls: (!tool_calls.is_empty()).then(|| {
                tool_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: ChatFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
            name: name.clone(),
            ..Default::default()
        },
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => ChatMessage {
            role: "tool".to_string(),
            content: Some(content.clone()),
            tool_call_id: Some(tool_call_id.clone()),
            ..Default::default()
        },
    }
}

/// Translate the first choice of a chat response
pub fn parse_chat_response(response: ChatResponse, structured: bool) -> Result<ReasoningResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ScrumError::Service("response contained no choices".to_string()))?;

    let content = choice.message.content.unwrap_or_default();
    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            let id = if call.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                call.id
            };
            ToolCall::new(id, call.function.name, arguments)
        })
        .collect();

    let structured = if structured && calls.is_empty() {
        parse_json_text(&content)
    } else {
        None
    };

    Ok(ReasoningResponse {
        message: Message::assistant(content).with_tool_calls(calls),
        structured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::OutputSchema;
    use crate::tools::{ToolEffect, ToolSpec};
    use crate::types::ChatChoice;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct Route {
        next: String,
    }

    #[test]
    fn test_request_translation() {
        let mut request = ReasoningRequest::new(
            "supervisor",
            "route the team",
            vec![
                Message::human("Build a todo app"),
                Message::assistant("")
                    .with_tool_calls(vec![ToolCall::new("c1", "get_today_date", json!({}))]),
                Message::tool("c1", "get_today_date", "2026-10-19"),
            ],
        );
        request.tools = vec![ToolSpec::new("get_today_date", "today", ToolEffect::ReadOnly)];
        request.output_schema = Some(OutputSchema::of::<Route>("route"));

        let body = build_chat_request(&request, "gpt-4o");
        assert_eq!(body.messages.len(), 4);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
        let calls = body.messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{}");
        assert_eq!(body.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(body.tools[0].function.name, "get_today_date");
        assert_eq!(
            body.response_format.as_ref().unwrap()["json_schema"]["name"],
            "route"
        );
    }

    #[test]
    fn test_response_translation() {
        let response = ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: Some("{\"next\": \"FINISH\"}".to_string()),
                    ..Default::default()
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        let parsed = parse_chat_response(response, true).unwrap();
        assert_eq!(parsed.structured.unwrap()["next"], "FINISH");
    }

    #[test]
    fn test_tool_call_arguments_are_decoded() {
        let response = ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![ChatToolCall {
                        id: String::new(),
                        kind: "function".to_string(),
                        function: ChatFunctionCall {
                            name: "estimate_effort".to_string(),
                            arguments: "{\"title\":\"Login\"}".to_string(),
                        },
                    }]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let parsed = parse_chat_response(response, true).unwrap();
        let calls = parsed.message.tool_calls();
        assert_eq!(calls[0].arguments["title"], "Login");
        assert!(calls[0].id.starts_with("call_"));
        assert!(parsed.structured.is_none());
    }

    #[test]
    fn test_empty_choices_is_service_error() {
        let response = ChatResponse {
            choices: vec![],
            usage: None,
        };
        assert!(matches!(
            parse_chat_response(response, false),
            Err(ScrumError::Service(_))
        ));
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits() {
        let breaker = CircuitBreaker::new(1, 60);
        breaker.record_failure();
        let client = OpenAiClient::new("http://127.0.0.1:9", "gpt-4o", "key")
            .with_circuit_breaker(breaker);
        let err = client
            .invoke(&ReasoningRequest::new("a", "", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::CircuitOpen(_)));
    }
}
