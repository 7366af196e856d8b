//! Scripted reasoning service for tests and offline runs

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::service::{ReasoningRequest, ReasoningResponse, ReasoningService};
use scrumflow_core::{Result, ScrumError, ToolCall};

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(ReasoningResponse),
    /// Fails with [`ScrumError::TransientService`]
    Transient(String),
    /// Fails with [`ScrumError::Service`]
    Fail(String),
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Respond(ReasoningResponse::text(content))
    }

    pub fn structured(value: Value) -> Self {
        Self::Respond(ReasoningResponse::structured(value))
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Respond(ReasoningResponse::tool_calls(calls))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

type Handler = Arc<dyn Fn(&ReasoningRequest) -> MockReply + Send + Sync>;

/// Reasoning service answering from per-agent scripts
///
/// Replies are looked up by [`ReasoningRequest::agent`]: queued replies first,
/// then a request-aware handler, then a fallback repeated forever.
#[derive(Default)]
pub struct MockReasoningService {
    queues: Mutex<HashMap<String, VecDeque<MockReply>>>,
    handlers: HashMap<String, Handler>,
    fallbacks: HashMap<String, MockReply>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockReasoningService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `agent`
    pub fn with_reply(self, agent: &str, reply: MockReply) -> Self {
        lock(&self.queues)
            .entry(agent.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn with_text(self, agent: &str, content: &str) -> Self {
        self.with_reply(agent, MockReply::text(content))
    }

    pub fn with_structured(self, agent: &str, value: Value) -> Self {
        self.with_reply(agent, MockReply::structured(value))
    }

    pub fn with_tool_calls(self, agent: &str, calls: Vec<ToolCall>) -> Self {
        self.with_reply(agent, MockReply::tool_calls(calls))
    }

    /// Answer `agent` by inspecting each request
    pub fn with_handler<F>(mut self, agent: &str, handler: F) -> Self
    where
        F: Fn(&ReasoningRequest) -> MockReply + Send + Sync + 'static,
    {
        self.handlers.insert(agent.to_string(), Arc::new(handler));
        self
    }

    /// Reply used whenever the queue for `agent` is empty
    pub fn with_fallback(mut self, agent: &str, reply: MockReply) -> Self {
        self.fallbacks.insert(agent.to_string(), reply);
        self
    }

    /// Number of requests received from `agent`
    pub fn calls(&self, agent: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.agent == agent)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Requests received from `agent`, oldest first
    pub fn requests(&self, agent: &str) -> Vec<ReasoningRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.agent == agent)
            .cloned()
            .collect()
    }

    fn next_reply(&self, request: &ReasoningRequest) -> Option<MockReply> {
        if let Some(reply) = lock(&self.queues)
            .get_mut(&request.agent)
            .and_then(|queue| queue.pop_front())
        {
            return Some(reply);
        }
        if let Some(handler) = self.handlers.get(&request.agent) {
            return Some(handler(request));
        }
        self.fallbacks.get(&request.agent).cloned()
    }
}

#[async_trait]
impl ReasoningService for MockReasoningService {
    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse> {
        lock(&self.requests).push(request.clone());
        match self.next_reply(request) {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Transient(message)) => Err(ScrumError::TransientService(message)),
            Some(MockReply::Fail(message)) => Err(ScrumError::Service(message)),
            None => Err(ScrumError::Service(format!(
                "No mock response for agent: {}",
                request.agent
            ))),
        }
    }
}
