//! Graph nodes
//!
//! A node reads the current state and returns a partial update, or stops at
//! an interruption point. Three kinds ship here: plain functions, agents, and
//! whole compiled graphs run as a single step of a parent graph.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use crate::graph::CompiledGraph;
use crate::state::{StateUpdate, WorkflowState};
use scrumflow_agent::{connect_remote_tools, Agent, AgentRun, ToolContext};
use scrumflow_core::config::RemoteToolsConfig;
use scrumflow_core::{Interrupt, ResumeCommand, Result};

/// Per-invocation settings passed through every node
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Bearer credential for remote tools
    pub credential: Option<String>,
}

impl RunConfig {
    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self {
            credential: Some(credential.into()),
        }
    }
}

/// What a node knows about the run it is part of
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub thread_id: String,
    /// Name of the executing node
    pub node: String,
    /// Set when this execution answers an earlier interruption of the node
    pub resume: Option<ResumeCommand>,
    pub config: RunConfig,
}

impl NodeContext {
    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(&self.thread_id).with_credential(self.config.credential.clone())
    }
}

#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Update(StateUpdate),
    /// Stop the run here; `update` is merged before the snapshot is taken
    Interrupt {
        update: StateUpdate,
        interrupt: Interrupt,
    },
}

#[async_trait]
pub trait Node<S: WorkflowState>: Send + Sync {
    async fn run(&self, state: &S, ctx: &NodeContext) -> Result<NodeOutcome>;
}

type UpdateFn<S> = dyn Fn(&S, &NodeContext) -> Result<StateUpdate> + Send + Sync;

/// A synchronous function as a node
pub struct FnNode<S> {
    f: Arc<UpdateFn<S>>,
}

impl<S: WorkflowState> FnNode<S> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&S, &NodeContext) -> Result<StateUpdate> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<S: WorkflowState> Node<S> for FnNode<S> {
    async fn run(&self, state: &S, ctx: &NodeContext) -> Result<NodeOutcome> {
        Ok(NodeOutcome::Update((self.f)(state, ctx)?))
    }
}

type OutputFn<S> = dyn Fn(&S, &AgentRun) -> Result<StateUpdate> + Send + Sync;

/// Runs an agent over the state's conversation
///
/// The agent's new messages always go to `messages`; the output mapper adds
/// any other fields derived from the finished run.
pub struct AgentNode<S> {
    agent: Agent,
    output: Arc<OutputFn<S>>,
    remote_tools: Option<RemoteToolsConfig>,
}

impl<S: WorkflowState> AgentNode<S> {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            output: Arc::new(|_, _| Ok(StateUpdate::new())),
            remote_tools: None,
        }
    }

    pub fn with_output<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &AgentRun) -> Result<StateUpdate> + Send + Sync + 'static,
    {
        self.output = Arc::new(f);
        self
    }

    /// Connect to the tool server on every execution using the run credential
    pub fn with_remote_tools(mut self, settings: RemoteToolsConfig) -> Self {
        self.remote_tools = Some(settings);
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[async_trait]
impl<S: WorkflowState> Node<S> for AgentNode<S> {
    async fn run(&self, state: &S, ctx: &NodeContext) -> Result<NodeOutcome> {
        let agent = match &self.remote_tools {
            Some(settings) => {
                let remote = connect_remote_tools(settings, ctx.config.credential.as_deref()).await?;
                self.agent.clone().with_extra_tools(&remote)
            }
            None => self.agent.clone(),
        };

        let tool_ctx = ctx.tool_context();
        let run = match &ctx.resume {
            Some(command) => agent.resume(state.messages(), &tool_ctx, command.clone()).await?,
            None => agent.run(state.messages(), &tool_ctx).await?,
        };

        let messages = StateUpdate::new().with_messages(run.messages.clone())?;
        match run.interrupt.clone() {
            Some(interrupt) => Ok(NodeOutcome::Interrupt {
                update: messages,
                interrupt,
            }),
            None => Ok(NodeOutcome::Update(messages.merge((self.output)(state, &run)?))),
        }
    }
}

type InputFn<P, C> = dyn Fn(&P) -> Result<C> + Send + Sync;
type MergeFn<P, C> = dyn Fn(&C, &P) -> Result<StateUpdate> + Send + Sync;

/// A compiled graph executed as one step of a parent graph
///
/// The child runs on thread `<parent thread>/<node>` with the same checkpoint
/// store, so an interruption inside it suspends the parent at this node and a
/// resume continues the child where it stopped. Messages the child adds are
/// appended to the parent's conversation; `output` maps everything else.
/// `input` must be a pure function of the parent state.
pub struct SubgraphNode<P, C: WorkflowState> {
    graph: Arc<CompiledGraph<C>>,
    input: Arc<InputFn<P, C>>,
    output: Arc<MergeFn<P, C>>,
    _parent: PhantomData<fn(&P)>,
}

impl<P: WorkflowState, C: WorkflowState> SubgraphNode<P, C> {
    pub fn new<I, O>(graph: Arc<CompiledGraph<C>>, input: I, output: O) -> Self
    where
        I: Fn(&P) -> Result<C> + Send + Sync + 'static,
        O: Fn(&C, &P) -> Result<StateUpdate> + Send + Sync + 'static,
    {
        Self {
            graph,
            input: Arc::new(input),
            output: Arc::new(output),
            _parent: PhantomData,
        }
    }
}

#[async_trait]
impl<P: WorkflowState, C: WorkflowState> Node<P> for SubgraphNode<P, C> {
    async fn run(&self, state: &P, ctx: &NodeContext) -> Result<NodeOutcome> {
        let thread_id = format!("{}/{}", ctx.thread_id, ctx.node);
        let input = (self.input)(state)?;
        let base = input.messages().len();

        let run = match &ctx.resume {
            Some(command) => {
                debug!("Resuming subgraph thread {}", thread_id);
                self.graph
                    .resume(&thread_id, command.clone(), ctx.config.clone())
                    .await?
            }
            None => {
                debug!("Starting subgraph thread {}", thread_id);
                self.graph.start(&thread_id, input, ctx.config.clone()).await?
            }
        };

        if let Some(interrupt) = run.interrupt {
            return Ok(NodeOutcome::Interrupt {
                update: StateUpdate::new(),
                interrupt,
            });
        }

        let added = run.state.messages().get(base..).unwrap_or_default().to_vec();
        let update = (self.output)(&run.state, state)?;
        Ok(NodeOutcome::Update(
            update.merge(StateUpdate::new().with_messages(added)?),
        ))
    }
}
