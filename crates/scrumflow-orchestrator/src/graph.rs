//! Orchestration graph: builder, validation and the checkpointed run loop
//!
//! Nodes are joined by direct edges or by conditional edges whose router
//! reads the state and picks a key from a path map. After every node the
//! engine merges the node's update, writes a checkpoint, and routes. An
//! interruption writes a suspended checkpoint naming the node; `resume`
//! re-enters exactly that node with the human's answer. A run that stopped
//! between nodes (a crash, the step cap, a fatal node error) leaves its next
//! node in the last checkpoint, and `recover` continues from there.

use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::activity_logger::ActivityLogger;
use crate::checkpoint::{Checkpoint, CheckpointStore, Pending};
use crate::lifecycle::{transition, FailureCause, RunAction, RunEvent, RunState};
use crate::node::{Node, NodeContext, NodeOutcome, RunConfig};
use crate::state::{apply_update, validate_schema, StateUpdate, WorkflowState};
use scrumflow_core::{
    dangling_tool_calls, validate_history, Interrupt, Message, ResumeCommand, Result, ScrumError,
    ToolCall,
};

/// Sentinel target that ends a run
pub const END: &str = "__end__";

const DEFAULT_MAX_STEPS: usize = 50;

type Router<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

enum Edge<S> {
    Direct(String),
    Conditional {
        router: Router<S>,
        paths: HashMap<String, String>,
    },
}

impl<S> Edge<S> {
    fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(target) => vec![target.as_str()],
            Edge::Conditional { paths, .. } => paths.values().map(String::as_str).collect(),
        }
    }
}

/// Collects nodes and edges; [`GraphBuilder::compile`] checks the wiring
pub struct GraphBuilder<S: WorkflowState> {
    name: String,
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    edges: HashMap<String, Edge<S>>,
    entry: Option<String>,
    problems: Vec<String>,
}

impl<S: WorkflowState> GraphBuilder<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            entry: None,
            problems: Vec::new(),
        }
    }

    pub fn add_node(mut self, name: &str, node: impl Node<S> + 'static) -> Self {
        if name.is_empty() || name == END {
            self.problems.push(format!("'{}' is not a valid node name", name));
        } else if self.nodes.contains_key(name) {
            self.problems.push(format!("node '{}' is defined twice", name));
        } else {
            self.order.push(name.to_string());
            self.nodes.insert(name.to_string(), Arc::new(node));
        }
        self
    }

    pub fn add_edge(self, from: &str, to: &str) -> Self {
        self.insert_edge(from, Edge::Direct(to.to_string()))
    }

    /// Route from `from` by the key `router` returns; `paths` maps keys to targets
    pub fn add_conditional_edges<F, I, K, V>(self, from: &str, router: F, paths: I) -> Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let paths = paths
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.insert_edge(
            from,
            Edge::Conditional {
                router: Arc::new(router),
                paths,
            },
        )
    }

    pub fn set_entry_point(mut self, node: &str) -> Self {
        self.entry = Some(node.to_string());
        self
    }

    fn insert_edge(mut self, from: &str, edge: Edge<S>) -> Self {
        if self.edges.contains_key(from) {
            self.problems
                .push(format!("node '{}' has more than one outgoing edge", from));
        } else {
            self.edges.insert(from.to_string(), edge);
        }
        self
    }

    /// Validate the wiring and bind the graph to a checkpoint store
    pub fn compile(self, store: Arc<dyn CheckpointStore>) -> Result<CompiledGraph<S>> {
        validate_schema::<S>()?;

        let mut problems = self.problems;
        let entry = match &self.entry {
            Some(entry) if self.nodes.contains_key(entry) => entry.clone(),
            Some(entry) => {
                problems.push(format!("entry point '{}' is not a node", entry));
                String::new()
            }
            None => {
                problems.push("no entry point set".to_string());
                String::new()
            }
        };

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                problems.push(format!("edge starts at unknown node '{}'", from));
            }
            for target in edge.targets() {
                if target != END && !self.nodes.contains_key(target) {
                    problems.push(format!("edge from '{}' targets unknown node '{}'", from, target));
                }
            }
            if let Edge::Conditional { paths, .. } = edge {
                if paths.is_empty() {
                    problems.push(format!("conditional edge from '{}' has no paths", from));
                }
            }
        }

        for name in &self.order {
            if !self.edges.contains_key(name) {
                problems.push(format!("node '{}' has no outgoing edge", name));
            }
        }

        if !entry.is_empty() {
            let reachable = reachable_from(&entry, &self.edges);
            for name in &self.order {
                if !reachable.contains(name.as_str()) {
                    problems.push(format!("node '{}' is unreachable from '{}'", name, entry));
                }
            }
        }

        if !problems.is_empty() {
            return Err(ScrumError::GraphConfiguration(format!(
                "graph '{}': {}",
                self.name,
                problems.join("; ")
            )));
        }

        debug!(
            "Compiled graph '{}' with {} nodes, entry '{}'",
            self.name,
            self.nodes.len(),
            entry
        );
        Ok(CompiledGraph {
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
            entry,
            store,
            max_steps: DEFAULT_MAX_STEPS,
            suspension_ttl: None,
            activity: None,
        })
    }
}

fn reachable_from<'a, S>(entry: &'a str, edges: &'a HashMap<String, Edge<S>>) -> HashSet<&'a str> {
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);
    while let Some(node) = queue.pop_front() {
        if let Some(edge) = edges.get(node) {
            for target in edge.targets() {
                if target != END && seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }
    seen
}

/// Result of running a thread until it finishes or suspends
#[derive(Debug, Clone)]
pub struct GraphRun<S> {
    pub state: S,
    /// Set when the run stopped for a human
    pub interrupt: Option<Interrupt>,
}

impl<S> GraphRun<S> {
    pub fn is_suspended(&self) -> bool {
        self.interrupt.is_some()
    }
}

/// The latest checkpoint of a thread, decoded
#[derive(Debug, Clone)]
pub struct ThreadSnapshot<S> {
    pub state: S,
    pub pending: Pending,
    pub version: u64,
    pub created_at: chrono::DateTime<Utc>,
}

impl<S> ThreadSnapshot<S> {
    pub fn interrupt(&self) -> Option<&Interrupt> {
        match &self.pending {
            Pending::Interrupted { interrupt } => Some(interrupt),
            _ => None,
        }
    }
}

pub struct CompiledGraph<S: WorkflowState> {
    name: String,
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
    store: Arc<dyn CheckpointStore>,
    max_steps: usize,
    suspension_ttl: Option<Duration>,
    activity: Option<Arc<ActivityLogger>>,
}

impl<S: WorkflowState> std::fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<&String> = self.nodes.keys().collect();
        nodes.sort();
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("nodes", &nodes)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl<S: WorkflowState> CompiledGraph<S> {
    /// Cap on node executions per run segment
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Suspended threads older than `ttl` can no longer be resumed
    pub fn with_suspension_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.suspension_ttl = ttl;
        self
    }

    pub fn with_activity_logger(mut self, logger: Arc<ActivityLogger>) -> Self {
        self.activity = Some(logger);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Merge `input` into the thread's last state and run from the entry point
    ///
    /// A new thread starts from the default state. A suspended thread must be
    /// resumed instead. An empty `input` on a thread that stopped between
    /// nodes continues at the pending node, as [`CompiledGraph::recover`].
    pub async fn invoke(
        &self,
        thread_id: &str,
        input: StateUpdate,
        config: RunConfig,
    ) -> Result<GraphRun<S>> {
        let latest = self.store.load(thread_id).await?;
        let base = match &latest {
            Some(checkpoint) if checkpoint.is_suspended() => {
                return Err(ScrumError::ThreadSuspended(thread_id.to_string()))
            }
            Some(checkpoint) => {
                if let (Pending::Next { node }, true) = (&checkpoint.pending, input.is_empty()) {
                    let state = decode::<S>(&checkpoint.state)?;
                    return self
                        .continue_at(thread_id, node, state, checkpoint.version, config)
                        .await;
                }
                decode::<S>(&checkpoint.state)?
            }
            None => S::default(),
        };
        let state = apply_update(&base, &input)?;
        check_history(state.messages(), &[])?;
        let request = state
            .messages()
            .iter()
            .rev()
            .find(|m| m.is_human())
            .map(|m| m.content().to_string())
            .unwrap_or_default();
        self.log_start(thread_id, &request).await;
        self.run_from_entry(thread_id, state, latest.map_or(0, |c| c.version), config)
            .await
    }

    /// Run a thread from the entry point with a complete initial state
    pub async fn start(&self, thread_id: &str, state: S, config: RunConfig) -> Result<GraphRun<S>> {
        let version = self
            .store
            .load(thread_id)
            .await?
            .map_or(0, |c| c.version);
        self.run_from_entry(thread_id, state, version, config).await
    }

    /// Answer a suspended thread and continue at the node that suspended it
    pub async fn resume(
        &self,
        thread_id: &str,
        command: ResumeCommand,
        config: RunConfig,
    ) -> Result<GraphRun<S>> {
        let checkpoint = self.store.load(thread_id).await?.ok_or_else(|| {
            ScrumError::InvalidResume(format!("thread '{}' does not exist", thread_id))
        })?;
        let Some(interrupt) = checkpoint.interrupt().cloned() else {
            return Err(ScrumError::InvalidResume(format!(
                "thread '{}' is not suspended",
                thread_id
            )));
        };

        if let Some(ttl) = self.suspension_ttl {
            let age = Utc::now()
                .signed_duration_since(checkpoint.created_at)
                .to_std()
                .unwrap_or_default();
            if age > ttl {
                return Err(ScrumError::SuspensionExpired(thread_id.to_string()));
            }
        }

        info!(
            "Resuming thread {} at '{}' with {:?}",
            thread_id, interrupt.node, command
        );
        let state = decode::<S>(&checkpoint.state)?;
        check_history(state.messages(), &interrupt.tool_calls)?;
        let (run, actions) = transition(
            RunState::Suspended {
                node: interrupt.node.clone(),
                steps: 0,
            },
            RunEvent::Resumed {
                max_steps: self.max_steps,
            },
        );
        self.execute(thread_id, state, checkpoint.version, run, actions, Some(command), config)
            .await
    }

    /// Continue a thread that stopped between nodes at its pending node
    ///
    /// Nodes that already completed are not executed again.
    pub async fn recover(&self, thread_id: &str, config: RunConfig) -> Result<GraphRun<S>> {
        let checkpoint = self.store.load(thread_id).await?.ok_or_else(|| {
            ScrumError::InvalidResume(format!("thread '{}' does not exist", thread_id))
        })?;
        match &checkpoint.pending {
            Pending::Next { node } => {
                let state = decode::<S>(&checkpoint.state)?;
                self.continue_at(thread_id, node, state, checkpoint.version, config)
                    .await
            }
            Pending::Interrupted { .. } => Err(ScrumError::ThreadSuspended(thread_id.to_string())),
            Pending::Done => Err(ScrumError::InvalidResume(format!(
                "thread '{}' has nothing left to run",
                thread_id
            ))),
        }
    }

    /// Latest snapshot of a thread
    pub async fn state(&self, thread_id: &str) -> Result<Option<ThreadSnapshot<S>>> {
        match self.store.load(thread_id).await? {
            Some(checkpoint) => Ok(Some(ThreadSnapshot {
                state: decode(&checkpoint.state)?,
                pending: checkpoint.pending,
                version: checkpoint.version,
                created_at: checkpoint.created_at,
            })),
            None => Ok(None),
        }
    }

    async fn continue_at(
        &self,
        thread_id: &str,
        node: &str,
        state: S,
        version: u64,
        config: RunConfig,
    ) -> Result<GraphRun<S>> {
        if !self.nodes.contains_key(node) {
            return Err(ScrumError::GraphConfiguration(format!(
                "thread '{}' is pending at '{}', which graph '{}' does not have",
                thread_id, node, self.name
            )));
        }
        info!("Recovering thread {} at '{}'", thread_id, node);
        check_history(state.messages(), &[])?;
        let (run, actions) = transition(
            RunState::Idle,
            RunEvent::Start {
                entry: node.to_string(),
                max_steps: self.max_steps,
            },
        );
        self.execute(thread_id, state, version, run, actions, None, config)
            .await
    }

    async fn run_from_entry(
        &self,
        thread_id: &str,
        state: S,
        mut version: u64,
        config: RunConfig,
    ) -> Result<GraphRun<S>> {
        version += 1;
        self.store
            .save(&Checkpoint::new(
                thread_id,
                version,
                serde_json::to_value(&state)?,
                Pending::Next {
                    node: self.entry.clone(),
                },
            ))
            .await?;

        let (run, actions) = transition(
            RunState::Idle,
            RunEvent::Start {
                entry: self.entry.clone(),
                max_steps: self.max_steps,
            },
        );
        self.execute(thread_id, state, version, run, actions, None, config)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        thread_id: &str,
        mut state: S,
        mut version: u64,
        mut run: RunState,
        mut actions: Vec<RunAction>,
        mut resume: Option<ResumeCommand>,
        config: RunConfig,
    ) -> Result<GraphRun<S>> {
        let mut suspension: Option<Interrupt> = None;
        let mut failure: Option<ScrumError> = None;
        let mut current = String::new();

        loop {
            let mut scheduled = None;
            for action in actions.drain(..) {
                match action {
                    RunAction::LogActivity { message } => {
                        debug!("[{}:{}] {}", self.name, thread_id, message)
                    }
                    RunAction::SaveCheckpoint { next } => {
                        version += 1;
                        let pending = match next {
                            Some(node) => Pending::Next { node },
                            None => Pending::Done,
                        };
                        self.save(thread_id, version, &state, pending).await?;
                    }
                    RunAction::SaveSuspension { .. } => {
                        let Some(interrupt) = suspension.clone() else {
                            return Err(ScrumError::Other(format!(
                                "thread '{}' suspended without an interrupt",
                                thread_id
                            )));
                        };
                        version += 1;
                        self.save(thread_id, version, &state, Pending::Interrupted { interrupt })
                            .await?;
                    }
                    RunAction::RunNode { node } => scheduled = Some(node),
                }
            }

            match &run {
                RunState::Running { .. } => {}
                RunState::Finished { steps } => {
                    info!("Thread {} finished after {} steps", thread_id, steps);
                    if let Some(logger) = &self.activity {
                        logger.log_finished(thread_id, *steps).await;
                    }
                    return Ok(GraphRun {
                        state,
                        interrupt: None,
                    });
                }
                RunState::Suspended { .. } => {
                    if let (Some(logger), Some(interrupt)) = (&self.activity, &suspension) {
                        logger.log_suspended(thread_id, interrupt).await;
                    }
                    return Ok(GraphRun {
                        state,
                        interrupt: suspension,
                    });
                }
                RunState::Failed { error, cause } => {
                    error!("Thread {} failed at '{}': {}", thread_id, current, error);
                    if let Some(logger) = &self.activity {
                        logger.log_failed(thread_id, &current, error).await;
                    }
                    return Err(match (cause, failure.take()) {
                        (FailureCause::NodeError, Some(e)) => e,
                        (FailureCause::StepLimit, _) => ScrumError::MaxStepsExceeded {
                            agent: self.name.clone(),
                            max_steps: self.max_steps,
                        },
                        _ => ScrumError::GraphConfiguration(format!(
                            "graph '{}' thread '{}': {}",
                            self.name, thread_id, error
                        )),
                    });
                }
                RunState::Idle => {
                    return Err(ScrumError::Other(format!(
                        "thread '{}' has nothing scheduled",
                        thread_id
                    )))
                }
            }

            let Some(node_name) = scheduled else {
                return Err(ScrumError::Other(format!(
                    "thread '{}' is running without a scheduled node",
                    thread_id
                )));
            };
            current = node_name.clone();
            let node = self.nodes.get(&node_name).cloned().ok_or_else(|| {
                ScrumError::GraphConfiguration(format!("unknown node '{}'", node_name))
            })?;

            let ctx = NodeContext {
                thread_id: thread_id.to_string(),
                node: node_name.clone(),
                resume: resume.take(),
                config: config.clone(),
            };
            debug!("[{}:{}] running '{}'", self.name, thread_id, node_name);

            let outcome = node.run(&state, &ctx).await;
            let event = match self.settle(thread_id, &node_name, &mut state, outcome, &mut suspension) {
                Ok(event) => event,
                Err(e) => {
                    let e = self.node_failed(thread_id, &node_name, e);
                    let message = e.to_string();
                    failure = Some(e);
                    RunEvent::Error { message }
                }
            };

            if let (Some(logger), RunEvent::NodeCompleted { .. }) = (&self.activity, &event) {
                let step = match &run {
                    RunState::Running { steps, .. } => steps + 1,
                    _ => 0,
                };
                let last = state.messages().last().map(Message::content).unwrap_or_default();
                logger.log_node(thread_id, &node_name, step, last).await;
            }

            let (next_run, next_actions) = transition(run, event);
            run = next_run;
            actions = next_actions;
        }
    }

    /// Merge a node's outcome into `state` and turn it into a run event
    ///
    /// Errors returned here fail the run at `node_name`.
    fn settle(
        &self,
        thread_id: &str,
        node_name: &str,
        state: &mut S,
        outcome: Result<NodeOutcome>,
        suspension: &mut Option<Interrupt>,
    ) -> Result<RunEvent> {
        match outcome {
            Ok(NodeOutcome::Update(update)) => {
                *state = apply_update(state, &update)?;
                check_history(state.messages(), &[])?;
                Ok(RunEvent::NodeCompleted {
                    next: self.route(thread_id, node_name, state)?,
                })
            }
            Ok(NodeOutcome::Interrupt { update, interrupt }) => {
                *state = apply_update(state, &update)?;
                check_history(state.messages(), &interrupt.tool_calls)?;
                *suspension = Some(interrupt.at_node(node_name));
                Ok(RunEvent::Interrupted)
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    "Node '{}' on thread {} failed, reporting to the conversation: {}",
                    node_name, thread_id, e
                );
                let update = StateUpdate::new().with_message(Message::failure(node_name, &e))?;
                *state = apply_update(state, &update)?;
                Ok(RunEvent::NodeCompleted {
                    next: self.route(thread_id, node_name, state)?,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn route(&self, thread_id: &str, from: &str, state: &S) -> Result<Option<String>> {
        let edge = self.edges.get(from).ok_or_else(|| {
            ScrumError::GraphConfiguration(format!("node '{}' has no outgoing edge", from))
        })?;
        let target = match edge {
            Edge::Direct(target) => target.clone(),
            Edge::Conditional { router, paths } => {
                let key = router(state);
                paths.get(&key).cloned().ok_or_else(|| {
                    ScrumError::GraphConfiguration(format!(
                        "router of '{}' chose '{}', which has no path",
                        from, key
                    ))
                })?
            }
        };
        debug!("[{}:{}] '{}' -> '{}'", self.name, thread_id, from, target);
        Ok((target != END).then_some(target))
    }

    async fn save(&self, thread_id: &str, version: u64, state: &S, pending: Pending) -> Result<()> {
        self.store
            .save(&Checkpoint::new(
                thread_id,
                version,
                serde_json::to_value(state)?,
                pending,
            ))
            .await
    }

    async fn log_start(&self, thread_id: &str, request: &str) {
        info!("Starting thread {} on graph '{}'", thread_id, self.name);
        if let Some(logger) = &self.activity {
            logger.log_run_start(thread_id, &self.name, request).await;
        }
    }

    fn node_failed(&self, thread_id: &str, node: &str, source: ScrumError) -> ScrumError {
        ScrumError::NodeFailed {
            thread_id: thread_id.to_string(),
            node: node.to_string(),
            source: Box::new(source),
        }
    }
}

/// Every tool call must be answered, except the ones a suspension waits on
fn check_history(messages: &[Message], awaiting: &[ToolCall]) -> Result<()> {
    validate_history(messages)?;
    match dangling_tool_calls(messages)
        .into_iter()
        .find(|call| !awaiting.iter().any(|a| a.id == call.id))
    {
        Some(call) => Err(ScrumError::InvalidHistory(format!(
            "tool call '{}' ({}) has no result",
            call.id, call.name
        ))),
        None => Ok(()),
    }
}

fn decode<S: WorkflowState>(value: &Value) -> Result<S> {
    serde_json::from_value(value.clone())
        .map_err(|e| ScrumError::Checkpoint(format!("snapshot does not match the state record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::node::{AgentNode, FnNode, SubgraphNode};
    use crate::state::MergePolicy;
    use scrumflow_agent::builtin::COLLECT_MORE_DATA;
    use scrumflow_agent::{builtin_tools, Agent, MockReasoningService};
    use scrumflow_core::ToolCall;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Counter {
        messages: Vec<Message>,
        visits: Vec<String>,
        count: u32,
    }

    impl WorkflowState for Counter {
        fn fields() -> &'static [(&'static str, MergePolicy)] {
            &[
                ("messages", MergePolicy::AccumulateMessages),
                ("visits", MergePolicy::Append),
                ("count", MergePolicy::Replace),
            ]
        }

        fn messages(&self) -> &[Message] {
            &self.messages
        }
    }

    fn visit(name: &'static str) -> FnNode<Counter> {
        FnNode::new(move |state: &Counter, _ctx| {
            StateUpdate::new()
                .with("visits", vec![name])?
                .with("count", state.count + 1)
        })
    }

    fn store() -> Arc<dyn CheckpointStore> {
        Arc::new(MemoryCheckpointStore::new())
    }

    fn looping_graph(store: Arc<dyn CheckpointStore>, limit: u32) -> CompiledGraph<Counter> {
        GraphBuilder::new("loop")
            .add_node("tick", visit("tick"))
            .add_conditional_edges(
                "tick",
                move |s: &Counter| {
                    if s.count >= limit {
                        "done".to_string()
                    } else {
                        "again".to_string()
                    }
                },
                [("again", "tick"), ("done", END)],
            )
            .set_entry_point("tick")
            .compile(store)
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_run_and_checkpoints() {
        let store = store();
        let graph = GraphBuilder::new("linear")
            .add_node("a", visit("a"))
            .add_node("b", visit("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a")
            .compile(store.clone())
            .unwrap();

        let input = StateUpdate::new().with_message(Message::human("go")).unwrap();
        let run = graph.invoke("t1", input, RunConfig::default()).await.unwrap();

        assert!(!run.is_suspended());
        assert_eq!(run.state.visits, vec!["a", "b"]);
        assert_eq!(run.state.count, 2);

        // input snapshot + one per node
        let history = store.history("t1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].pending, Pending::Next { node: "b".into() });
        assert_eq!(history[2].pending, Pending::Done);
        assert!(history.windows(2).all(|w| w[1].version == w[0].version + 1));
    }

    #[tokio::test]
    async fn test_conditional_routing_and_followup_invoke() {
        let graph = looping_graph(store(), 3);
        let run = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap();
        assert_eq!(run.state.count, 3);

        // A later invocation continues from the stored state
        let run = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap();
        assert_eq!(run.state.count, 4);
        assert_eq!(run.state.visits.len(), 4);
    }

    #[tokio::test]
    async fn test_step_cap() {
        let graph = looping_graph(store(), 100).with_max_steps(5);
        let err = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::MaxStepsExceeded { max_steps: 5, .. }));
    }

    #[tokio::test]
    async fn test_compile_rejects_bad_wiring() {
        let missing_target = GraphBuilder::<Counter>::new("g")
            .add_node("a", visit("a"))
            .add_edge("a", "nowhere")
            .set_entry_point("a")
            .compile(store());
        assert!(matches!(missing_target, Err(ScrumError::GraphConfiguration(m)) if m.contains("nowhere")));

        let no_edge = GraphBuilder::<Counter>::new("g")
            .add_node("a", visit("a"))
            .set_entry_point("a")
            .compile(store());
        assert!(no_edge.is_err());

        let unreachable = GraphBuilder::<Counter>::new("g")
            .add_node("a", visit("a"))
            .add_node("island", visit("island"))
            .add_edge("a", END)
            .add_edge("island", END)
            .set_entry_point("a")
            .compile(store());
        assert!(matches!(unreachable, Err(ScrumError::GraphConfiguration(m)) if m.contains("island")));

        let no_entry = GraphBuilder::<Counter>::new("g")
            .add_node("a", visit("a"))
            .add_edge("a", END)
            .compile(store());
        assert!(no_entry.is_err());
    }

    #[tokio::test]
    async fn test_unknown_field_fails_node() {
        let graph = GraphBuilder::<Counter>::new("g")
            .add_node(
                "bad",
                FnNode::new(|_s: &Counter, _ctx| StateUpdate::new().with("sprints", 1)),
            )
            .add_edge("bad", END)
            .set_entry_point("bad")
            .compile(store())
            .unwrap();
        let err = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap_err();
        match err {
            ScrumError::NodeFailed { node, source, .. } => {
                assert_eq!(node, "bad");
                assert!(matches!(*source, ScrumError::UnknownField(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_recoverable_error_becomes_message() {
        let graph = GraphBuilder::<Counter>::new("g")
            .add_node(
                "needs_token",
                FnNode::new(|_s: &Counter, _ctx| {
                    Err(ScrumError::MissingPrecondition("sign in first".into()))
                }),
            )
            .add_node("after", visit("after"))
            .add_edge("needs_token", "after")
            .add_edge("after", END)
            .set_entry_point("needs_token")
            .compile(store())
            .unwrap();

        let run = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap();
        assert!(run.state.messages[0].is_blocking());
        assert!(run.state.messages[0].content().contains("sign in first"));
        assert_eq!(run.state.visits, vec!["after"]);
    }

    fn asking_agent(mock: Arc<MockReasoningService>) -> Agent {
        Agent::new("asker", "ask first", mock).with_tools(builtin_tools())
    }

    fn asking_mock() -> Arc<MockReasoningService> {
        Arc::new(
            MockReasoningService::new()
                .with_tool_calls(
                    "asker",
                    vec![ToolCall::new(
                        "q1",
                        COLLECT_MORE_DATA,
                        json!({"question": "Web or mobile?"}),
                    )],
                )
                .with_text("asker", "Web it is"),
        )
    }

    #[tokio::test]
    async fn test_interrupt_and_resume_at_node() {
        let store = store();
        let mock = asking_mock();
        let graph = GraphBuilder::new("ask")
            .add_node("first", visit("first"))
            .add_node("ask", AgentNode::<Counter>::new(asking_agent(mock.clone())))
            .add_node("last", visit("last"))
            .add_edge("first", "ask")
            .add_edge("ask", "last")
            .add_edge("last", END)
            .set_entry_point("first")
            .compile(store.clone())
            .unwrap();

        let input = StateUpdate::new().with_message(Message::human("build an app")).unwrap();
        let run = graph.invoke("t", input, RunConfig::default()).await.unwrap();
        let interrupt = run.interrupt.clone().unwrap();
        assert_eq!(interrupt.node, "ask");
        assert_eq!(interrupt.question.as_deref(), Some("Web or mobile?"));
        assert_eq!(run.state.visits, vec!["first"]);

        let snapshot = graph.state("t").await.unwrap().unwrap();
        assert_eq!(snapshot.interrupt().unwrap().node, "ask");

        let err = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::ThreadSuspended(_)));

        let run = graph
            .resume("t", ResumeCommand::provide("web"), RunConfig::default())
            .await
            .unwrap();
        // "first" is not re-executed
        assert_eq!(run.state.visits, vec!["first", "last"]);
        assert_eq!(mock.calls("asker"), 2);
        assert_eq!(
            run.state.messages.iter().filter(|m| m.role() == "tool").count(),
            1
        );

        let err = graph
            .resume("t", ResumeCommand::provide("again"), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::InvalidResume(_)));
    }

    #[tokio::test]
    async fn test_expired_suspension() {
        let graph = GraphBuilder::new("ask")
            .add_node("ask", AgentNode::<Counter>::new(asking_agent(asking_mock())))
            .add_edge("ask", END)
            .set_entry_point("ask")
            .compile(store())
            .unwrap()
            .with_suspension_ttl(Some(Duration::ZERO));

        let input = StateUpdate::new().with_message(Message::human("hi")).unwrap();
        graph.invoke("t", input, RunConfig::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = graph
            .resume("t", ResumeCommand::provide("web"), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::SuspensionExpired(_)));
    }

    #[tokio::test]
    async fn test_subgraph_propagates_interrupt_and_messages() {
        let store = store();
        let mock = asking_mock();
        let child = Arc::new(
            GraphBuilder::new("child")
                .add_node("ask", AgentNode::<Counter>::new(asking_agent(mock.clone())))
                .add_node("tick", visit("child_tick"))
                .add_edge("ask", "tick")
                .add_edge("tick", END)
                .set_entry_point("ask")
                .compile(store.clone())
                .unwrap(),
        );

        let parent = GraphBuilder::new("parent")
            .add_node(
                "Child",
                SubgraphNode::new(
                    child,
                    |p: &Counter| {
                        Ok(Counter {
                            messages: p.messages.clone(),
                            ..Default::default()
                        })
                    },
                    |c: &Counter, p: &Counter| StateUpdate::new().with("count", p.count + c.count),
                ),
            )
            .add_node("after", visit("after"))
            .add_edge("Child", "after")
            .add_edge("after", END)
            .set_entry_point("Child")
            .compile(store.clone())
            .unwrap();

        let input = StateUpdate::new().with_message(Message::human("build")).unwrap();
        let run = parent.invoke("p", input, RunConfig::default()).await.unwrap();
        assert_eq!(run.interrupt.as_ref().unwrap().node, "Child");
        assert_eq!(run.state.messages.len(), 1);
        assert!(store.load("p/Child").await.unwrap().unwrap().is_suspended());

        let run = parent
            .resume("p", ResumeCommand::provide("web"), RunConfig::default())
            .await
            .unwrap();
        assert!(!run.is_suspended());
        assert_eq!(run.state.visits, vec!["after"]);
        assert_eq!(run.state.count, 2);
        // human + question + answer + final assistant message
        assert_eq!(run.state.messages.len(), 4);
        assert_eq!(run.state.messages[3].content(), "Web it is");
    }

    fn linear_graph(store: Arc<dyn CheckpointStore>) -> CompiledGraph<Counter> {
        GraphBuilder::new("linear")
            .add_node("a", visit("a"))
            .add_node("b", visit("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a")
            .compile(store)
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_continues_at_pending_node() {
        let store = store();
        let stopped = Counter {
            visits: vec!["a".to_string()],
            count: 1,
            ..Default::default()
        };
        store
            .save(&Checkpoint::new(
                "t",
                4,
                serde_json::to_value(&stopped).unwrap(),
                Pending::Next { node: "b".into() },
            ))
            .await
            .unwrap();

        let graph = linear_graph(store.clone());
        let run = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap();
        assert_eq!(run.state.visits, vec!["a", "b"]);
        assert_eq!(run.state.count, 2);

        let latest = store.load("t").await.unwrap().unwrap();
        assert_eq!(latest.pending, Pending::Done);
        assert_eq!(latest.version, 5);

        let err = graph.recover("t", RunConfig::default()).await.unwrap_err();
        assert!(matches!(err, ScrumError::InvalidResume(_)));
    }

    #[tokio::test]
    async fn test_recover_after_step_cap() {
        let graph = looping_graph(store(), 6).with_max_steps(3);
        let err = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrumError::MaxStepsExceeded { .. }));

        let snapshot = graph.state("t").await.unwrap().unwrap();
        assert_eq!(snapshot.state.count, 3);
        assert_eq!(snapshot.pending, Pending::Next { node: "tick".into() });

        let run = graph.recover("t", RunConfig::default()).await.unwrap();
        assert_eq!(run.state.count, 6);
        assert_eq!(run.state.visits.len(), 6);
    }

    #[tokio::test]
    async fn test_fatal_node_error_keeps_its_kind() {
        let graph = GraphBuilder::<Counter>::new("g")
            .add_node("a", visit("a"))
            .add_node(
                "parse",
                FnNode::new(|_s: &Counter, _ctx| {
                    Err(ScrumError::SchemaValidation("missing 'tasks'".into()))
                }),
            )
            .add_edge("a", "parse")
            .add_edge("parse", END)
            .set_entry_point("a")
            .compile(store())
            .unwrap();

        let err = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), scrumflow_core::ErrorKind::SchemaValidation);
        match err {
            ScrumError::NodeFailed { node, source, .. } => {
                assert_eq!(node, "parse");
                assert!(matches!(*source, ScrumError::SchemaValidation(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        // The failed node is still pending, completed ones are not
        let snapshot = graph.state("t").await.unwrap().unwrap();
        assert_eq!(snapshot.pending, Pending::Next { node: "parse".into() });
        assert_eq!(snapshot.state.visits, vec!["a"]);
    }

    #[tokio::test]
    async fn test_unanswered_tool_call_fails_node() {
        let graph = GraphBuilder::<Counter>::new("g")
            .add_node(
                "sloppy",
                FnNode::new(|_s: &Counter, _ctx| {
                    StateUpdate::new().with_message(
                        Message::assistant("").with_tool_calls(vec![ToolCall::new(
                            "c1",
                            "estimate_effort",
                            json!({}),
                        )]),
                    )
                }),
            )
            .add_edge("sloppy", END)
            .set_entry_point("sloppy")
            .compile(store())
            .unwrap();

        let err = graph
            .invoke("t", StateUpdate::new(), RunConfig::default())
            .await
            .unwrap_err();
        match err {
            ScrumError::NodeFailed { source, .. } => {
                assert!(matches!(&*source, ScrumError::InvalidHistory(m) if m.contains("c1")))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resume_rejects_unanswered_calls_outside_the_suspension() {
        let store = store();
        let state = Counter {
            messages: vec![
                Message::human("plan"),
                Message::assistant("").with_tool_calls(vec![ToolCall::new(
                    "stray",
                    "estimate_effort",
                    json!({}),
                )]),
            ],
            ..Default::default()
        };
        store
            .save(&Checkpoint::new(
                "t",
                1,
                serde_json::to_value(&state).unwrap(),
                Pending::Interrupted {
                    interrupt: Interrupt::approval("asker", Vec::new()).at_node("a"),
                },
            ))
            .await
            .unwrap();

        let err = linear_graph(store)
            .resume("t", ResumeCommand::Approve, RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(&err, ScrumError::InvalidHistory(m) if m.contains("stray")));
    }
}
