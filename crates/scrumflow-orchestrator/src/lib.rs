//! # scrumflow-orchestrator
//!
//! Checkpointed orchestration graphs for agent teams:
//!
//! - [`GraphBuilder`] wires nodes with direct and conditional edges and
//!   validates the result into a [`CompiledGraph`]
//! - every node execution is followed by a [`Checkpoint`] keyed by thread id,
//!   so runs suspend for a human and resume at exactly the suspended node
//! - [`TeamSupervisor`] routes between team members and finishes as soon as a
//!   member reports that it is blocked
//! - [`lifecycle`] is the pure state machine the run loop is driven by

mod activity_logger;
mod checkpoint;
mod graph;
pub mod lifecycle;
mod node;
mod state;
mod supervisor;

pub use activity_logger::ActivityLogger;
pub use checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Pending,
};
pub use graph::{CompiledGraph, GraphBuilder, GraphRun, ThreadSnapshot, END};
pub use node::{AgentNode, FnNode, Node, NodeContext, NodeOutcome, RunConfig, SubgraphNode};
pub use state::{apply_update, validate_schema, MergePolicy, StateUpdate, WorkflowState};
pub use supervisor::{
    route_by_next, RoutingDecision, SupervisedState, SupervisorNode, TeamSupervisor, FINISH,
    SUPERVISOR_NAME,
};
