//! Run coordination.
//!
//! [`launch`] drives a multi-worker run: samplers publish batches through a
//! bounded [`Handoff`], trainers extract and consume them, and switchers
//! alternate between both duties. Every worker follows its own
//! [`RoleMachine`] and meets the others at a [`Barrier`] at start, at each
//! epoch end and at drain time.
//!
//! [`Engine`] is the single-process facade: one sampling thread and one
//! copying thread feeding a [`GraphPool`] that the caller drains with
//! `get_next_batch`.

mod barrier;
mod coordinator;
mod engine;
mod graph_pool;
mod handoff;
mod role;

pub use barrier::{Barrier, BarrierWait};
pub use coordinator::{launch, Coordinator, RunSummary, TrainStep, WorkerReport};
pub use engine::{Engine, EngineState};
pub use graph_pool::GraphPool;
pub use handoff::Handoff;
pub use role::{Duty, LifecycleState, Role, RoleEvent, RoleMachine};
