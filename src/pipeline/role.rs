use std::fmt;

use serde::Serialize;
use tracing::trace;

use crate::types::{GnnError, Result};

/// Part a worker plays in a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Samples and publishes batches.
    Sampler,
    /// Consumes published batches.
    Trainer,
    /// Alternates between sampling and training its own steps.
    Switcher,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Sampler => "sampler",
            Role::Trainer => "trainer",
            Role::Switcher => "switcher",
        })
    }
}

/// Run phase of one worker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum LifecycleState {
    /// Created, nothing loaded.
    Idle,
    /// Loading configuration, device and dataset.
    Initializing,
    /// Waiting at the start barrier.
    Ready,
    /// Working on `epoch`.
    Running {
        /// Current epoch.
        epoch: u32,
    },
    /// Done with `epoch`, waiting for the others.
    EpochBarrier {
        /// Epoch just finished.
        epoch: u32,
    },
    /// Past the last epoch, waiting at the end barrier.
    Draining,
    /// Resources released.
    Shutdown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => f.write_str("idle"),
            LifecycleState::Initializing => f.write_str("initializing"),
            LifecycleState::Ready => f.write_str("ready"),
            LifecycleState::Running { epoch } => write!(f, "running({epoch})"),
            LifecycleState::EpochBarrier { epoch } => write!(f, "epoch-barrier({epoch})"),
            LifecycleState::Draining => f.write_str("draining"),
            LifecycleState::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Current duty of a switcher.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Duty {
    /// Producing a batch.
    Sampling,
    /// Consuming a batch.
    Training,
}

/// Input to [`RoleMachine::apply`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoleEvent {
    /// Begin loading.
    Init,
    /// Loading finished.
    Initialized,
    /// Start barrier passed.
    Start,
    /// Local share of the epoch is done.
    EpochDone,
    /// Epoch barrier passed and another epoch follows.
    NextEpoch,
    /// Epoch barrier passed after the final epoch.
    Finish,
    /// Switch to the given duty.
    SwitchTo(Duty),
    /// Release everything; accepted from any state.
    Shutdown,
}

/// Explicit per-worker state machine.
#[derive(Clone, Debug)]
pub struct RoleMachine {
    role: Role,
    worker: usize,
    state: LifecycleState,
    duty: Option<Duty>,
    switches: u64,
}

impl RoleMachine {
    /// Machine in [`LifecycleState::Idle`].
    pub fn new(role: Role, worker: usize) -> Self {
        let duty = (role == Role::Switcher).then_some(Duty::Sampling);
        Self {
            role,
            worker,
            state: LifecycleState::Idle,
            duty,
            switches: 0,
        }
    }

    /// Role played.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Index within the role.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Current duty; `None` for non-switchers.
    pub fn duty(&self) -> Option<Duty> {
        self.duty
    }

    /// Duty changes so far.
    pub fn switches(&self) -> u64 {
        self.switches
    }

    /// Epoch being worked on, if running.
    pub fn epoch(&self) -> Option<u32> {
        match self.state {
            LifecycleState::Running { epoch } | LifecycleState::EpochBarrier { epoch } => {
                Some(epoch)
            }
            _ => None,
        }
    }

    /// Applies `event`, returning the new state or
    /// [`GnnError::InvalidState`] when the event is illegal here.
    pub fn apply(&mut self, event: RoleEvent) -> Result<LifecycleState> {
        use LifecycleState as S;
        let next = match (self.state, event) {
            (_, RoleEvent::Shutdown) => S::Shutdown,
            (S::Idle, RoleEvent::Init) => S::Initializing,
            (S::Initializing, RoleEvent::Initialized) => S::Ready,
            (S::Ready, RoleEvent::Start) => S::Running { epoch: 0 },
            (S::Running { epoch }, RoleEvent::EpochDone) => S::EpochBarrier { epoch },
            (S::EpochBarrier { epoch }, RoleEvent::NextEpoch) => S::Running { epoch: epoch + 1 },
            (S::EpochBarrier { .. }, RoleEvent::Finish) => S::Draining,
            (S::Running { .. }, RoleEvent::SwitchTo(duty)) => match self.duty {
                Some(current) if current != duty => {
                    self.duty = Some(duty);
                    self.switches += 1;
                    self.state
                }
                _ => return Err(self.reject(event)),
            },
            _ => return Err(self.reject(event)),
        };
        trace!(
            role = %self.role,
            worker = self.worker,
            from = %self.state,
            to = %next,
            ?event,
            "pipeline.role.transition"
        );
        self.state = next;
        Ok(next)
    }

    fn reject(&self, event: RoleEvent) -> GnnError {
        GnnError::InvalidState {
            call: event.name(),
            state: format!("{} {} in {}", self.role, self.worker, self.state),
        }
    }
}

impl RoleEvent {
    fn name(self) -> &'static str {
        match self {
            RoleEvent::Init => "init",
            RoleEvent::Initialized => "initialized",
            RoleEvent::Start => "start",
            RoleEvent::EpochDone => "epoch_done",
            RoleEvent::NextEpoch => "next_epoch",
            RoleEvent::Finish => "finish",
            RoleEvent::SwitchTo(Duty::Sampling) => "switch_to_sampling",
            RoleEvent::SwitchTo(Duty::Training) => "switch_to_training",
            RoleEvent::Shutdown => "shutdown",
        }
    }
}
