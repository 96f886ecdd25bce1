//! Two-phase apply state machine
//!
//! ```text
//! Idle ─▶ Phase1Running ─▶ Phase1Done ─▶ AwaitingPropagation ─▶ Phase2Running ─▶ Completed
//!   │          │  ▲ retry                                             │  ▲ retry
//!   │          ▼──┘                                                   ▼──┘
//!   │        Failed(category)                                   Failed(category)
//!   └──(capabilities already enabled)──────────────────────────▶ Phase2Running
//! ```
//!
//! [`PhaseMachine::transition`] is pure: it maps `(state, event)` to the next
//! state plus the effect the driver must perform. It never touches processes
//! or clocks.

use crate::classify::ErrorCategory;
use crate::error::{CloudError, Result};
use crate::retry::{RetryPolicy, should_retry};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait between enabling capabilities and creating dependent resources
pub const DEFAULT_PROPAGATION_WAIT: Duration = Duration::from_secs(120);

/// Apply phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Restricted apply of capability-enabling resources only
    Capabilities,
    /// Full apply of everything else
    Resources,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Capabilities => write!(f, "phase 1 (capabilities)"),
            Phase::Resources => write!(f, "phase 2 (resources)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Idle,
    Phase1Running { attempt: u32 },
    Phase1Done,
    AwaitingPropagation,
    Phase2Running { attempt: u32 },
    /// Resources applied; `caveat` is set when the provider only accepted the work
    Completed { caveat: Option<ErrorCategory> },
    Failed(ErrorCategory),
}

impl PhaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseState::Completed { .. } | PhaseState::Failed(_))
    }

    /// Phase and attempt number while an apply is running
    pub fn running(&self) -> Option<(Phase, u32)> {
        match *self {
            PhaseState::Phase1Running { attempt } => Some((Phase::Capabilities, attempt)),
            PhaseState::Phase2Running { attempt } => Some((Phase::Resources, attempt)),
            _ => None,
        }
    }

    fn running_in(phase: Phase, attempt: u32) -> Self {
        match phase {
            Phase::Capabilities => PhaseState::Phase1Running { attempt },
            Phase::Resources => PhaseState::Phase2Running { attempt },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Start,
    /// Move on from a settled intermediate state
    Advance,
    ApplySucceeded,
    ApplyFailed(ErrorCategory),
    PropagationElapsed,
}

/// Work the driver performs after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEffect {
    RunApply {
        phase: Phase,
        attempt: u32,
    },
    RetryApply {
        phase: Phase,
        attempt: u32,
        delay: Duration,
        activate_capabilities: bool,
    },
    /// Feed [`PhaseEvent::Advance`] back immediately
    Advance,
    WaitForPropagation(Duration),
    CollectOutput {
        caveat: Option<ErrorCategory>,
    },
    Fail(ErrorCategory),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: PhaseState,
    pub effect: PhaseEffect,
}

impl Transition {
    fn to(state: PhaseState, effect: PhaseEffect) -> Self {
        Self { state, effect }
    }
}

/// Transition table for one resource folder run
#[derive(Debug, Clone, Copy)]
pub struct PhaseMachine {
    skip_capabilities: bool,
    policy: RetryPolicy,
    propagation_wait: Duration,
}

impl PhaseMachine {
    pub fn new(skip_capabilities: bool, policy: RetryPolicy, propagation_wait: Duration) -> Self {
        Self {
            skip_capabilities,
            policy,
            propagation_wait,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transition(&self, state: &PhaseState, event: PhaseEvent) -> Result<Transition> {
        use PhaseEvent as E;
        use PhaseState as S;

        let next = match (*state, event) {
            (S::Idle, E::Start) if self.skip_capabilities => Transition::to(
                S::Phase2Running { attempt: 1 },
                PhaseEffect::RunApply {
                    phase: Phase::Resources,
                    attempt: 1,
                },
            ),
            (S::Idle, E::Start) => Transition::to(
                S::Phase1Running { attempt: 1 },
                PhaseEffect::RunApply {
                    phase: Phase::Capabilities,
                    attempt: 1,
                },
            ),
            (S::Phase1Running { .. }, E::ApplySucceeded) => {
                Transition::to(S::Phase1Done, PhaseEffect::Advance)
            }
            (S::Phase1Done, E::Advance) => Transition::to(
                S::AwaitingPropagation,
                PhaseEffect::WaitForPropagation(self.propagation_wait),
            ),
            (S::AwaitingPropagation, E::PropagationElapsed) => Transition::to(
                S::Phase2Running { attempt: 1 },
                PhaseEffect::RunApply {
                    phase: Phase::Resources,
                    attempt: 1,
                },
            ),
            (S::Phase2Running { .. }, E::ApplySucceeded) => Transition::to(
                S::Completed { caveat: None },
                PhaseEffect::CollectOutput { caveat: None },
            ),
            (S::Phase1Running { attempt }, E::ApplyFailed(category)) => {
                self.on_failure(Phase::Capabilities, attempt, category)
            }
            (S::Phase2Running { attempt }, E::ApplyFailed(category)) => {
                self.on_failure(Phase::Resources, attempt, category)
            }
            (s, e) => {
                return Err(CloudError::InvalidTransition(format!("{:?} on {:?}", e, s)));
            }
        };

        Ok(next)
    }

    fn on_failure(&self, phase: Phase, attempt: u32, category: ErrorCategory) -> Transition {
        if category.is_accepted() {
            return match phase {
                Phase::Capabilities => Transition::to(PhaseState::Phase1Done, PhaseEffect::Advance),
                Phase::Resources => Transition::to(
                    PhaseState::Completed {
                        caveat: Some(category),
                    },
                    PhaseEffect::CollectOutput {
                        caveat: Some(category),
                    },
                ),
            };
        }

        let decision = should_retry(category, attempt, &self.policy);
        if decision.retry {
            let attempt = attempt + 1;
            Transition::to(
                PhaseState::running_in(phase, attempt),
                PhaseEffect::RetryApply {
                    phase,
                    attempt,
                    delay: decision.delay,
                    activate_capabilities: decision.activate_capabilities,
                },
            )
        } else {
            Transition::to(PhaseState::Failed(category), PhaseEffect::Fail(category))
        }
    }
}
