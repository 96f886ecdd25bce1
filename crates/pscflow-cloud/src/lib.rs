//! pscflow provisioning core
//!
//! Drives infrastructure-as-code applies through a retry-aware, two-phase
//! state machine. Provider specifics (which binary, which flags, which
//! resources enable APIs) live in provider crates; this crate only knows
//! about commands, diagnostics and phases.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   pscflow CLI                    │
//! │                (psc deploy / output)             │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               pscflow-cloud-gcp                  │
//! │   terraform / gcloud wrappers, folder profiles   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                pscflow-cloud                     │
//! │  ┌──────────┐ ┌──────────┐ ┌─────────────────┐  │
//! │  │  runner  │ │ classify │ │ phase/sequencer │  │
//! │  └──────────┘ └──────────┘ └─────────────────┘  │
//! │  ┌──────────┐ ┌──────────┐ ┌─────────────────┐  │
//! │  │  retry   │ │  output  │ │  poll / state   │  │
//! │  └──────────┘ └──────────┘ └─────────────────┘  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod attempt;
pub mod classify;
pub mod error;
pub mod output;
pub mod phase;
pub mod poll;
pub mod request;
pub mod retry;
pub mod runner;
pub mod sequencer;
pub mod state;
pub mod testing;

// Re-exports
pub use attempt::{ApplyAttempt, AttemptHistory};
pub use classify::{Classifier, ErrorCategory, Matcher, Rule, classify};
pub use error::{CloudError, PERMISSION_REMEDIATION, Result};
pub use output::{OutputDefault, OutputField, OutputRecord, OutputSchema};
pub use phase::{
    DEFAULT_PROPAGATION_WAIT, Phase, PhaseEffect, PhaseEvent, PhaseMachine, PhaseState,
    Transition,
};
pub use poll::{CompletionPoller, PollState};
pub use request::{ApplyRequest, VarValue, Variables};
pub use retry::{BackoffScheme, RetryDecision, RetryPolicy, should_retry};
pub use runner::{
    CommandOutput, CommandRunner, CommandSpec, DEFAULT_COMMAND_TIMEOUT, TokioCommandRunner,
};
pub use sequencer::{ApplyPlan, PhaseSequencer, SequenceFailure, SequenceOutcome};
pub use state::{DeployRecord, DeployState, DeployStatus, FolderLock, StateManager};
