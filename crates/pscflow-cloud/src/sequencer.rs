//! Async driver that executes [`PhaseMachine`] effects against a [`CommandRunner`]

use crate::attempt::{ApplyAttempt, AttemptHistory};
use crate::classify::{Classifier, ErrorCategory};
use crate::error::{CloudError, Result};
use crate::phase::{Phase, PhaseEffect, PhaseEvent, PhaseMachine, PhaseState};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use chrono::Utc;
use std::sync::Arc;

/// Commands making up one resource folder run
#[derive(Debug, Clone, Default)]
pub struct ApplyPlan {
    /// Run in order for every phase 1 attempt (e.g. init, targeted apply)
    pub capabilities: Vec<CommandSpec>,

    /// Run in order for every phase 2 attempt
    pub resources: Vec<CommandSpec>,

    /// Out-of-band capability activation issued before the first retry
    pub activation: Option<CommandSpec>,

    /// Whether the folder contains resources with long provisioning times
    pub long_running: bool,
}

impl ApplyPlan {
    fn steps(&self, phase: Phase) -> &[CommandSpec] {
        match phase {
            Phase::Capabilities => &self.capabilities,
            Phase::Resources => &self.resources,
        }
    }
}

/// Successful end of a run
#[derive(Debug, Clone)]
pub struct SequenceOutcome {
    /// Set when the provider only accepted the work
    pub caveat: Option<ErrorCategory>,

    pub history: AttemptHistory,

    /// Output of the last command that ran
    pub last_output: CommandOutput,
}

/// Failed end of a run, with the attempts made so far
#[derive(Debug)]
pub struct SequenceFailure {
    pub error: CloudError,
    pub history: AttemptHistory,
}

impl From<SequenceFailure> for CloudError {
    fn from(failure: SequenceFailure) -> Self {
        failure.error
    }
}

pub struct PhaseSequencer {
    runner: Arc<dyn CommandRunner>,
    machine: PhaseMachine,
    classifier: Classifier,
}

impl PhaseSequencer {
    pub fn new(runner: Arc<dyn CommandRunner>, machine: PhaseMachine) -> Self {
        Self {
            runner,
            machine,
            classifier: Classifier::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Drive the plan to a terminal state
    pub async fn run(&self, plan: &ApplyPlan) -> std::result::Result<SequenceOutcome, SequenceFailure> {
        let mut history = AttemptHistory::new();
        match self.drive(plan, &mut history).await {
            Ok((caveat, last_output)) => Ok(SequenceOutcome {
                caveat,
                history,
                last_output,
            }),
            Err(error) => Err(SequenceFailure { error, history }),
        }
    }

    async fn drive(
        &self,
        plan: &ApplyPlan,
        history: &mut AttemptHistory,
    ) -> Result<(Option<ErrorCategory>, CommandOutput)> {
        let mut state = PhaseState::Idle;
        let mut event = PhaseEvent::Start;
        let mut last_output = CommandOutput::default();

        loop {
            let transition = self.machine.transition(&state, event)?;
            tracing::debug!("{:?} -> {:?}", state, transition.state);
            state = transition.state;

            event = match transition.effect {
                PhaseEffect::RunApply { phase, attempt } => {
                    tracing::info!("Starting {}", phase);
                    last_output = self.apply(plan, phase, attempt, history).await?;
                    self.event_for(&last_output, plan.long_running)
                }
                PhaseEffect::RetryApply {
                    phase,
                    attempt,
                    delay,
                    activate_capabilities,
                } => {
                    if activate_capabilities {
                        self.activate(plan).await;
                    }
                    tracing::info!(
                        "Retrying {} in {}s (attempt {}/{})",
                        phase,
                        delay.as_secs(),
                        attempt,
                        self.machine.policy().max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    last_output = self.apply(plan, phase, attempt, history).await?;
                    self.event_for(&last_output, plan.long_running)
                }
                PhaseEffect::Advance => PhaseEvent::Advance,
                PhaseEffect::WaitForPropagation(wait) => {
                    tracing::info!("Waiting {}s for enabled APIs to propagate", wait.as_secs());
                    tokio::time::sleep(wait).await;
                    PhaseEvent::PropagationElapsed
                }
                PhaseEffect::CollectOutput { caveat } => {
                    if let Some(category) = caveat {
                        tracing::warn!("Apply accepted by the provider ({category}); continuing");
                    }
                    return Ok((caveat, last_output));
                }
                PhaseEffect::Fail(category) => {
                    let attempts = history.last().map(|a| a.attempt_number).unwrap_or(1);
                    return Err(CloudError::from_category(
                        category,
                        attempts,
                        last_output.diagnostic(),
                    ));
                }
            };
        }
    }

    fn event_for(&self, output: &CommandOutput, long_running: bool) -> PhaseEvent {
        if output.success() {
            PhaseEvent::ApplySucceeded
        } else {
            PhaseEvent::ApplyFailed(self.classifier.classify(output.diagnostic(), long_running))
        }
    }

    /// Run every step of one attempt, stopping at the first nonzero exit
    async fn apply(
        &self,
        plan: &ApplyPlan,
        phase: Phase,
        attempt: u32,
        history: &mut AttemptHistory,
    ) -> Result<CommandOutput> {
        let started_at = Utc::now();
        let mut output = CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        };

        for step in plan.steps(phase) {
            tracing::debug!("Running: {}", step.display());
            match self.runner.run(step).await {
                Ok(out) => {
                    output = out;
                    if !output.success() {
                        break;
                    }
                }
                Err(e) => {
                    history.record(ApplyAttempt {
                        attempt_number: attempt,
                        phase,
                        category: None,
                        started_at,
                        ended_at: Utc::now(),
                        exit_succeeded: false,
                    });
                    return Err(e);
                }
            }
        }

        let category = (!output.success())
            .then(|| self.classifier.classify(output.diagnostic(), plan.long_running));
        history.record(ApplyAttempt {
            attempt_number: attempt,
            phase,
            category,
            started_at,
            ended_at: Utc::now(),
            exit_succeeded: output.success(),
        });

        Ok(output)
    }

    async fn activate(&self, plan: &ApplyPlan) {
        let Some(spec) = &plan.activation else {
            return;
        };
        tracing::info!("Enabling required APIs: {}", spec.display());
        match self.runner.run(spec).await {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!("API enablement failed: {}", out.diagnostic().trim()),
            Err(e) => tracing::warn!("API enablement failed: {}", e),
        }
    }
}
