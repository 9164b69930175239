//! The runner state machine.
//!
//! ```text
//! Idle ──▶ Running(0) ──▶ … ──▶ Running(n-1) ──▶ Completed
//!              │                     │
//!              ├── halt ─────────────┴──▶ Halted
//!              └── cancel at boundary ───▶ Cancelled
//! ```
//!
//! Whatever the terminal state, every step whose `execute` was entered is
//! compensated afterwards, last entered first.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RunnerError;
use crate::pause::Pause;
use crate::state::{CANCELLED, ERROR, HALTED, StateBag};
use crate::step::{Step, StepAction, StepFailure};

/// How the runner treats the boundary after each successful step.
#[derive(Clone)]
pub enum RunPolicy {
    /// Run straight through.
    Basic,
    /// Wait for the pause handler after every successful step.
    Debug(Arc<dyn Pause>),
}

impl std::fmt::Debug for RunPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => f.write_str("Basic"),
            Self::Debug(_) => f.write_str("Debug"),
        }
    }
}

/// Where the runner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    /// Executing the step at this index.
    Running(usize),
    Completed,
    /// The step at this index halted.
    Halted(usize),
    Cancelled,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Halted { step: String },
    Cancelled,
}

/// A compensation that failed during the unwind.
#[derive(Debug, Clone)]
pub struct CompensationFailure {
    pub step: String,
    pub error: StepFailure,
}

/// Everything the caller needs to know about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Steps whose `execute` was entered, in order.
    pub executed: Vec<String>,
    /// Steps compensated, in the order compensation ran.
    pub compensated: Vec<String>,
    pub compensation_failures: Vec<CompensationFailure>,
}

/// Executes an ordered sequence of steps against one state bag.
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
    policy: RunPolicy,
    cancel: CancellationToken,
    state: RunState,
}

impl Runner {
    pub fn new(steps: Vec<Box<dyn Step>>, policy: RunPolicy) -> Self {
        Self {
            steps,
            policy,
            cancel: CancellationToken::new(),
            state: RunState::Idle,
        }
    }

    /// Runner that executes every step without pausing.
    pub fn basic(steps: Vec<Box<dyn Step>>) -> Self {
        Self::new(steps, RunPolicy::Basic)
    }

    /// Runner that pauses after every successful step.
    pub fn debug(steps: Vec<Box<dyn Step>>, pause: Arc<dyn Pause>) -> Self {
        Self::new(steps, RunPolicy::Debug(pause))
    }

    /// Observe an externally owned token instead of a private one.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token whose cancellation stops the run at the next step boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation. Takes effect at the next step boundary.
    pub fn cancel(&self) {
        info!("Cancelling the step runner");
        self.cancel.cancel();
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Check that every declared read is seeded in `state` or written by an
    /// earlier step.
    pub fn validate(&self, state: &StateBag) -> Result<(), RunnerError> {
        let mut available: HashSet<&str> = state.keys().into_iter().collect();
        for step in &self.steps {
            if let Some(key) = step.reads().iter().find(|key| !available.contains(**key)) {
                return Err(RunnerError::Wiring {
                    step: step.name().to_string(),
                    key: *key,
                });
            }
            available.extend(step.writes().iter().copied());
        }
        Ok(())
    }

    /// Drive the sequence to a terminal state, then unwind.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError`] without executing anything when the sequence is
    /// miswired or the runner was already started. Step failures are not
    /// errors here; they are reported through [`RunReport::outcome`] and the
    /// bag's [`ERROR`] entry.
    pub async fn run(&mut self, state: &StateBag) -> Result<RunReport, RunnerError> {
        if self.state != RunState::Idle {
            return Err(RunnerError::AlreadyStarted);
        }
        self.validate(state)?;

        let mut entered: Vec<usize> = Vec::with_capacity(self.steps.len());
        let mut terminal = RunState::Completed;

        for index in 0..self.steps.len() {
            if self.cancel.is_cancelled() {
                terminal = RunState::Cancelled;
                break;
            }

            self.state = RunState::Running(index);
            entered.push(index);

            let step = &mut self.steps[index];
            debug!(step = step.name(), index, "executing step");
            let action = step.execute(state).await;

            if action == StepAction::Halt {
                if state.get_ok(ERROR).is_none() {
                    state.put(
                        ERROR,
                        StepFailure::msg(format!(
                            "step '{}' halted without recording an error",
                            step.name()
                        )),
                    );
                }
                terminal = if self.cancel.is_cancelled() {
                    RunState::Cancelled
                } else {
                    RunState::Halted(index)
                };
                break;
            }

            if let RunPolicy::Debug(pause) = &self.policy {
                tokio::select! {
                    () = pause.pause(step.name(), state) => {}
                    () = self.cancel.cancelled() => {
                        debug!(step = step.name(), "pause interrupted by cancellation");
                    }
                }
            }
        }

        match terminal {
            RunState::Cancelled => state.put(CANCELLED, true),
            RunState::Halted(_) => state.put(HALTED, true),
            _ => {}
        }

        let executed = entered
            .iter()
            .map(|&i| self.steps[i].name().to_string())
            .collect();

        let mut compensated = Vec::with_capacity(entered.len());
        let mut compensation_failures = Vec::new();
        while let Some(index) = entered.pop() {
            let step = &mut self.steps[index];
            let name = step.name().to_string();
            debug!(step = %name, "compensating step");
            if let Err(error) = step.compensate(state).await {
                warn!(step = %name, error = %error, "compensation failed");
                compensation_failures.push(CompensationFailure {
                    step: name.clone(),
                    error,
                });
            }
            compensated.push(name);
        }

        self.state = terminal;
        let outcome = match terminal {
            RunState::Halted(index) => RunOutcome::Halted {
                step: self.steps[index].name().to_string(),
            },
            RunState::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Completed,
        };
        info!(outcome = ?outcome, "step runner finished");

        Ok(RunReport {
            outcome,
            executed,
            compensated,
            compensation_failures,
        })
    }
}
