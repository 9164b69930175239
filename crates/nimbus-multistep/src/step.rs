//! The [`Step`] trait and its failure channel.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::state::{ERROR, StateBag};

/// What the runner should do after a step's `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Proceed with the next step.
    Continue,
    /// Stop the run and unwind. The step must have recorded an [`ERROR`].
    Halt,
}

/// One unit of a build with forward and compensating behavior.
///
/// The keys a step declares in [`reads`](Step::reads) must be seeded into the
/// bag or declared in [`writes`](Step::writes) by an earlier step; the runner
/// checks this before executing anything. Keys a step only reads with
/// [`StateBag::get_ok`] need not be declared.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in logs, pause prompts, and run reports.
    fn name(&self) -> &str;

    /// Keys this step requires to be present.
    fn reads(&self) -> &'static [&'static str] {
        &[]
    }

    /// Keys this step may write.
    fn writes(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&mut self, state: &StateBag) -> StepAction;

    /// Undo this step's externally-visible side effects.
    ///
    /// Called for every step whose `execute` was entered, including the one
    /// that halted, so implementations must check that the resource they own
    /// actually exists before acting on it.
    async fn compensate(&mut self, _state: &StateBag) -> Result<(), StepFailure> {
        Ok(())
    }
}

/// Cloneable, type-erased error recorded in the state bag.
#[derive(Clone)]
pub struct StepFailure(Arc<dyn Error + Send + Sync + 'static>);

impl StepFailure {
    pub fn new<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Borrow the underlying error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl Error for StepFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}

/// Record `err` as the run's failure and return [`StepAction::Halt`].
pub fn halt<E>(state: &StateBag, err: E) -> StepAction
where
    E: Error + Send + Sync + 'static,
{
    state.put(ERROR, StepFailure::new(err));
    StepAction::Halt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_halt_records_error() {
        let state = StateBag::new();
        assert_eq!(halt(&state, DiskFull), StepAction::Halt);

        let failure = state.get(ERROR).unwrap();
        assert_eq!(failure.to_string(), "disk full");
        assert!(failure.downcast_ref::<DiskFull>().is_some());
    }

    #[test]
    fn test_msg_failure() {
        let failure = StepFailure::msg("no instance");
        assert_eq!(failure.to_string(), "no instance");
        assert!(failure.downcast_ref::<DiskFull>().is_none());
    }
}
