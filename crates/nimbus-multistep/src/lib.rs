//! Step orchestration engine for Nimbus builds.
//!
//! A build is an ordered list of [`Step`]s executed against one shared
//! [`StateBag`]. The [`Runner`] drives the sequence, stops at the first step
//! that halts, and always unwinds the steps that were entered by calling
//! their compensation in strict reverse order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Runner (Basic | Debug policy)                          │
//! │  - wiring check: every read has an earlier producer     │
//! │  - execute steps in order, halt on first failure        │
//! │  - cooperative cancellation at step boundaries          │
//! │  - reverse-order compensation of entered steps          │
//! └─────────────────────────────────────────────────────────┘
//!            │ execute / compensate
//!            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  StateBag: typed keys → shared values                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nimbus_multistep::{Runner, RunOutcome, StateBag, Step, StepAction, StateKey};
//! use async_trait::async_trait;
//!
//! const GREETING: StateKey<String> = StateKey::new("greeting");
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Step for Greet {
//!     fn name(&self) -> &str { "greet" }
//!
//!     async fn execute(&mut self, state: &StateBag) -> StepAction {
//!         state.put(GREETING, "hello".to_string());
//!         StepAction::Continue
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let state = StateBag::new();
//! let mut runner = Runner::basic(vec![Box::new(Greet)]);
//! let report = runner.run(&state).await?;
//! assert_eq!(report.outcome, RunOutcome::Completed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod pause;
pub mod runner;
pub mod state;
pub mod step;

pub use error::{Result, RunnerError, StateError};
pub use pause::{ChannelPause, Pause, ResumeHandle};
pub use runner::{CompensationFailure, RunOutcome, RunPolicy, RunReport, RunState, Runner};
pub use state::{CANCELLED, ERROR, HALTED, StateBag, StateKey};
pub use step::{Step, StepAction, StepFailure, halt};

/// Re-exported so callers share the runner's token type.
pub use tokio_util::sync::CancellationToken;
