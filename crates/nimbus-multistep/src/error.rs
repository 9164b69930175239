//! Error types for the step engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// A step read a state entry that was never written, or was written with a
/// different type. Both are contract violations between steps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    /// Required key is absent from the bag.
    #[error("state key '{key}' is missing")]
    Missing { key: &'static str },

    /// Key holds a value of another type.
    #[error("state key '{key}' does not hold a value of type {expected}")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
    },
}

/// Errors that prevent the runner from driving a step sequence.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    /// A step declares a read that no seeded entry or earlier step provides.
    #[error("step '{step}' reads '{key}' but nothing before it writes that key")]
    Wiring { step: String, key: &'static str },

    /// The runner has already driven its sequence once.
    #[error("runner has already been started")]
    AlreadyStarted,
}
