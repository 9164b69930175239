//! Shared key/value state threaded through every step of one run.
//!
//! Values are stored type-erased. Every key is declared as a [`StateKey<T>`]
//! constant, so the value type for a key is fixed where the key is declared
//! and each read goes through one checked downcast.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StateError;
use crate::step::StepFailure;

/// Error recorded by a halting step.
pub const ERROR: StateKey<StepFailure> = StateKey::new("error");

/// Set by the runner when a run was cancelled.
pub const CANCELLED: StateKey<bool> = StateKey::new("cancelled");

/// Set by the runner when a step halted.
pub const HALTED: StateKey<bool> = StateKey::new("halted");

/// A typed name for one entry in a [`StateBag`].
pub struct StateKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    /// Declare a key. Use one constant per key so the type stays stable.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// The string name the entry is stored under.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Thread-safe, dynamically-typed map shared by the steps of one run.
#[derive(Default)]
pub struct StateBag {
    entries: RwLock<HashMap<&'static str, Entry>>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry.
    pub fn put<T>(&self, key: StateKey<T>, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.entries.write().insert(key.name, Arc::new(value));
    }

    /// Read an entry that an earlier step must have written.
    ///
    /// # Errors
    ///
    /// [`StateError::Missing`] if the key was never written and
    /// [`StateError::TypeMismatch`] if it holds another type.
    pub fn get<T>(&self, key: StateKey<T>) -> Result<T, StateError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = self.entries.read();
        let entry = entries
            .get(key.name)
            .ok_or(StateError::Missing { key: key.name })?;
        entry
            .downcast_ref::<T>()
            .cloned()
            .ok_or(StateError::TypeMismatch {
                key: key.name,
                expected: type_name::<T>(),
            })
    }

    /// Read an entry that may legitimately be absent.
    pub fn get_ok<T>(&self, key: StateKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.get(key) {
            Ok(value) => Some(value),
            Err(StateError::Missing { .. }) => None,
            Err(err) => {
                tracing::error!(error = %err, "state entry has unexpected type");
                None
            }
        }
    }

    /// Remove an entry, returning whether it was present.
    pub fn remove<T>(&self, key: StateKey<T>) -> bool {
        self.entries.write().remove(key.name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Names of every entry currently in the bag.
    pub fn keys(&self) -> Vec<&'static str> {
        self.entries.read().keys().copied().collect()
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort_unstable();
        f.debug_struct("StateBag").field("keys", &keys).finish()
    }
}
