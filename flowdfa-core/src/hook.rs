//! Named transition hooks.
//!
//! States refer to hooks by name in their `before_call` and `after_call`
//! lists. Names are resolved against a [`HookRegistry`] at transition time;
//! a name with no registered hook is skipped.

use crate::automaton::Automaton;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// A side-effect callback invoked with the automaton being transitioned.
///
/// Hooks run while the automaton's transfer is in progress. They may call
/// `peek`, `current`, `circulation` and `is_final_state` on it; a `transfer`
/// on the same automaton from inside a hook is refused.
pub type Hook = Arc<dyn Fn(&Automaton) + Send + Sync>;

/// Thread-safe mapping from hook name to callback.
#[derive(Default)]
pub struct HookRegistry {
    hooks: DashMap<String, Hook>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook, replacing any hook already registered under `name`.
    pub fn register<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Automaton) + Send + Sync + 'static,
    {
        let name = name.into();
        if self.hooks.insert(name.clone(), Arc::new(hook)).is_some() {
            tracing::debug!("hook '{}' replaced", name);
        }
    }

    /// Looks up a hook by name.
    ///
    /// The returned handle is detached from the registry, so invoking it does
    /// not hold any registry lock.
    pub fn get(&self, name: &str) -> Option<Hook> {
        self.hooks.get(name).map(|r| r.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Registered hook names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}
