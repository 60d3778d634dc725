//! State definition types.
//!
//! Graphs are declared as a flat list of state records:
//!
//! ```yaml
//! - id: "draft"
//!   next: ["review"]
//!   initial_state: true
//!   after_call: ["notify_reviewer"]
//!
//! - id: "review"
//!   next: ["draft", "approved"]
//!   payload: { approver: "manager" }
//!
//! - id: "approved"
//!   final_state: true
//!   before_call: ["archive"]
//! ```

use crate::error::{CoreError, StateRule};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single state in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    /// Unique identifier.
    pub id: String,

    /// Successor identifiers, in declaration order.
    #[serde(default)]
    pub next: Vec<String>,

    /// Opaque payload carried with the state.
    #[serde(default)]
    pub payload: Value,

    /// Whether this state is the start of the graph.
    #[serde(default)]
    pub initial_state: bool,

    /// Whether this state terminates the graph.
    #[serde(default)]
    pub final_state: bool,

    /// Hooks invoked after entering this state.
    #[serde(default)]
    pub before_call: Vec<String>,

    /// Hooks invoked when leaving this state.
    #[serde(default)]
    pub after_call: Vec<String>,
}

impl StateDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            next: Vec::new(),
            payload: Value::Null,
            initial_state: false,
            final_state: false,
            before_call: Vec::new(),
            after_call: Vec::new(),
        }
    }

    pub fn with_next<I, S>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next = next.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Marks the state as initial.
    pub fn initial(mut self) -> Self {
        self.initial_state = true;
        self
    }

    /// Marks the state as final.
    pub fn terminal(mut self) -> Self {
        self.final_state = true;
        self
    }

    pub fn with_before_call<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before_call = hooks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_after_call<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after_call = hooks.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if this state qualifies as the graph's start.
    pub fn is_start(&self) -> bool {
        self.initial_state && !self.next.is_empty()
    }

    /// Returns true if the state lists itself as a successor.
    pub fn has_self_loop(&self) -> bool {
        self.next.iter().any(|n| *n == self.id)
    }

    /// Applies the per-state structural rules.
    pub fn check(&self) -> Result<(), CoreError> {
        let rule = if self.id.is_empty() {
            Some(StateRule::EmptyId)
        } else if self.initial_state && self.next.is_empty() {
            Some(StateRule::InitialWithoutNext)
        } else if self.final_state && !self.next.is_empty() {
            Some(StateRule::FinalWithNext)
        } else if !self.final_state && self.next.is_empty() {
            Some(StateRule::NonFinalWithoutNext)
        } else {
            None
        };

        match rule {
            Some(rule) => Err(CoreError::MalformedState {
                id: self.id.clone(),
                rule,
            }),
            None => Ok(()),
        }
    }
}

/// Decodes a YAML document into an ordered list of state definitions.
pub fn decode_yaml(input: &str) -> Result<Vec<StateDefinition>, CoreError> {
    Ok(serde_yaml::from_str(input)?)
}

/// Decodes a JSON array into an ordered list of state definitions.
pub fn decode_json(input: &Value) -> Result<Vec<StateDefinition>, CoreError> {
    Ok(serde_json::from_value(input.clone())?)
}
