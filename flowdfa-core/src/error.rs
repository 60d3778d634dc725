//! Core error types.

use std::fmt;
use thiserror::Error;

/// Structural rule violated by a single state definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRule {
    /// The identifier is empty.
    EmptyId,
    /// An initial state declares no successors.
    InitialWithoutNext,
    /// A final state declares successors.
    FinalWithNext,
    /// A non-final state declares no successors.
    NonFinalWithoutNext,
    /// The identifier was already declared (only under `DuplicateIdPolicy::Reject`).
    DuplicateId,
}

impl fmt::Display for StateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StateRule::EmptyId => "node id is empty",
            StateRule::InitialWithoutNext => "initial state must have next",
            StateRule::FinalWithNext => "final state must not have next",
            StateRule::NonFinalWithoutNext => "non-final state must have next",
            StateRule::DuplicateId => "node id is declared more than once",
        };
        f.write_str(msg)
    }
}

/// Errors from building a state graph.
///
/// Every variant is fatal for the build attempt. Unreachable structure is not
/// an error; it is pruned and reported through [`crate::Diagnosis`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to decode state list: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to decode state list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed state '{id}': {rule}")]
    MalformedState { id: String, rule: StateRule },

    #[error("duplicate start state: '{second}' (already have '{first}')")]
    DuplicateStart { first: String, second: String },

    #[error("no start state")]
    NoStart,

    #[error("no final state")]
    NoFinal,

    #[error("unknown node: {nodes:?}")]
    UnknownNode { nodes: Vec<String> },
}

impl CoreError {
    /// Returns true if the input could not be decoded into state records.
    pub fn is_decode(&self) -> bool {
        matches!(self, CoreError::Yaml(_) | CoreError::Json(_))
    }

    /// Returns a stable error code suitable for reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Yaml(_) => "DECODE_ERROR",
            CoreError::Json(_) => "DECODE_ERROR",
            CoreError::MalformedState { .. } => "MALFORMED_STATE",
            CoreError::DuplicateStart { .. } => "DUPLICATE_START",
            CoreError::NoStart => "NO_START",
            CoreError::NoFinal => "NO_FINAL",
            CoreError::UnknownNode { .. } => "UNKNOWN_NODE",
        }
    }
}
