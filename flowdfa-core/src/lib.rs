//! # flowdfa-core
//!
//! Deterministic workflow automata.
//!
//! This crate provides:
//! - State definitions and their decoding from YAML or JSON
//! - Graph validation, reachability analysis and pruning
//! - Named transition hooks
//! - Traversal handles with append-only history

pub mod automaton;
pub mod definition;
pub mod error;
pub mod graph;
pub mod hook;

pub use automaton::{Automaton, NextStates};
pub use definition::{decode_json, decode_yaml, StateDefinition};
pub use error::{CoreError, StateRule};
pub use graph::{BuildOptions, Diagnosis, DiagnosisKind, DuplicateIdPolicy, Graph, StateIdx};
pub use hook::{Hook, HookRegistry};
