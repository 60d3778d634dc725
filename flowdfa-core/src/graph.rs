//! Validated state graph.
//!
//! A [`Graph`] is built once from a list of [`StateDefinition`]s. Building
//! checks every state's shape, finds the single start state, and walks the
//! graph from it:
//!
//! - successors that name no declared state fail the build with
//!   [`CoreError::UnknownNode`];
//! - declared states the walk never reaches are pruned, and a [`Diagnosis`]
//!   naming them is attached to the graph.
//!
//! After building, the definitions are immutable. The only shared mutable
//! structure is the adjacency side-table, which resolves a state's successor
//! identifiers to arena indices the first time any automaton visits it.

use crate::definition::{self, StateDefinition};
use crate::error::{CoreError, StateRule};
use crate::hook::HookRegistry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Position of a state in a graph's arena.
///
/// Only meaningful for the graph that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateIdx(usize);

/// How repeated state identifiers are handled while building.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateIdPolicy {
    /// The later definition replaces the earlier one.
    #[default]
    LastWriteWins,
    /// A repeated identifier fails the build.
    Reject,
}

/// Options controlling graph construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Handling of repeated state identifiers.
    pub duplicate_ids: DuplicateIdPolicy,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicate_ids(mut self, policy: DuplicateIdPolicy) -> Self {
        self.duplicate_ids = policy;
        self
    }
}

/// Kind of structure pruned while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisKind {
    /// Final states not reachable from the start state.
    UnreachableFinals,
    /// Non-final states not reachable from the start state.
    UnreachableStates,
}

/// Informational message about pruned structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub kind: DiagnosisKind,
    /// Pruned identifiers, sorted.
    pub states: Vec<String>,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            DiagnosisKind::UnreachableFinals => "not all end nodes are reachable",
            DiagnosisKind::UnreachableStates => "not all nodes are reachable",
        };
        write!(f, "{}: [{}]", what, self.states.join(", "))
    }
}

/// Result of walking the graph from its start state.
#[derive(Debug, Default)]
struct Reachability {
    visited: HashSet<String>,
    finals: HashSet<String>,
    unknown: Vec<String>,
}

impl Reachability {
    /// Depth-first walk from `start`. Self-loops are not followed; final
    /// states are recorded and not expanded.
    fn explore(index: &HashMap<String, StateDefinition>, start: &str) -> Self {
        let mut reach = Self::default();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            let Some(def) = index.get(id) else {
                if !reach.unknown.iter().any(|u| u == id) {
                    reach.unknown.push(id.to_string());
                }
                continue;
            };

            if !reach.visited.insert(id.to_string()) {
                continue;
            }

            if def.final_state {
                reach.finals.insert(id.to_string());
                continue;
            }

            for next in def.next.iter().rev() {
                if *next == def.id {
                    continue;
                }
                stack.push(next.as_str());
            }
        }

        reach
    }
}

/// A validated, pruned state graph shared by automata.
pub struct Graph {
    /// Surviving definitions, in declaration order.
    states: Vec<Arc<StateDefinition>>,

    /// Identifier -> arena position.
    index: HashMap<String, StateIdx>,

    start: StateIdx,

    /// Reachable final states, in declaration order.
    finals: Vec<StateIdx>,

    diagnosis: Vec<Diagnosis>,

    /// Memoized successor resolution, filled on first visit.
    adjacency: DashMap<StateIdx, Arc<[StateIdx]>>,

    /// Number of states whose successors have been resolved.
    expansions: AtomicUsize,

    /// Hash of the surviving definitions for integrity checks.
    checksum: String,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("states", &self.ids())
            .field("start", &self.start().id)
            .field("diagnosis", &self.diagnosis)
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl Graph {
    /// Decodes a YAML state list and builds a graph from it.
    pub fn from_yaml(input: &str) -> Result<Self, CoreError> {
        Self::build(definition::decode_yaml(input)?)
    }

    /// Like [`Graph::from_yaml`], with explicit build options.
    pub fn from_yaml_with(input: &str, options: &BuildOptions) -> Result<Self, CoreError> {
        Self::build_with(definition::decode_yaml(input)?, options)
    }

    /// Decodes a JSON state list and builds a graph from it.
    pub fn from_json(input: &serde_json::Value) -> Result<Self, CoreError> {
        Self::build(definition::decode_json(input)?)
    }

    /// Builds a graph with default options.
    pub fn build(states: Vec<StateDefinition>) -> Result<Self, CoreError> {
        Self::build_with(states, &BuildOptions::default())
    }

    /// Validates, indexes and prunes a list of state definitions.
    pub fn build_with(
        states: Vec<StateDefinition>,
        options: &BuildOptions,
    ) -> Result<Self, CoreError> {
        let mut index: HashMap<String, StateDefinition> = HashMap::with_capacity(states.len());
        let mut order: Vec<String> = Vec::with_capacity(states.len());
        let mut start: Option<String> = None;

        for def in states {
            def.check()?;

            if def.is_start() {
                if let Some(first) = &start {
                    return Err(CoreError::DuplicateStart {
                        first: first.clone(),
                        second: def.id,
                    });
                }
                start = Some(def.id.clone());
            }

            if index.contains_key(&def.id) {
                if options.duplicate_ids == DuplicateIdPolicy::Reject {
                    return Err(CoreError::MalformedState {
                        id: def.id,
                        rule: StateRule::DuplicateId,
                    });
                }
                tracing::debug!("state '{}' redeclared, later definition wins", def.id);
            } else {
                order.push(def.id.clone());
            }
            index.insert(def.id.clone(), def);
        }

        let start = start.ok_or(CoreError::NoStart)?;
        if !index.values().any(|def| def.final_state) {
            return Err(CoreError::NoFinal);
        }

        let reach = Reachability::explore(&index, &start);
        if !reach.unknown.is_empty() {
            return Err(CoreError::UnknownNode {
                nodes: reach.unknown,
            });
        }

        let mut diagnosis = Vec::new();

        let unreachable_finals: BTreeSet<&String> = order
            .iter()
            .filter(|id| index[*id].final_state && !reach.finals.contains(*id))
            .collect();
        if !unreachable_finals.is_empty() {
            diagnosis.push(Diagnosis {
                kind: DiagnosisKind::UnreachableFinals,
                states: unreachable_finals.into_iter().cloned().collect(),
            });
        }

        let unreachable_states: BTreeSet<&String> = order
            .iter()
            .filter(|id| !index[*id].final_state && !reach.visited.contains(*id))
            .collect();
        if !unreachable_states.is_empty() {
            diagnosis.push(Diagnosis {
                kind: DiagnosisKind::UnreachableStates,
                states: unreachable_states.into_iter().cloned().collect(),
            });
        }

        for d in &diagnosis {
            tracing::warn!("pruned graph: {}", d);
        }

        // Freeze the survivors into the arena
        let mut arena = Vec::with_capacity(reach.visited.len());
        let mut positions = HashMap::with_capacity(reach.visited.len());
        for id in order {
            if !reach.visited.contains(&id) {
                continue;
            }
            if let Some(def) = index.remove(&id) {
                positions.insert(id, StateIdx(arena.len()));
                arena.push(Arc::new(def));
            }
        }

        let start = positions[&start];
        let finals: Vec<StateIdx> = arena
            .iter()
            .enumerate()
            .filter(|(_, def)| def.final_state)
            .map(|(i, _)| StateIdx(i))
            .collect();

        let survivors: Vec<&StateDefinition> = arena.iter().map(|def| def.as_ref()).collect();
        let json_bytes = serde_json::to_vec(&survivors)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        tracing::info!(
            "built graph: {} states, {} final, start '{}', checksum {}",
            arena.len(),
            finals.len(),
            arena[start.0].id,
            checksum
        );

        Ok(Self {
            states: arena,
            index: positions,
            start,
            finals,
            diagnosis,
            adjacency: DashMap::new(),
            expansions: AtomicUsize::new(0),
            checksum,
        })
    }

    /// Returns the start state.
    pub fn start(&self) -> &StateDefinition {
        &self.states[self.start.0]
    }

    /// Returns the reachable final states.
    pub fn finals(&self) -> Vec<&StateDefinition> {
        self.finals.iter().map(|idx| self.states[idx.0].as_ref()).collect()
    }

    /// Looks up a state by identifier.
    pub fn get(&self, id: &str) -> Option<&StateDefinition> {
        self.index.get(id).map(|idx| self.states[idx.0].as_ref())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of states that survived pruning.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Identifiers of all states, in declaration order.
    pub fn ids(&self) -> Vec<&str> {
        self.states.iter().map(|def| def.id.as_str()).collect()
    }

    /// Messages about structure pruned while building.
    pub fn diagnosis(&self) -> &[Diagnosis] {
        &self.diagnosis
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Number of states whose successors have been resolved so far.
    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::Relaxed)
    }

    /// Hook names referenced by the graph that `hooks` cannot resolve.
    pub fn unresolved_hooks(&self, hooks: &HookRegistry) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .states
            .iter()
            .flat_map(|def| def.before_call.iter().chain(def.after_call.iter()))
            .filter(|name| !hooks.contains(name))
            .collect();
        names.into_iter().cloned().collect()
    }

    pub(crate) fn start_idx(&self) -> StateIdx {
        self.start
    }

    pub(crate) fn state(&self, idx: StateIdx) -> &Arc<StateDefinition> {
        &self.states[idx.0]
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<StateIdx> {
        self.index.get(id).copied()
    }

    /// Returns the resolved successors of a registered state, resolving them
    /// on first access.
    pub(crate) fn successors(&self, idx: StateIdx) -> Arc<[StateIdx]> {
        if let Some(cached) = self.adjacency.get(&idx) {
            return cached.value().clone();
        }

        self.adjacency
            .entry(idx)
            .or_insert_with(|| {
                self.expansions.fetch_add(1, Ordering::Relaxed);
                self.resolve(&self.states[idx.0].next)
            })
            .value()
            .clone()
    }

    /// Resolves successor identifiers against the arena, dropping duplicates
    /// and identifiers that are not present.
    pub(crate) fn resolve(&self, next: &[String]) -> Arc<[StateIdx]> {
        let mut resolved: Vec<StateIdx> = Vec::with_capacity(next.len());
        for id in next {
            match self.index_of(id) {
                Some(idx) if !resolved.contains(&idx) => resolved.push(idx),
                Some(_) => {}
                None => tracing::debug!("successor '{}' is not in the graph, skipping", id),
            }
        }
        resolved.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    const CHAIN: &str = r#"
- id: "start"
  payload: "start"
  next: ["1"]
  initial_state: true
- id: "1"
  payload: "1"
  next: ["2"]
- id: "2"
  payload: "2"
  next: ["3"]
- id: "3"
  payload: "3"
  next: ["end"]
- id: "end"
  payload: "end"
  final_state: true
"#;

    fn chain(len: usize) -> Vec<StateDefinition> {
        let mut states = vec![StateDefinition::new("s0").initial().with_next(["s1"])];
        for i in 1..len {
            states.push(StateDefinition::new(format!("s{i}")).with_next([format!("s{}", i + 1)]));
        }
        states.push(StateDefinition::new(format!("s{len}")).terminal());
        states
    }

    #[test]
    fn test_build_chain() {
        let graph = Graph::from_yaml(CHAIN).unwrap();

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.start().id, "start");
        assert_eq!(graph.ids(), vec!["start", "1", "2", "3", "end"]);
        assert_eq!(graph.finals().len(), 1);
        assert_eq!(graph.finals()[0].id, "end");
        assert!(graph.diagnosis().is_empty());
        assert_eq!(graph.get("2").unwrap().payload, serde_json::json!("2"));
        assert!(graph.get("4").is_none());
    }

    #[test]
    fn test_unreachable_finals_pruned() {
        let yaml = format!(
            "{CHAIN}
- id: \"end1\"
  payload: \"end1\"
  final_state: true
- id: \"end2\"
  payload: \"end2\"
  final_state: true
"
        );
        let graph = Graph::from_yaml(&yaml).unwrap();

        assert_eq!(graph.diagnosis().len(), 1);
        let diag = &graph.diagnosis()[0];
        assert_eq!(diag.kind, DiagnosisKind::UnreachableFinals);
        assert_eq!(diag.states, vec!["end1", "end2"]);
        assert_eq!(
            diag.to_string(),
            "not all end nodes are reachable: [end1, end2]"
        );

        let finals: Vec<&str> = graph.finals().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(finals, vec!["end"]);
        assert!(!graph.contains("end1"));
        assert!(!graph.contains("end2"));
    }

    #[test]
    fn test_unreachable_state_pruned() {
        let yaml = format!(
            "{CHAIN}
- id: \"4\"
  payload: \"4\"
  next: [\"end\"]
"
        );
        let graph = Graph::from_yaml(&yaml).unwrap();

        assert_eq!(graph.diagnosis().len(), 1);
        assert_eq!(graph.diagnosis()[0].kind, DiagnosisKind::UnreachableStates);
        assert_eq!(graph.diagnosis()[0].states, vec!["4"]);
        assert!(!graph.contains("4"));
        assert_eq!(graph.len(), 5);
    }

    #[test]
    fn test_unreachable_finals_and_states() {
        let graph = Graph::build(vec![
            StateDefinition::new("a").initial().with_next(["end"]),
            StateDefinition::new("end").terminal(),
            StateDefinition::new("orphan").with_next(["dead_end"]),
            StateDefinition::new("dead_end").terminal(),
        ])
        .unwrap();

        let kinds: Vec<DiagnosisKind> = graph.diagnosis().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiagnosisKind::UnreachableFinals, DiagnosisKind::UnreachableStates]
        );
        assert_eq!(graph.diagnosis()[0].states, vec!["dead_end"]);
        assert_eq!(graph.diagnosis()[1].states, vec!["orphan"]);
        assert_eq!(graph.ids(), vec!["a", "end"]);
    }

    #[test]
    fn test_unknown_node() {
        let yaml = r#"
- id: "start"
  next: ["1"]
  initial_state: true
- id: "1"
  next: ["2"]
- id: "2"
  next: ["3"]
- id: "3"
  next: ["4", "end"]
- id: "end"
  final_state: true
"#;
        match Graph::from_yaml(yaml) {
            Err(CoreError::UnknownNode { nodes }) => assert_eq!(nodes, vec!["4"]),
            other => panic!("expected unknown node error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_node_lists_all() {
        let result = Graph::build(vec![
            StateDefinition::new("s").initial().with_next(["x", "m", "y"]),
            StateDefinition::new("m").with_next(["x", "e"]),
            StateDefinition::new("e").terminal(),
        ]);
        match result {
            Err(CoreError::UnknownNode { nodes }) => assert_eq!(nodes, vec!["x", "y"]),
            other => panic!("expected unknown node error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_node_behind_unreachable_state() {
        // Only the walk from the start state is checked for unknown ids.
        let graph = Graph::build(vec![
            StateDefinition::new("s").initial().with_next(["e"]),
            StateDefinition::new("e").terminal(),
            StateDefinition::new("orphan").with_next(["missing"]),
        ])
        .unwrap();
        assert_eq!(graph.diagnosis()[0].states, vec!["orphan"]);
    }

    #[test]
    fn test_duplicate_start() {
        let result = Graph::build(vec![
            StateDefinition::new("a").initial().with_next(["e"]),
            StateDefinition::new("b").initial().with_next(["e"]),
            StateDefinition::new("e").terminal(),
        ]);
        match result {
            Err(CoreError::DuplicateStart { first, second }) => {
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected duplicate start, got {other:?}"),
        }
    }

    #[test]
    fn test_no_start_and_no_final() {
        let result = Graph::build(vec![
            StateDefinition::new("a").with_next(["e"]),
            StateDefinition::new("e").terminal(),
        ]);
        assert!(matches!(result, Err(CoreError::NoStart)));

        let result = Graph::build(vec![
            StateDefinition::new("a").initial().with_next(["b"]),
            StateDefinition::new("b").with_next(["a"]),
        ]);
        assert!(matches!(result, Err(CoreError::NoFinal)));

        assert!(matches!(Graph::build(vec![]), Err(CoreError::NoStart)));
    }

    #[test]
    fn test_malformed_state_stops_build() {
        let result = Graph::build(vec![
            StateDefinition::new("a").initial().with_next(["e"]),
            StateDefinition::new("m"),
            StateDefinition::new("e").terminal(),
        ]);
        match result {
            Err(CoreError::MalformedState { id, rule }) => {
                assert_eq!(id, "m");
                assert_eq!(rule, StateRule::NonFinalWithoutNext);
            }
            other => panic!("expected malformed state, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_error() {
        let err = Graph::from_yaml("- id: [").unwrap_err();
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }

    #[test]
    fn test_duplicate_id_policies() {
        let states = vec![
            StateDefinition::new("a").initial().with_next(["m"]),
            StateDefinition::new("m").with_next(["a"]),
            StateDefinition::new("m").with_next(["e"]).with_payload(serde_json::json!(2)),
            StateDefinition::new("e").terminal(),
        ];

        let graph = Graph::build(states.clone()).unwrap();
        assert_eq!(graph.ids(), vec!["a", "m", "e"]);
        assert_eq!(graph.get("m").unwrap().payload, serde_json::json!(2));

        let strict = BuildOptions::new().with_duplicate_ids(DuplicateIdPolicy::Reject);
        match Graph::build_with(states, &strict) {
            Err(CoreError::MalformedState { id, rule }) => {
                assert_eq!(id, "m");
                assert_eq!(rule, StateRule::DuplicateId);
            }
            other => panic!("expected duplicate id rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loops_and_cycles() {
        let graph = Graph::build(vec![
            StateDefinition::new("s").initial().with_next(["a"]),
            StateDefinition::new("a").with_next(["a", "b"]),
            StateDefinition::new("b").with_next(["s", "b", "e"]),
            StateDefinition::new("e").terminal(),
        ])
        .unwrap();
        assert!(graph.diagnosis().is_empty());
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_successors_memoized() {
        let graph = Graph::build(vec![
            StateDefinition::new("s").initial().with_next(["a", "a", "e"]),
            StateDefinition::new("a").with_next(["e"]),
            StateDefinition::new("e").terminal(),
        ])
        .unwrap();
        assert_eq!(graph.expansions(), 0);

        let start = graph.start_idx();
        let first = graph.successors(start);
        let second = graph.successors(start);
        assert_eq!(graph.expansions(), 1);
        assert!(Arc::ptr_eq(&first, &second));

        let ids: Vec<&str> = first.iter().map(|i| graph.state(*i).id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e"]);

        let end = graph.index_of("e").unwrap();
        assert!(graph.successors(end).is_empty());
        assert_eq!(graph.expansions(), 2);
    }

    #[test]
    fn test_successors_concurrent() {
        let graph = Arc::new(Graph::build(chain(16)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let graph = graph.clone();
                thread::spawn(move || {
                    let mut idx = graph.start_idx();
                    loop {
                        let next = graph.successors(idx);
                        match next.first() {
                            Some(n) => idx = *n,
                            None => break,
                        }
                    }
                    graph.state(idx).id.clone()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), "s16");
        }
        assert_eq!(graph.expansions(), 17);
    }

    #[test]
    fn test_checksum_stable() {
        let a = Graph::from_yaml(CHAIN).unwrap();
        let b = Graph::from_yaml(CHAIN).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 8);

        let c = Graph::build(chain(3)).unwrap();
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_unresolved_hooks() {
        let graph = Graph::build(vec![
            StateDefinition::new("s")
                .initial()
                .with_next(["e"])
                .with_after_call(["log", "notify"]),
            StateDefinition::new("e")
                .terminal()
                .with_before_call(["archive", "log"]),
        ])
        .unwrap();

        let hooks = HookRegistry::new();
        assert_eq!(graph.unresolved_hooks(&hooks), vec!["archive", "log", "notify"]);

        hooks.register("log", |_| {});
        assert_eq!(graph.unresolved_hooks(&hooks), vec!["archive", "notify"]);
    }

    proptest! {
        #[test]
        fn prop_chain_builds(len in 1usize..40) {
            let graph = Graph::build(chain(len)).unwrap();
            prop_assert_eq!(graph.len(), len + 1);
            prop_assert!(graph.diagnosis().is_empty());
            prop_assert_eq!(graph.finals().len(), 1);
        }

        #[test]
        fn prop_orphans_pruned(len in 1usize..20, orphans in 1usize..10) {
            let mut states = chain(len);
            for i in 0..orphans {
                states.push(StateDefinition::new(format!("o{i}")).with_next([format!("s{len}")]));
            }
            let graph = Graph::build(states).unwrap();
            prop_assert_eq!(graph.len(), len + 1);
            prop_assert_eq!(graph.diagnosis().len(), 1);
            prop_assert_eq!(graph.diagnosis()[0].states.len(), orphans);
            for i in 0..orphans {
                let id = format!("o{}", i);
                prop_assert!(!graph.contains(&id));
            }
        }
    }
}
