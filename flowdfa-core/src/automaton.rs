//! Traversal handles over a shared graph.
//!
//! An [`Automaton`] is a cursor into a [`Graph`] with its own append-only
//! history. Many automata can share one graph; each one owns its position and
//! history behind its own lock.
//!
//! A successful [`Automaton::transfer`] runs, in order:
//!
//! 1. the departing state's `after_call` hooks, last declared first;
//! 2. a history append of the departing state;
//! 3. the move to the target state;
//! 4. the arriving state's `before_call` hooks, last declared first;
//! 5. a second history append when the arriving state is final.

use crate::definition::StateDefinition;
use crate::graph::{Graph, StateIdx};
use crate::hook::HookRegistry;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// States reachable in one transfer, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct NextStates {
    states: Vec<Arc<StateDefinition>>,
}

impl NextStates {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&StateDefinition> {
        self.states
            .iter()
            .find(|def| def.id == id)
            .map(|def| def.as_ref())
    }

    /// Identifiers in declaration order.
    pub fn ids(&self) -> Vec<&str> {
        self.states.iter().map(|def| def.id.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateDefinition> {
        self.states.iter().map(|def| def.as_ref())
    }
}

enum Position {
    /// A state owned by the graph.
    Registered(StateIdx),
    /// A caller-supplied state outside the graph. Its successors are resolved
    /// against the graph on first use and kept here.
    Synthetic {
        state: Arc<StateDefinition>,
        next: Option<Arc<[StateIdx]>>,
    },
}

struct Cursor {
    /// `None` until the first operation places the cursor on the start state.
    position: Option<Position>,
    history: Vec<Arc<StateDefinition>>,
    transferring: bool,
}

/// Clears the in-transfer flag when a transfer finishes or unwinds.
struct TransferScope<'a>(&'a RefCell<Cursor>);

impl Drop for TransferScope<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().transferring = false;
    }
}

/// A traversal handle over a shared [`Graph`].
pub struct Automaton {
    graph: Arc<Graph>,
    hooks: Arc<HookRegistry>,
    cursor: ReentrantMutex<RefCell<Cursor>>,
}

impl fmt::Debug for Automaton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automaton")
            .field("current", &self.current().id)
            .field("circulation", &self.circulation_ids())
            .finish()
    }
}

impl Automaton {
    /// Creates an automaton positioned at the graph's start state.
    pub fn new(graph: Arc<Graph>, hooks: Arc<HookRegistry>) -> Self {
        Self::from_parts(graph, hooks, None, Vec::new())
    }

    /// Creates an automaton positioned at a state that is not part of the
    /// graph. Its successors are looked up in the graph like any other
    /// state's; identifiers the graph does not contain are ignored.
    pub fn with_state(graph: Arc<Graph>, hooks: Arc<HookRegistry>, state: StateDefinition) -> Self {
        Self::from_parts(graph, hooks, Some(synthetic(state)), Vec::new())
    }

    /// Restarts a traversal at `state` with previously recorded history.
    pub fn resume(
        graph: Arc<Graph>,
        hooks: Arc<HookRegistry>,
        state: StateDefinition,
        history: Vec<StateDefinition>,
    ) -> Self {
        let history = history.into_iter().map(Arc::new).collect();
        Self::from_parts(graph, hooks, Some(synthetic(state)), history)
    }

    fn from_parts(
        graph: Arc<Graph>,
        hooks: Arc<HookRegistry>,
        position: Option<Position>,
        history: Vec<Arc<StateDefinition>>,
    ) -> Self {
        Self {
            graph,
            hooks,
            cursor: ReentrantMutex::new(RefCell::new(Cursor {
                position,
                history,
                transferring: false,
            })),
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Returns the current state and its resolved successors, placing the
    /// cursor on the start state if it has not been placed yet.
    fn expand(&self, cursor: &mut Cursor) -> (Arc<StateDefinition>, Arc<[StateIdx]>) {
        let position = cursor
            .position
            .get_or_insert(Position::Registered(self.graph.start_idx()));

        match position {
            Position::Registered(idx) => (
                self.graph.state(*idx).clone(),
                self.graph.successors(*idx),
            ),
            Position::Synthetic { state, next } => {
                let next = next
                    .get_or_insert_with(|| self.graph.resolve(&state.next))
                    .clone();
                (state.clone(), next)
            }
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> Arc<StateDefinition> {
        let guard = self.cursor.lock();
        let mut cursor = guard.borrow_mut();
        self.expand(&mut cursor).0
    }

    /// Returns the states reachable from the current state. Empty at a final
    /// state.
    pub fn peek(&self) -> NextStates {
        let guard = self.cursor.lock();
        let mut cursor = guard.borrow_mut();
        let (_, next) = self.expand(&mut cursor);

        NextStates {
            states: next.iter().map(|idx| self.graph.state(*idx).clone()).collect(),
        }
    }

    /// Moves to `target` if it is a successor of the current state.
    ///
    /// Returns `false`, with no hooks run and no history recorded, when it is
    /// not, or when called from a hook of a transfer already running on this
    /// automaton.
    pub fn transfer(&self, target: &str) -> bool {
        let guard = self.cursor.lock();

        let (from, to) = {
            let mut cursor = guard.borrow_mut();
            if cursor.transferring {
                tracing::warn!(
                    "transfer to '{}' refused: a transfer is already running on this automaton",
                    target
                );
                return false;
            }

            let (from, next) = self.expand(&mut cursor);
            let to = match self.graph.index_of(target) {
                Some(idx) if next.contains(&idx) => idx,
                _ => {
                    tracing::trace!("no transition from '{}' to '{}'", from.id, target);
                    return false;
                }
            };

            cursor.transferring = true;
            (from, to)
        };
        let _scope = TransferScope(&*guard);

        self.run_hooks("after", &from.after_call);

        let arrived = self.graph.state(to).clone();
        {
            let mut cursor = guard.borrow_mut();
            cursor.history.push(from.clone());
            cursor.position = Some(Position::Registered(to));
        }
        tracing::debug!("transfer '{}' -> '{}'", from.id, arrived.id);

        self.run_hooks("before", &arrived.before_call);

        if arrived.final_state {
            guard.borrow_mut().history.push(arrived);
        }

        true
    }

    fn run_hooks(&self, phase: &str, names: &[String]) {
        for name in names.iter().rev() {
            match self.hooks.get(name) {
                Some(hook) => {
                    tracing::trace!("running {} hook '{}'", phase, name);
                    hook(self);
                }
                None => tracing::debug!("{} hook '{}' not registered, skipping", phase, name),
            }
        }
    }

    /// Returns true if the current state is final.
    pub fn is_final_state(&self) -> bool {
        self.current().final_state
    }

    /// Returns copies of every state visited so far, in visiting order.
    pub fn circulation(&self) -> Vec<StateDefinition> {
        let guard = self.cursor.lock();
        let cursor = guard.borrow();
        cursor.history.iter().map(|def| def.as_ref().clone()).collect()
    }

    /// Identifiers of every state visited so far.
    pub fn circulation_ids(&self) -> Vec<String> {
        let guard = self.cursor.lock();
        let cursor = guard.borrow();
        cursor.history.iter().map(|def| def.id.clone()).collect()
    }
}

fn synthetic(state: StateDefinition) -> Position {
    Position::Synthetic {
        state: Arc::new(state),
        next: None,
    }
}
