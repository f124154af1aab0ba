use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;
use crate::core::types::{FieldValue, VariableId};

/// Session ID generator
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Transaction/session handle a query executes under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
}

impl Session {
    pub fn begin() -> Self {
        Session {
            id: SESSION_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }
}

/// What a loop-bound clause's results were computed from: the session and,
/// per dependency, the generation of its binding (None while unbound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyKey {
    pub session: Option<u64>,
    pub generations: Vec<Option<u64>>,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: FieldValue,
    pub generation: u64,    // Context generation at which the value was written
}

/// Current values of query variables
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<VariableId, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: VariableId) -> Option<&FieldValue> {
        self.values.get(&var).map(|b| &b.value)
    }

    pub fn binding(&self, var: VariableId) -> Option<&Binding> {
        self.values.get(&var)
    }

    pub fn contains(&self, var: VariableId) -> bool {
        self.values.contains_key(&var)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builder used for evaluating constant-only or test expressions
    pub fn with(mut self, var: VariableId, value: impl Into<FieldValue>) -> Self {
        self.values.insert(var, Binding { value: value.into(), generation: 0 });
        self
    }
}

/// State shared between the driving loop and the filters reading it
#[derive(Debug, Default)]
pub struct ContextState {
    session: Option<Arc<Session>>,
    bindings: Bindings,
    generation: u64,
}

impl ContextState {
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dependency_key(&self, vars: &[VariableId]) -> DependencyKey {
        DependencyKey {
            session: self.session.as_ref().map(|s| s.id),
            generations: vars
                .iter()
                .map(|v| self.bindings.binding(*v).map(|b| b.generation))
                .collect(),
        }
    }
}

/// Write side of an execution context, owned by the driving loop.
///
/// Filters and iterators never see this type; they hold a [`ContextReader`]
/// obtained from [`ExecutionContext::reader`], which only exposes shared reads.
#[derive(Debug)]
pub struct ExecutionContext {
    state: Arc<RwLock<ContextState>>,
}

impl ExecutionContext {
    pub fn new(session: Option<Session>) -> Self {
        ExecutionContext {
            state: Arc::new(RwLock::new(ContextState {
                session: session.map(Arc::new),
                bindings: Bindings::new(),
                generation: 0,
            })),
        }
    }

    /// Context with a fresh session
    pub fn with_session() -> Self {
        Self::new(Some(Session::begin()))
    }

    pub fn reader(&self) -> ContextReader {
        ContextReader { state: Arc::clone(&self.state) }
    }

    pub fn set(&self, var: VariableId, value: impl Into<FieldValue>) {
        let mut state = self.state.write();
        state.generation += 1;
        let generation = state.generation;
        state.bindings.values.insert(var, Binding { value: value.into(), generation });
    }

    pub fn unset(&self, var: VariableId) {
        let mut state = self.state.write();
        if state.bindings.values.remove(&var).is_some() {
            state.generation += 1;
        }
    }

    pub fn set_session(&self, session: Session) {
        let mut state = self.state.write();
        debug!(session_id = session.id, "execution context session attached");
        state.session = Some(Arc::new(session));
        state.generation += 1;
    }

    pub fn clear_session(&self) {
        let mut state = self.state.write();
        debug!("execution context session cleared");
        state.session = None;
        state.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn get(&self, var: VariableId) -> Option<FieldValue> {
        self.state.read().bindings.get(var).cloned()
    }
}

/// Read-only handle to an execution context
#[derive(Debug, Clone)]
pub struct ContextReader {
    state: Arc<RwLock<ContextState>>,
}

impl ContextReader {
    pub fn read(&self) -> RwLockReadGuard<'_, ContextState> {
        self.state.read()
    }

    pub fn has_session(&self) -> bool {
        self.state.read().has_session()
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn dependency_key(&self, vars: &[VariableId]) -> DependencyKey {
        self.state.read().dependency_key(vars)
    }

    /// True when both handles observe the same context
    pub fn same_context(&self, other: &ContextReader) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
