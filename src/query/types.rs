use crate::core::types::VariableId;

/// Where a variable gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    /// Bound once per query outside of every loop (LET at top level, bind parameter)
    Constant,
    /// Bound by the loop at this nesting level, 0 = outermost
    Loop(usize),
}

/// Variables bound by each loop enclosing a search clause, outermost first
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    constants: Vec<VariableId>,
    levels: Vec<Vec<VariableId>>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constants(mut self, vars: impl IntoIterator<Item = VariableId>) -> Self {
        self.constants.extend(vars);
        self
    }

    /// Adds the next inner loop level and returns its index
    pub fn push_level(&mut self, vars: impl IntoIterator<Item = VariableId>) -> usize {
        self.levels.push(vars.into_iter().collect());
        self.levels.len() - 1
    }

    pub fn with_level(mut self, vars: impl IntoIterator<Item = VariableId>) -> Self {
        self.push_level(vars);
        self
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> Option<&[VariableId]> {
        self.levels.get(index).map(Vec::as_slice)
    }

    pub fn scope_of(&self, var: VariableId) -> Option<VariableScope> {
        if self.constants.contains(&var) {
            return Some(VariableScope::Constant);
        }
        self.levels
            .iter()
            .position(|level| level.contains(&var))
            .map(VariableScope::Loop)
    }
}

/// How a search expression depends on the loops around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyClass {
    /// Same result on every outer step
    Invariant,
    /// Reads variables of enclosing loops; the level is the innermost one referenced
    LoopBound(usize),
    /// May change without any binding changing
    NonDeterministic,
}

impl DependencyClass {
    fn rank(&self) -> (u8, usize) {
        match self {
            DependencyClass::Invariant => (0, 0),
            DependencyClass::LoopBound(level) => (1, *level),
            DependencyClass::NonDeterministic => (2, 0),
        }
    }

    /// The class requiring the more frequent cursor rebuilds
    pub fn strongest(self, other: DependencyClass) -> DependencyClass {
        if other.rank() > self.rank() { other } else { self }
    }
}

/// Cursor lifecycle chosen for a search clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPolicy {
    /// Compile and iterate once per query, replay for every outer step
    BuildOnce,
    /// Keep the compiled filter, restart the iterator when bound values change
    ResetOnOuterStep,
    /// Compile a fresh filter and iterator on every outer step
    RebuildOnOuterStep,
}

impl From<DependencyClass> for CursorPolicy {
    fn from(class: DependencyClass) -> Self {
        match class {
            DependencyClass::Invariant => CursorPolicy::BuildOnce,
            DependencyClass::LoopBound(_) => CursorPolicy::ResetOnOuterStep,
            DependencyClass::NonDeterministic => CursorPolicy::RebuildOnOuterStep,
        }
    }
}

/// Outcome of classifying a whole search clause (filter plus scorers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseClassification {
    pub filter: DependencyClass,
    pub sort: DependencyClass,
    /// Clause sits inside a loop or sub-query; otherwise it runs once anyway
    pub in_dependent_scope: bool,
    /// Loop variables whose value changes force a reset
    pub dependencies: Vec<VariableId>,
    pub policy: CursorPolicy,
}
