use std::fmt;
use tracing::{debug, warn};
use crate::core::error::Error;
use crate::core::types::VariableId;
use crate::query::ast::Expression;
use crate::query::types::{
    ClauseClassification, CursorPolicy, DependencyClass, VariableScope, VariableSet,
};

/// Expression shapes a search clause cannot execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationError {
    /// The expression reads the variable of the loop it filters
    SelfReference { variable: VariableId },
    /// The expression reads a variable that is not bound yet at this point
    ForwardReference { variable: VariableId },
}

impl fmt::Display for ClassificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClassificationError::SelfReference { variable } => write!(
                f,
                "Search expression references its own loop variable {}",
                variable
            ),
            ClassificationError::ForwardReference { variable } => write!(
                f,
                "Search expression references variable {} which is not bound by an enclosing loop",
                variable
            ),
        }
    }
}

impl std::error::Error for ClassificationError {}

impl From<ClassificationError> for Error {
    fn from(err: ClassificationError) -> Self {
        match err {
            ClassificationError::SelfReference { .. } => Error::not_implemented(err.to_string()),
            ClassificationError::ForwardReference { .. } => Error::bad_parameter(err.to_string()),
        }
    }
}

/// Decides how `expr` depends on the loops enclosing the search at `own_level`.
///
/// Non-determinism wins over everything else. Otherwise the innermost enclosing
/// loop that the expression reads decides the class; query constants and
/// variables of no loop at all are ignored and rejected respectively.
pub fn classify(
    expr: &dyn Expression,
    vars: &VariableSet,
    own_level: usize,
) -> Result<DependencyClass, ClassificationError> {
    if !expr.is_deterministic() {
        return Ok(DependencyClass::NonDeterministic);
    }

    let mut innermost: Option<usize> = None;
    for variable in expr.free_variables() {
        match vars.scope_of(variable) {
            Some(VariableScope::Constant) => {}
            Some(VariableScope::Loop(level)) if level == own_level => {
                return Err(ClassificationError::SelfReference { variable });
            }
            Some(VariableScope::Loop(level)) if level < own_level => {
                innermost = Some(innermost.map_or(level, |current| current.max(level)));
            }
            Some(VariableScope::Loop(_)) | None => {
                return Err(ClassificationError::ForwardReference { variable });
            }
        }
    }

    Ok(innermost.map_or(DependencyClass::Invariant, DependencyClass::LoopBound))
}

/// Enclosing-loop variables read by `expr`; their write generations drive resets
pub fn loop_dependencies(expr: &dyn Expression, vars: &VariableSet, own_level: usize) -> Vec<VariableId> {
    expr.free_variables()
        .into_iter()
        .filter(|v| matches!(vars.scope_of(*v), Some(VariableScope::Loop(level)) if level < own_level))
        .collect()
}

/// Classifies the filter and the scorer arguments of one search clause.
///
/// A clause outside of any loop or sub-query runs once per query, so it gets
/// [`CursorPolicy::BuildOnce`] whatever its classes are.
pub fn classify_clause(
    filter: &dyn Expression,
    scorer_args: &[&dyn Expression],
    vars: &VariableSet,
    own_level: usize,
    in_subquery: bool,
) -> Result<ClauseClassification, ClassificationError> {
    let filter_class = classify(filter, vars, own_level).inspect_err(|err| {
        warn!(error = %err, "search filter cannot be classified");
    })?;

    let mut sort_class = DependencyClass::Invariant;
    let mut dependencies = loop_dependencies(filter, vars, own_level);
    for arg in scorer_args {
        let class = classify(*arg, vars, own_level).inspect_err(|err| {
            warn!(error = %err, "scorer argument cannot be classified");
        })?;
        sort_class = sort_class.strongest(class);
        for var in loop_dependencies(*arg, vars, own_level) {
            if !dependencies.contains(&var) {
                dependencies.push(var);
            }
        }
    }

    let in_dependent_scope = own_level > 0 || in_subquery;
    let policy = if in_dependent_scope {
        CursorPolicy::from(filter_class.strongest(sort_class))
    } else {
        CursorPolicy::BuildOnce
    };

    debug!(
        filter = ?filter_class,
        sort = ?sort_class,
        in_dependent_scope,
        ?policy,
        "search clause classified"
    );

    Ok(ClauseClassification {
        filter: filter_class,
        sort: sort_class,
        in_dependent_scope,
        dependencies,
        policy,
    })
}
