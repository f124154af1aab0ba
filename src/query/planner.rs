use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use crate::core::context::Bindings;
use crate::core::error::{Error, Result};
use crate::core::types::{FieldValue, VariableId};
use crate::query::ast::{Expr, Expression};
use crate::query::classifier;
use crate::query::matcher::Scope;
use crate::query::types::{ClauseClassification, DependencyClass, VariableSet};
use crate::scoring::order::Order;
use crate::scoring::registry::ScorerRegistry;

static CLAUSE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClauseId(pub u64);

impl ClauseId {
    pub fn next() -> Self {
        ClauseId(CLAUSE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Scorer invocation of a search clause; the searched document is implicit
#[derive(Debug, Clone)]
pub struct ScorerCall {
    pub name: String,
    pub args: Vec<Expr>,
}

impl ScorerCall {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        ScorerCall { name: name.into(), args }
    }
}

/// A search over the index nested somewhere in a query
#[derive(Debug, Clone)]
pub struct SearchClause {
    pub filter: Arc<dyn Expression>,
    pub scorers: Vec<ScorerCall>,
    /// Nesting level of the search's own loop within the variable set
    pub own_level: usize,
    /// Search sits in a sub-query re-run per outer row
    pub in_subquery: bool,
}

impl SearchClause {
    pub fn new(filter: impl Expression + 'static, own_level: usize) -> Self {
        SearchClause {
            filter: Arc::new(filter),
            scorers: Vec::new(),
            own_level,
            in_subquery: false,
        }
    }

    pub fn with_scorer(mut self, scorer: ScorerCall) -> Self {
        self.scorers.push(scorer);
        self
    }

    pub fn in_subquery(mut self) -> Self {
        self.in_subquery = true;
        self
    }
}

/// Validated and classified search clause
#[derive(Debug, Clone)]
pub struct SearchPlan {
    pub id: ClauseId,
    pub filter: Arc<dyn Expression>,
    pub scorers: Vec<ScorerCall>,
    pub classification: ClauseClassification,
    registry: Arc<ScorerRegistry>,
}

impl SearchPlan {
    /// True when scorer arguments differ between outer steps
    pub fn has_volatile_order(&self) -> bool {
        self.classification.sort != DependencyClass::Invariant
    }

    /// Instantiates the scorers with argument values from `bindings`
    pub fn build_order(&self, bindings: &Bindings) -> Result<Option<Order>> {
        if self.scorers.is_empty() {
            return Ok(None);
        }
        let scope = Scope::new(bindings);
        let mut order = Order::new();
        for call in &self.scorers {
            let args = call.args
                .iter()
                .map(|arg| arg.evaluate(&scope))
                .collect::<Result<Vec<FieldValue>>>()?;
            order.push(self.registry.create(&call.name, &args)?);
        }
        Ok(Some(order))
    }
}

/// Classifies search clauses against the loops around them
pub struct SearchPlanner {
    registry: Arc<ScorerRegistry>,
}

impl SearchPlanner {
    pub fn new(registry: Arc<ScorerRegistry>) -> Self {
        SearchPlanner { registry }
    }

    /// Checks scorer names and constant arguments, then classifies the clause.
    ///
    /// # Errors
    ///
    /// `NotImplemented` when the filter or a scorer argument reads the search's
    /// own variable, `BadParameter` for unknown scorers, bad constant scorer
    /// arguments and unbound variables.
    pub fn plan(&self, clause: SearchClause, vars: &VariableSet) -> Result<SearchPlan> {
        for call in &clause.scorers {
            let factory = self.registry.get(&call.name)?;
            let constants: Option<Vec<FieldValue>> = call.args.iter().map(|a| a.as_constant()).collect();
            if let Some(args) = constants {
                factory(&args)?;
            }
        }

        let own_variables: Vec<VariableId> = vars
            .level(clause.own_level)
            .map(<[VariableId]>::to_vec)
            .ok_or_else(|| {
                Error::bad_parameter(format!("No loop at nesting level {}", clause.own_level))
            })?;

        let args: Vec<&dyn Expression> = clause.scorers
            .iter()
            .flat_map(|call| call.args.iter().map(|arg| arg as &dyn Expression))
            .collect();
        let classification = classifier::classify_clause(
            clause.filter.as_ref(),
            &args,
            vars,
            clause.own_level,
            clause.in_subquery,
        )?;

        let id = ClauseId::next();
        debug!(
            clause = id.0,
            own_variables = ?own_variables,
            policy = ?classification.policy,
            "search clause planned"
        );

        Ok(SearchPlan {
            id,
            filter: clause.filter,
            scorers: clause.scorers,
            classification,
            registry: Arc::clone(&self.registry),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::query::types::CursorPolicy;

    fn planner() -> SearchPlanner {
        SearchPlanner::new(Arc::new(ScorerRegistry::with_defaults()))
    }

    #[test]
    fn test_scorer_reading_own_variable_rejected() {
        let (outer, d) = (VariableId(1), VariableId(2));
        let vars = VariableSet::new().with_level([outer]).with_level([d]);
        let clause = SearchClause::new(Expr::eq(Expr::field("x"), Expr::var(outer)), 1)
            .with_scorer(ScorerCall::new("bm25", vec![Expr::attribute(d, "k1")]));

        let err = planner().plan(clause, &vars).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotImplemented);
    }

    #[test]
    fn test_unknown_scorer_rejected() {
        let vars = VariableSet::new().with_level([VariableId(1)]);
        let clause = SearchClause::new(Expr::lit(true), 0)
            .with_scorer(ScorerCall::new("nope", vec![]));
        assert_eq!(planner().plan(clause, &vars).unwrap_err().kind, ErrorKind::BadParameter);
    }

    #[test]
    fn test_loop_bound_scorer_arguments() {
        let (outer, d) = (VariableId(1), VariableId(2));
        let vars = VariableSet::new().with_level([outer]).with_level([d]);
        let clause = SearchClause::new(Expr::eq(Expr::field("x"), Expr::lit(1i64)), 1)
            .with_scorer(ScorerCall::new("bm25", vec![Expr::var(outer)]));

        let plan = planner().plan(clause, &vars).unwrap();
        assert!(plan.has_volatile_order());
        assert_eq!(plan.classification.policy, CursorPolicy::ResetOnOuterStep);

        let order = plan.build_order(&Bindings::new().with(outer, 0.9)).unwrap().unwrap();
        assert_eq!(order.len(), 1);
    }
}
