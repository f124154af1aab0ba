use std::fmt;
use std::sync::Arc;
use tracing::debug;
use crate::core::config::Config;
use crate::core::context::{ContextReader, ExecutionContext};
use crate::core::error::{Error, Result};
use crate::query::ast::Expression;
use crate::query::validator::{ExpressionValidator, ValidationConfig};
use crate::scoring::order::{Order, PreparedOrder};
use crate::search::iterator::{DocumentIterator, Matcher};
use crate::storage::segment::Segment;

/// Shape of a compiled filter
#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Expression folded to a truthy constant
    MatchAll,
    /// Expression folded to a falsy constant
    MatchNone,
    /// Evaluated per document against the bound context
    Expression(Arc<dyn Expression>),
}

/// Where a filter reads variable bindings from
#[derive(Debug, Clone)]
pub enum ContextBinding {
    Unbound,
    Bound(ContextReader),
}

/// What iterators of a filter can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterFeatures {
    pub scores: bool,
}

/// Options passed alongside an expression when searching
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub boost: f32,
    pub order: Option<Order>,
    pub deferred_binding: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions::from(&Config::default())
    }
}

impl From<&Config> for SearchOptions {
    fn from(config: &Config) -> Self {
        SearchOptions {
            boost: config.default_boost,
            order: None,
            deferred_binding: config.deferred_binding,
        }
    }
}

impl SearchOptions {
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// Compiled, immutable form of a search expression.
///
/// Cloning is cheap. Binding produces a new filter and leaves the original
/// untouched, so one compiled filter can serve several contexts.
#[derive(Clone)]
pub struct Filter {
    kind: FilterKind,
    boost: f32,
    weight: f32,    // Factor of a BOOST wrapper around the expression
    terms: Arc<Vec<(String, String)>>,
    binding: ContextBinding,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Filter")
            .field("kind", &self.kind)
            .field("boost", &self.boost)
            .field("weight", &self.weight)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl Filter {
    /// The segment-wide baseline that returns every live document
    pub fn match_all() -> Self {
        Self::from_kind(FilterKind::MatchAll, 1.0)
    }

    pub fn match_none() -> Self {
        Self::from_kind(FilterKind::MatchNone, 1.0)
    }

    fn from_kind(kind: FilterKind, boost: f32) -> Self {
        Filter {
            kind,
            boost,
            weight: 1.0,
            terms: Arc::new(Vec::new()),
            binding: ContextBinding::Unbound,
        }
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    /// Boost the filter was compiled with
    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Factor contributed by a BOOST wrapper, 1.0 without one
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Boost handed to iterators and score functions
    pub fn scoring_boost(&self) -> f32 {
        self.boost * self.weight
    }

    /// (field, term) pairs fed to scorer statistics
    pub fn terms(&self) -> &[(String, String)] {
        &self.terms
    }

    pub fn features(&self) -> FilterFeatures {
        FilterFeatures {
            scores: !matches!(self.kind, FilterKind::MatchNone),
        }
    }

    pub fn binding(&self) -> &ContextBinding {
        &self.binding
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.binding, ContextBinding::Bound(_))
    }

    /// Same filter reading bindings from `context`
    pub fn bind(&self, context: &ExecutionContext) -> Filter {
        self.bind_reader(context.reader())
    }

    pub fn bind_reader(&self, reader: ContextReader) -> Filter {
        Filter {
            binding: ContextBinding::Bound(reader),
            ..self.clone()
        }
    }

    /// Iterator over the matches of this filter in `segment`.
    ///
    /// `context` overrides the bound context. An expression filter without
    /// any context, or a context without a session, yields no documents.
    pub fn execute(
        &self,
        segment: &Arc<Segment>,
        order: Option<&PreparedOrder>,
        context: Option<&ContextReader>,
    ) -> DocumentIterator {
        let context = context.cloned().or_else(|| match &self.binding {
            ContextBinding::Bound(reader) => Some(reader.clone()),
            ContextBinding::Unbound => None,
        });

        let (matcher, cost) = match &self.kind {
            FilterKind::MatchNone => (Matcher::None, 0),
            FilterKind::MatchAll => (Matcher::All, segment.live_doc_count()),
            FilterKind::Expression(expr) if context.is_some() => {
                (Matcher::Expression(Arc::clone(expr)), segment.live_doc_count())
            }
            FilterKind::Expression(_) => (Matcher::None, 0),
        };

        let boost = self.scoring_boost();
        let scorer = match (&self.kind, order) {
            (FilterKind::MatchNone, _) | (_, None) => None,
            (_, Some(order)) => Some((order.prepare_segment(segment, boost), order.score_size())),
        };

        DocumentIterator::new(Arc::clone(segment), matcher, context, cost, boost, scorer)
    }
}

/// Turns expressions into filters.
pub struct FilterCompiler {
    validator: ExpressionValidator,
}

impl Default for FilterCompiler {
    fn default() -> Self {
        FilterCompiler::new(&Config::default())
    }
}

impl FilterCompiler {
    pub fn new(config: &Config) -> Self {
        FilterCompiler {
            validator: ExpressionValidator::new(ValidationConfig::from(config)),
        }
    }

    /// Validates `expr`, folds constants and records the boost.
    ///
    /// `boost` is kept as given; a BOOST wrapper of the expression is kept as
    /// the filter's weight and both multiply the scores. A constant expression
    /// never needs `context`.
    pub fn compile(
        &self,
        expr: Arc<dyn Expression>,
        boost: f32,
        context: Option<&ExecutionContext>,
    ) -> Result<Filter> {
        if !boost.is_finite() || boost < 0.0 {
            return Err(Error::bad_parameter(format!("Boost must be a non-negative number, got {boost}")));
        }
        self.validator.validate(expr.as_ref())?;
        let weight = expr.boost()?;

        let kind = match expr.as_constant() {
            Some(value) if value.is_truthy() => {
                debug!(boost, weight, "search expression folded to match-all");
                FilterKind::MatchAll
            }
            Some(_) => {
                debug!("search expression folded to match-none");
                FilterKind::MatchNone
            }
            None => {
                debug!(boost, weight, variables = expr.free_variables().len(), "compiled expression filter");
                FilterKind::Expression(Arc::clone(&expr))
            }
        };

        let terms = match &kind {
            FilterKind::Expression(_) => expr.terms(),
            _ => Vec::new(),
        };

        Ok(Filter {
            kind,
            boost,
            weight,
            terms: Arc::new(terms),
            binding: context.map_or(ContextBinding::Unbound, |c| ContextBinding::Bound(c.reader())),
        })
    }

    /// Compiles with options; with deferred binding the context is ignored
    /// until [`Filter::bind`] is called.
    pub fn compile_with(
        &self,
        expr: Arc<dyn Expression>,
        options: &SearchOptions,
        context: Option<&ExecutionContext>,
    ) -> Result<Filter> {
        let context = if options.deferred_binding { None } else { context };
        self.compile(expr, options.boost, context)
    }
}

/// Compiles with default limits
pub fn compile(expr: Arc<dyn Expression>, boost: f32, context: Option<&ExecutionContext>) -> Result<Filter> {
    FilterCompiler::default().compile(expr, boost, context)
}
