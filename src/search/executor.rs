use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use crate::core::config::Config;
use crate::core::context::{DependencyKey, ExecutionContext};
use crate::core::error::Result;
use crate::index::index_reader::IndexReader;
use crate::query::cache::FilterCache;
use crate::query::planner::SearchPlan;
use crate::query::types::CursorPolicy;
use crate::scoring::order::PreparedOrder;
use crate::search::filter::{Filter, FilterCompiler, SearchOptions};
use crate::search::results::{ScoredDocument, SearchResults, TopKCollector};

/// Counters of the work done across outer steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub steps: u64,
    pub compilations: u64,
    pub iterators: u64,         // Document iterators constructed, one per segment per run
    pub resets: u64,            // Runs that reused a compiled filter with fresh iterators
    pub replays: u64,           // Steps answered from the previous run's results
    pub order_preparations: u64,
}

/// Drives a planned search clause once per step of the loops around it.
///
/// The cursor policy of the plan decides what survives between steps:
/// results (build once), the compiled filter (reset) or nothing (rebuild).
pub struct SearchExecutor {
    plan: Arc<SearchPlan>,
    index: IndexReader,
    compiler: FilterCompiler,
    options: SearchOptions,
    cache: Option<Arc<FilterCache>>,
    limit: usize,
    filter: Option<Filter>,
    order: Option<PreparedOrder>,
    materialized: Option<(DependencyKey, SearchResults)>,
    stats: ExecutionStats,
}

impl SearchExecutor {
    pub fn new(plan: Arc<SearchPlan>, index: IndexReader, config: &Config) -> Self {
        SearchExecutor {
            plan,
            index,
            compiler: FilterCompiler::new(config),
            options: SearchOptions::from(config),
            cache: None,
            limit: usize::MAX,
            filter: None,
            order: None,
            materialized: None,
            stats: ExecutionStats::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<FilterCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Search options overriding the configured ones; their order applies to
    /// plans that carry no scorers of their own
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn policy(&self) -> CursorPolicy {
        self.plan.classification.policy
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    /// Runs the clause against the current bindings of `context`
    pub fn execute_step(&mut self, context: &ExecutionContext) -> Result<SearchResults> {
        let start = Instant::now();
        self.stats.steps += 1;

        match self.policy() {
            CursorPolicy::BuildOnce => {
                let key = context.reader().dependency_key(&[]);
                if let Some(results) = self.replay(&key) {
                    return Ok(results);
                }
                let filter = self.kept_filter(context)?;
                if self.order.is_none() {
                    self.order = self.prepare_order(context, &filter)?;
                }
                let results = self.run(&filter, context, start);
                self.materialize(key, &results);
                Ok(results)
            }

            CursorPolicy::ResetOnOuterStep => {
                let key = context
                    .reader()
                    .dependency_key(&self.plan.classification.dependencies);
                if let Some(results) = self.replay(&key) {
                    return Ok(results);
                }

                if self.filter.is_some() {
                    self.stats.resets += 1;
                    debug!(clause = self.plan.id.0, session = ?key.session, "outer bindings changed, resetting iterators");
                }
                let filter = self.kept_filter(context)?;
                if self.order.is_none() || self.plan.has_volatile_order() {
                    self.order = self.prepare_order(context, &filter)?;
                }

                let results = self.run(&filter, context, start);
                self.materialize(key, &results);
                Ok(results)
            }

            CursorPolicy::RebuildOnOuterStep => {
                let filter = self.compile(context)?;
                debug!(clause = self.plan.id.0, "volatile search clause rebuilt");
                if self.order.is_none() || self.plan.has_volatile_order() {
                    self.order = self.prepare_order(context, &filter)?;
                }
                Ok(self.run(&filter, context, start))
            }
        }
    }

    /// Previous results, if they were computed under a session from the same bindings
    fn replay(&mut self, key: &DependencyKey) -> Option<SearchResults> {
        match &self.materialized {
            Some((last, results)) if key.session.is_some() && last == key => {
                self.stats.replays += 1;
                Some(results.clone())
            }
            _ => None,
        }
    }

    /// Results produced without a session are never kept
    fn materialize(&mut self, key: DependencyKey, results: &SearchResults) {
        self.materialized = key.session.is_some().then(|| (key, results.clone()));
    }

    /// Filter compiled on the first step and kept for the following ones
    fn kept_filter(&mut self, context: &ExecutionContext) -> Result<Filter> {
        if let Some(filter) = &self.filter {
            return Ok(filter.clone());
        }

        let cached = self.cache.as_ref().and_then(|cache| cache.get(self.plan.id));
        let unbound = match cached {
            Some(filter) => filter,
            None => {
                let filter = self.compiler.compile(Arc::clone(&self.plan.filter), self.options.boost, None)?;
                self.stats.compilations += 1;
                if let Some(cache) = &self.cache {
                    cache.put(self.plan.id, filter.clone());
                }
                filter
            }
        };

        let filter = unbound.bind(context);
        self.filter = Some(filter.clone());
        Ok(filter)
    }

    fn compile(&mut self, context: &ExecutionContext) -> Result<Filter> {
        let filter = self.compiler.compile_with(Arc::clone(&self.plan.filter), &self.options, Some(context))?;
        self.stats.compilations += 1;
        Ok(if filter.is_bound() { filter } else { filter.bind(context) })
    }

    fn prepare_order(&mut self, context: &ExecutionContext, filter: &Filter) -> Result<Option<PreparedOrder>> {
        let reader = context.reader();
        let order = {
            let state = reader.read();
            self.plan.build_order(state.bindings())?
        };
        let order = order.or_else(|| self.options.order.clone());
        let Some(order) = order else { return Ok(None) };

        let mut collector = order.prepare();
        collector.collect_index(&self.index, filter.terms());
        self.stats.order_preparations += 1;
        Ok(Some(collector.finish()))
    }

    fn run(&mut self, filter: &Filter, context: &ExecutionContext, start: Instant) -> SearchResults {
        let reader = context.reader();
        let order = self.order.clone();
        let mut collector = TopKCollector::new(self.limit, order.as_ref());

        for segment in self.index.segments() {
            let mut iterator = filter.execute(segment, order.as_ref(), Some(&reader));
            self.stats.iterators += 1;
            while iterator.advance() {
                let Some(doc_id) = iterator.value().doc() else { break };
                let score = iterator.score().map(<[u8]>::to_vec).unwrap_or_default();
                collector.collect(ScoredDocument {
                    segment: segment.id,
                    doc_id,
                    score,
                });
            }
        }

        collector.into_results(start.elapsed().as_millis() as u64)
    }
}
