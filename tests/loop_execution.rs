use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use serde_json::json;
use searchlink::core::config::Config;
use searchlink::core::context::{ExecutionContext, Session};
use searchlink::core::error::ErrorKind;
use searchlink::core::types::{DocId, FieldValue, VariableId};
use searchlink::index::index_reader::IndexReader;
use searchlink::query::ast::{Expr, Function};
use searchlink::query::cache::FilterCache;
use searchlink::query::planner::{ScorerCall, SearchClause, SearchPlanner};
use searchlink::query::types::{CursorPolicy, DependencyClass, VariableSet};
use searchlink::scoring::order::Order;
use searchlink::scoring::registry::ScorerRegistry;
use searchlink::scoring::scorer::{Bm25Scorer, ScoreFn, Scorer, ScorerStats};
use searchlink::search::executor::SearchExecutor;
use searchlink::search::filter::SearchOptions;
use searchlink::storage::segment::Segment;

const OUTER: VariableId = VariableId(1);
const INNER: VariableId = VariableId(2);
const DOC: VariableId = VariableId(3);

fn index(segments: &[u64]) -> IndexReader {
    let mut reader = IndexReader::default();
    let mut seq = 0u64;
    for &count in segments {
        let mut builder = Segment::builder();
        for _ in 0..count {
            builder.add_json(json!({"seq": seq, "body": format!("item {}", seq)}));
            seq += 1;
        }
        reader.add_segment(Arc::new(builder.build()));
    }
    reader
}

fn two_loops() -> VariableSet {
    VariableSet::new().with_level([OUTER]).with_level([INNER]).with_level([DOC])
}

fn planner(registry: ScorerRegistry) -> SearchPlanner {
    SearchPlanner::new(Arc::new(registry))
}

#[test]
fn test_invariant_clause_compiles_once() {
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(Expr::lt(Expr::field("seq"), Expr::lit(3i64)), 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.filter, DependencyClass::Invariant);
    assert_eq!(plan.classification.policy, CursorPolicy::BuildOnce);

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[5]), &Config::default());
    for outer in 0..4i64 {
        ctx.set(OUTER, outer);
        let results = executor.execute_step(&ctx).unwrap();
        assert_eq!(results.doc_ids(), vec![DocId(0), DocId(1), DocId(2)]);
    }

    let stats = executor.stats();
    assert_eq!(stats.steps, 4);
    assert_eq!(stats.compilations, 1);
    assert_eq!(stats.iterators, 1);
    assert_eq!(stats.replays, 3);
}

#[test]
fn test_loop_bound_clause_resets_per_binding() {
    // seq == c && c == b, with c and b bound by the two enclosing loops
    let filter = Expr::and(vec![
        Expr::eq(Expr::field("seq"), Expr::var(OUTER)),
        Expr::eq(Expr::var(OUTER), Expr::var(INNER)),
    ]);
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.filter, DependencyClass::LoopBound(1));
    assert_eq!(plan.classification.policy, CursorPolicy::ResetOnOuterStep);

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[4, 4]), &Config::default());
    for c in 0..3i64 {
        ctx.set(OUTER, c);
        for b in 0..3i64 {
            ctx.set(INNER, b);
            let results = executor.execute_step(&ctx).unwrap();
            if c == b {
                assert_eq!(results.doc_ids(), vec![DocId(c as u64)]);
            } else {
                assert!(results.is_empty());
            }
        }
    }

    let stats = executor.stats();
    assert_eq!(stats.steps, 9);
    assert_eq!(stats.compilations, 1);
    assert_eq!(stats.resets, 8);
    assert_eq!(stats.iterators, 18);
}

#[test]
fn test_unchanged_bindings_replay_results() {
    let filter = Expr::eq(Expr::field("seq"), Expr::var(OUTER));
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap();

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[6]), &Config::default());
    ctx.set(OUTER, 2i64);
    for b in 0..3i64 {
        // Inner loop variable is not read by the clause
        ctx.set(INNER, b);
        assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(2)]);
    }
    assert_eq!(executor.stats().iterators, 1);
    assert_eq!(executor.stats().replays, 2);
}

#[test]
fn test_non_deterministic_clause_rebuilds_every_step() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let noisy = Function::new("NOISE", false, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(FieldValue::Number(1.0))
    });
    let filter = Expr::and(vec![
        Expr::eq(Expr::call(noisy, vec![]), Expr::lit(1i64)),
        Expr::lt(Expr::field("seq"), Expr::lit(2i64)),
    ]);
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.policy, CursorPolicy::RebuildOnOuterStep);

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[3]), &Config::default());
    for step in 0..5i64 {
        ctx.set(OUTER, step);
        assert_eq!(executor.execute_step(&ctx).unwrap().len(), 2);
    }
    assert_eq!(executor.stats().compilations, 5);
    assert_eq!(executor.stats().iterators, 5);
    assert!(calls.load(Ordering::Relaxed) >= 15);
}

#[test]
fn test_non_deterministic_results_follow_each_step() {
    let current = Arc::new(AtomicI64::new(0));
    let source = Arc::clone(&current);
    let pick = Function::new("PICK", false, move |_| {
        Ok(FieldValue::Number(source.load(Ordering::SeqCst) as f64))
    });
    let filter = Expr::eq(Expr::field("seq"), Expr::call(pick, vec![]));
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.policy, CursorPolicy::RebuildOnOuterStep);

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[3, 3]), &Config::default());
    for step in [4i64, 1, 1, 5, 9, 0] {
        ctx.set(OUTER, step);
        current.store(step, Ordering::SeqCst);
        let results = executor.execute_step(&ctx).unwrap();
        let expected: Vec<u64> = if step < 6 { vec![step as u64 % 3] } else { vec![] };
        assert_eq!(results.doc_ids().iter().map(|d| d.0).collect::<Vec<_>>(), expected, "step {step}");
    }
    assert_eq!(executor.stats().replays, 0);
}

#[test]
fn test_loop_bound_clause_waits_for_session() {
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(Expr::eq(Expr::field("seq"), Expr::var(OUTER)), 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.policy, CursorPolicy::ResetOnOuterStep);

    let ctx = ExecutionContext::new(None);
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[4]), &Config::default());
    ctx.set(OUTER, 2i64);
    assert!(executor.execute_step(&ctx).unwrap().is_empty());

    ctx.set_session(Session::begin());
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(2)]);
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(2)]);
    assert_eq!(executor.stats().replays, 1);

    // Same bindings, but the session is gone: nothing may be replayed
    ctx.clear_session();
    assert!(executor.execute_step(&ctx).unwrap().is_empty());

    ctx.set_session(Session::begin());
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(2)]);
    assert_eq!(executor.stats().compilations, 1);
}

#[test]
fn test_invariant_clause_waits_for_session() {
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(Expr::lt(Expr::field("seq"), Expr::lit(2i64)), 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.policy, CursorPolicy::BuildOnce);

    let ctx = ExecutionContext::new(None);
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[4]), &Config::default());
    assert!(executor.execute_step(&ctx).unwrap().is_empty());

    ctx.set_session(Session::begin());
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(0), DocId(1)]);

    ctx.clear_session();
    assert!(executor.execute_step(&ctx).unwrap().is_empty());

    ctx.set_session(Session::begin());
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(0), DocId(1)]);
    assert_eq!(executor.stats().compilations, 1);
}

#[test]
fn test_unbinding_a_dependency_is_not_replayed() {
    let filter = Expr::and(vec![
        Expr::eq(Expr::field("seq"), Expr::var(OUTER)),
        Expr::eq(Expr::var(INNER), Expr::lit(0i64)),
    ]);
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap();
    assert_eq!(plan.classification.policy, CursorPolicy::ResetOnOuterStep);

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[4]), &Config::default());
    ctx.set(OUTER, 1i64);
    ctx.set(INNER, 0i64);
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(1)]);

    // OUTER is not the most recent write; dropping it must still count as a change
    ctx.unset(OUTER);
    assert!(executor.execute_step(&ctx).unwrap().is_empty());
    assert_eq!(executor.stats().replays, 0);

    ctx.set(OUTER, 3i64);
    assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(3)]);
}

#[test]
fn test_options_order_applies_without_scorers() {
    let vars = VariableSet::new().with_level([DOC]);
    let filter = Expr::or(vec![
        Expr::like(Expr::field("body"), "item%").unwrap(),
        Expr::eq(Expr::field("body"), Expr::lit("item")),
    ]);
    let clause = SearchClause::new(filter, 0);
    let plan = planner(ScorerRegistry::with_defaults()).plan(clause, &vars).unwrap();

    let options = SearchOptions::default()
        .with_order(Order::new().add(Arc::new(Bm25Scorer::default())))
        .with_boost(2.0);
    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[3]), &Config::default()).with_options(options);
    let results = executor.execute_step(&ctx).unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.hits.iter().all(|hit| hit.score_at(0).is_some_and(|score| score > 0.0)));
    assert_eq!(executor.stats().order_preparations, 1);
}

#[test]
fn test_clause_outside_loops_runs_once() {
    let noisy = Function::new("NOISE", false, |_| Ok(FieldValue::Boolean(true)));
    let vars = VariableSet::new().with_level([DOC]);
    let plan = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(Expr::call(noisy, vec![]), 0), &vars)
        .unwrap();
    assert_eq!(plan.classification.filter, DependencyClass::NonDeterministic);
    assert_eq!(plan.classification.policy, CursorPolicy::BuildOnce);

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[3]), &Config::default());
    executor.execute_step(&ctx).unwrap();
    executor.execute_step(&ctx).unwrap();
    assert_eq!(executor.stats().compilations, 1);
}

#[test]
fn test_self_reference_is_refused() {
    let filter = Expr::eq(Expr::field("seq"), Expr::attribute(DOC, "seq"));
    let err = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotImplemented);

    let filter = Expr::eq(Expr::field("seq"), Expr::var(VariableId(42)));
    let err = planner(ScorerRegistry::with_defaults())
        .plan(SearchClause::new(filter, 2), &two_loops())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadParameter);
}

#[test]
fn test_shared_filter_cache() {
    let cache = Arc::new(FilterCache::new(8));
    let plan = Arc::new(
        planner(ScorerRegistry::with_defaults())
            .plan(SearchClause::new(Expr::eq(Expr::field("seq"), Expr::var(OUTER)), 2), &two_loops())
            .unwrap(),
    );

    let ctx = ExecutionContext::with_session();
    ctx.set(OUTER, 1i64);
    // Sub-query style: a new executor per outer row, same compiled filter
    for _ in 0..3 {
        let mut executor = SearchExecutor::new(Arc::clone(&plan), index(&[4]), &Config::default())
            .with_cache(Arc::clone(&cache));
        assert_eq!(executor.execute_step(&ctx).unwrap().doc_ids(), vec![DocId(1)]);
    }

    let stats = cache.stats();
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.hit_count, 2);
}

/// Writes the document id and ranks by the masked bits, smaller first
struct MaskedScorer {
    collects: Arc<AtomicUsize>,
    prepares: Arc<AtomicUsize>,
}

const MASK: u32 = 0b1010;

impl Scorer for MaskedScorer {
    fn name(&self) -> &str {
        "masked"
    }

    fn score_size(&self) -> usize {
        4
    }

    fn collect(
        &self,
        _field: &dyn searchlink::scoring::scorer::FieldCollector,
        _term: &dyn searchlink::scoring::scorer::TermCollector,
    ) -> ScorerStats {
        self.collects.fetch_add(1, Ordering::SeqCst);
        Arc::new(())
    }

    fn prepare_scorer(&self, _segment: &Arc<Segment>, _stats: &ScorerStats, _boost: f32) -> ScoreFn {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Box::new(|doc: DocId, out: &mut [u8]| out[..4].copy_from_slice(&(doc.0 as u32).to_le_bytes()))
    }

    fn add(&self, dst: &mut [u8], src: &[u8]) {
        let sum = read(dst).wrapping_add(read(src));
        dst[..4].copy_from_slice(&sum.to_le_bytes());
    }

    fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        (read(lhs) & MASK) > (read(rhs) & MASK)
    }
}

fn read(slot: &[u8]) -> u32 {
    u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])
}

#[test]
fn test_custom_scorer_orders_results() {
    let collects = Arc::new(AtomicUsize::new(0));
    let prepares = Arc::new(AtomicUsize::new(0));
    let registry = ScorerRegistry::with_defaults();
    {
        let (collects, prepares) = (Arc::clone(&collects), Arc::clone(&prepares));
        registry.add("masked", move |_args: &[FieldValue]| {
            Ok(Arc::new(MaskedScorer {
                collects: Arc::clone(&collects),
                prepares: Arc::clone(&prepares),
            }) as Arc<dyn Scorer>)
        });
    }

    let vars = VariableSet::new().with_level([DOC]);
    let clause = SearchClause::new(Expr::lit(true), 0).with_scorer(ScorerCall::new("masked", vec![]));
    let plan = planner(registry).plan(clause, &vars).unwrap();

    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), index(&[16]), &Config::default());
    let results = executor.execute_step(&ctx).unwrap();

    let mut expected: Vec<u64> = (0..16).collect();
    expected.sort_by_key(|doc| *doc as u32 & MASK);
    assert_eq!(results.doc_ids().iter().map(|d| d.0).collect::<Vec<_>>(), expected);
    assert!(results.hits.iter().all(|hit| hit.score.len() == 4));

    assert_eq!(collects.load(Ordering::SeqCst), 1);
    assert_eq!(prepares.load(Ordering::SeqCst), 1);
}

#[test]
fn test_bm25_ranks_across_segments() {
    let mut reader = IndexReader::default();
    for texts in [["red apple", "green pear"], ["red red apple", "blue sky"]] {
        let mut builder = Segment::builder();
        for text in texts {
            builder.add_json(json!({"body": text}));
        }
        reader.add_segment(Arc::new(builder.build()));
    }

    let vars = VariableSet::new().with_level([DOC]);
    let filter = Expr::like(Expr::field("body"), "%apple%").unwrap();
    let clause = SearchClause::new(Expr::or(vec![filter, Expr::eq(Expr::field("body"), Expr::lit("red"))]), 0)
        .with_scorer(ScorerCall::new("bm25", vec![]));
    let plan = planner(ScorerRegistry::with_defaults()).plan(clause, &vars).unwrap();

    let second = reader.segments()[1].id;
    let ctx = ExecutionContext::with_session();
    let mut executor = SearchExecutor::new(Arc::new(plan), reader, &Config::default()).with_limit(1);
    let results = executor.execute_step(&ctx).unwrap();

    assert_eq!(results.total_hits, 2);
    assert_eq!(results.len(), 1);
    // "red red apple" in the second segment has the higher term frequency
    assert_eq!(results.hits[0].segment, second);
    assert_eq!(results.hits[0].doc_id, DocId(0));
    assert!(results.hits[0].score_at(0).unwrap() > 0.0);
}

#[test]
fn test_malformed_expressions_rejected_at_compile() {
    let ctx = ExecutionContext::with_session();
    for factor in [json!({}), json!([]), json!(true), json!(null), json!("42")] {
        let expr = Expr::boost(Expr::eq(Expr::field("seq"), Expr::lit(1i64)), Expr::lit(factor));
        let err = searchlink::search::filter::compile(Arc::new(expr), 1.0, Some(&ctx)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadParameter);
    }

    let nested = Expr::in_array(Expr::field("seq"), Expr::lit(json!([1, [2, 3]])));
    let err = searchlink::search::filter::compile(Arc::new(nested), 1.0, Some(&ctx)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadParameter);

    let object_target = Expr::eq(Expr::field("seq"), Expr::lit(json!({"a": 1})));
    let err = searchlink::search::filter::compile(Arc::new(object_target), 1.0, Some(&ctx)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadParameter);

    let config = Config { max_array_len: 2, ..Config::default() };
    let compiler = searchlink::search::filter::FilterCompiler::new(&config);
    let long = Expr::in_array(Expr::field("seq"), Expr::lit(json!([1, 2, 3])));
    let err = compiler.compile(Arc::new(long), 1.0, Some(&ctx)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadParameter);
}
