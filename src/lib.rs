pub mod core;
pub mod storage;
pub mod index;
pub mod scoring;
pub mod search;
pub mod query;

/*
┌──────────────────────────────────── PLANNING ───────────────────────────────────────────────┐
│                                                                                              │
│  SearchClause { filter, scorers, own_level } + VariableSet (loop levels, constants)          │
│        │                                                                                     │
│        └──> SearchPlanner ──classify_clause──> ClauseClassification                          │
│                  │                               • filter: DependencyClass                   │
│                  │                               • sort:   DependencyClass                   │
│                  │                               • policy: CursorPolicy                      │
│                  └──checks names──> ScorerRegistry (bm25, tfidf, ...)                        │
│                                                                                              │
│  DependencyClass    Invariant ──> BuildOnce                                                  │
│                     LoopBound ──> ResetOnOuterStep                                           │
│                     NonDeterministic ──> RebuildOnOuterStep                                  │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── EXECUTION ──────────────────────────────────────────────┐
│                                                                                              │
│  SearchExecutor ──per outer step──> FilterCompiler ──compile──> Filter                       │
│        │                                                    • MatchAll / MatchNone           │
│        │                                                    • Expression(Arc<dyn Expression>)│
│        │                                                    • boost, ContextBinding          │
│        │                                                                                     │
│        ├──> Order ──prepare──> OrderCollector ──finish──> PreparedOrder                      │
│        │                                                                                     │
│        └──> Filter::execute(segment, order, context) ──> DocumentIterator                    │
│                                                  BeforeStart ──advance/seek──> Doc ──> End    │
│                                                                                              │
│  ExecutionContext ──writes──> ContextState <──reads── ContextReader (held by filters)        │
│                                                                                              │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
