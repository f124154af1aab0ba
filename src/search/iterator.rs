use std::sync::Arc;
use tracing::{debug, trace};
use crate::core::context::ContextReader;
use crate::core::types::{DocId, VariableId};
use crate::query::ast::Expression;
use crate::query::matcher::{self, Scope};
use crate::scoring::order::SegmentScorer;
use crate::storage::segment::Segment;

/// Position of a document iterator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocValue {
    BeforeStart,
    Doc(DocId),
    End,
}

impl DocValue {
    pub fn doc(&self) -> Option<DocId> {
        match self {
            DocValue::Doc(doc) => Some(*doc),
            _ => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, DocValue::End)
    }
}

/// Which matching strategy an iterator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorKind {
    MatchAll,
    MatchNone,
    Expression,
}

pub(crate) enum Matcher {
    All,
    None,
    Expression(Arc<dyn Expression>),
}

struct ScoreState {
    scorer: SegmentScorer,
    buffer: Vec<u8>,
    scored: Option<DocId>,
}

/// Forward-only cursor over the matching documents of one segment.
///
/// Starts before the first document, only ever moves to larger ids, and
/// stays at [`DocValue::End`] once it gets there. Deleted documents are
/// never produced.
pub struct DocumentIterator {
    segment: Arc<Segment>,
    matcher: Matcher,
    free_variables: Vec<VariableId>,
    context: Option<ContextReader>,
    value: DocValue,
    next: u64,
    cost: u64,
    boost: f32,
    score: Option<ScoreState>,
}

impl DocumentIterator {
    pub(crate) fn new(
        segment: Arc<Segment>,
        matcher: Matcher,
        context: Option<ContextReader>,
        cost: u64,
        boost: f32,
        scorer: Option<(SegmentScorer, usize)>,
    ) -> Self {
        let free_variables = match &matcher {
            Matcher::Expression(expr) => expr.free_variables(),
            _ => Vec::new(),
        };
        DocumentIterator {
            segment,
            matcher,
            free_variables,
            context,
            value: DocValue::BeforeStart,
            next: 0,
            cost,
            boost,
            score: scorer.map(|(scorer, size)| ScoreState {
                scorer,
                buffer: vec![0; size],
                scored: None,
            }),
        }
    }

    pub fn kind(&self) -> IteratorKind {
        match self.matcher {
            Matcher::All => IteratorKind::MatchAll,
            Matcher::None => IteratorKind::MatchNone,
            Matcher::Expression(_) => IteratorKind::Expression,
        }
    }

    pub fn value(&self) -> DocValue {
        self.value
    }

    /// Upper bound on the number of documents this iterator can still produce
    pub fn cost(&self) -> u64 {
        self.cost
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn has_score(&self) -> bool {
        self.score.is_some()
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }

    /// Moves to the next matching document; false once exhausted
    pub fn advance(&mut self) -> bool {
        if self.value.is_end() {
            return false;
        }

        match self.find_next() {
            Some(doc) => {
                self.value = DocValue::Doc(doc);
                self.next = doc.0 + 1;
                true
            }
            None => {
                self.value = DocValue::End;
                false
            }
        }
    }

    /// Moves to the first matching document with id `>= target`.
    ///
    /// Never moves backwards: seeking at or before the current document
    /// returns the current position.
    pub fn seek(&mut self, target: DocId) -> DocValue {
        if let DocValue::Doc(current) = self.value {
            if current >= target {
                return self.value;
            }
        }
        if self.value.is_end() {
            return self.value;
        }
        self.next = self.next.max(target.0);
        self.advance();
        self.value
    }

    /// Score buffer for the current document, computed on request.
    ///
    /// None when no order is attached or the iterator is not on a document.
    pub fn score(&mut self) -> Option<&[u8]> {
        let doc = self.value.doc()?;
        let state = self.score.as_mut()?;
        if state.scored != Some(doc) {
            state.buffer.fill(0);
            state.scorer.score(doc, &mut state.buffer);
            state.scored = Some(doc);
        }
        Some(&state.buffer)
    }

    /// Rewinds to the start, reading the context afresh on the next advance
    pub fn reset(&mut self) {
        self.value = DocValue::BeforeStart;
        self.next = 0;
        if let Some(state) = self.score.as_mut() {
            state.scored = None;
        }
    }

    fn find_next(&mut self) -> Option<DocId> {
        let guard = match &self.context {
            Some(context) => {
                let state = context.read();
                if !state.has_session() {
                    debug!("execution context has no session, iterator exhausted");
                    return None;
                }
                Some(state)
            }
            None => None,
        };

        match &self.matcher {
            Matcher::None => None,
            Matcher::All => self.segment.next_live(self.next),
            Matcher::Expression(expr) => {
                let Some(state) = guard else {
                    debug!("expression filter executed without execution context");
                    return None;
                };
                if let Some(var) = self.free_variables.iter().find(|v| !state.bindings().contains(**v)) {
                    debug!(variable = var.0, "search expression reads an unbound variable");
                    return None;
                }

                let mut position = self.next;
                while let Some(doc) = self.segment.next_live(position) {
                    let attributes = self.segment.attributes(doc);
                    let scope = Scope::with_document(state.bindings(), &attributes);
                    match expr.evaluate(&scope) {
                        Ok(value) if value.is_truthy() => return Some(doc),
                        Ok(_) => {}
                        Err(err) if matcher::is_unbound(&err) => {
                            debug!(error = %err, "search expression reads an unbound variable");
                            return None;
                        }
                        Err(err) => {
                            trace!(doc = doc.0, error = %err, "document skipped");
                        }
                    }
                    position = doc.0 + 1;
                }
                None
            }
        }
    }
}

impl Iterator for DocumentIterator {
    type Item = DocId;

    fn next(&mut self) -> Option<DocId> {
        if self.advance() { self.value.doc() } else { None }
    }
}
