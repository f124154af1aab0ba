use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;
use crate::core::types::DocId;
use crate::index::index_reader::IndexReader;
use crate::scoring::scorer::{FieldCollector, ScoreFn, Scorer, ScorerStats, TermCollector};
use crate::storage::segment::{tokenize, Segment};

/// Ordered list of scorers attached to a search, before statistics are gathered
#[derive(Clone, Default)]
pub struct Order {
    scorers: Vec<Arc<dyn Scorer>>,
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(self.scorers.iter().map(|s| s.name()))
            .finish()
    }
}

impl Order {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorers.push(scorer);
        self
    }

    pub fn push(&mut self, scorer: Arc<dyn Scorer>) {
        self.scorers.push(scorer);
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    pub fn score_size(&self) -> usize {
        self.scorers.iter().map(|s| s.score_size()).sum()
    }

    /// Starts statistics collection for one query
    pub fn prepare(&self) -> OrderCollector {
        OrderCollector {
            entries: self.scorers
                .iter()
                .map(|scorer| CollectorEntry {
                    scorer: Arc::clone(scorer),
                    field: scorer.prepare_field_collector(),
                    term: scorer.prepare_term_collector(),
                })
                .collect(),
            segments: 0,
        }
    }
}

struct CollectorEntry {
    scorer: Arc<dyn Scorer>,
    field: Box<dyn FieldCollector>,
    term: Box<dyn TermCollector>,
}

/// An order whose scorers are gathering corpus statistics
pub struct OrderCollector {
    entries: Vec<CollectorEntry>,
    segments: usize,
}

impl OrderCollector {
    /// Feeds the statistics of one segment for the given (field, term) pairs.
    ///
    /// Terms are split the way segments index text, so a multi-word term feeds
    /// one entry per word.
    pub fn collect_segment(&mut self, segment: &Segment, terms: &[(String, String)]) {
        let mut fields: Vec<&str> = terms.iter().map(|(field, _)| field.as_str()).collect();
        fields.sort_unstable();
        fields.dedup();

        let mut words: Vec<(&str, String)> = terms
            .iter()
            .flat_map(|(field, term)| tokenize(term).into_iter().map(move |w| (field.as_str(), w)))
            .collect();
        words.sort();
        words.dedup();

        for entry in &mut self.entries {
            for field in &fields {
                entry.field.collect(segment, field, &segment.field_stats(field));
            }
            for (field, word) in &words {
                entry.term.collect(segment, field, word, &segment.term_stats(field, word));
            }
        }
        self.segments += 1;
    }

    pub fn collect_index(&mut self, index: &IndexReader, terms: &[(String, String)]) {
        for segment in index.segments() {
            self.collect_segment(segment, terms);
        }
    }

    /// Folds the collectors, calling every scorer's `collect` exactly once
    pub fn finish(self) -> PreparedOrder {
        let mut offset = 0;
        let mut scorers = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            let stats = entry.scorer.collect(entry.field.as_ref(), entry.term.as_ref());
            let size = entry.scorer.score_size();
            scorers.push(PreparedScorer {
                scorer: entry.scorer,
                stats,
                slot: offset..offset + size,
            });
            offset += size;
        }

        debug!(
            scorers = scorers.len(),
            segments = self.segments,
            score_size = offset,
            "order prepared"
        );

        PreparedOrder {
            scorers: Arc::new(scorers),
            score_size: offset,
        }
    }
}

struct PreparedScorer {
    scorer: Arc<dyn Scorer>,
    stats: ScorerStats,
    slot: Range<usize>,
}

/// An order with collected statistics, ready to score segments.
///
/// Each scorer owns a disjoint slot of the score buffer, laid out in order
/// of addition.
#[derive(Clone)]
pub struct PreparedOrder {
    scorers: Arc<Vec<PreparedScorer>>,
    score_size: usize,
}

impl fmt::Debug for PreparedOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PreparedOrder")
            .field("scorers", &self.scorers.iter().map(|s| s.scorer.name()).collect::<Vec<_>>())
            .field("score_size", &self.score_size)
            .finish()
    }
}

impl PreparedOrder {
    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    pub fn score_size(&self) -> usize {
        self.score_size
    }

    /// Byte range of the scorer at `index` within the score buffer
    pub fn slot(&self, index: usize) -> Option<Range<usize>> {
        self.scorers.get(index).map(|s| s.slot.clone())
    }

    pub fn new_buffer(&self) -> Vec<u8> {
        vec![0; self.score_size]
    }

    /// Enters `prepare_scorer` of every scorer for one segment
    pub fn prepare_segment(&self, segment: &Arc<Segment>, boost: f32) -> SegmentScorer {
        SegmentScorer {
            scorers: self.scorers
                .iter()
                .map(|s| (s.scorer.prepare_scorer(segment, &s.stats, boost), s.slot.clone()))
                .collect(),
        }
    }

    pub fn add(&self, dst: &mut [u8], src: &[u8]) {
        for s in self.scorers.iter() {
            s.scorer.add(&mut dst[s.slot.clone()], &src[s.slot.clone()]);
        }
    }

    pub fn merge(&self, dst: &mut [u8], sources: &[&[u8]]) {
        for s in self.scorers.iter() {
            let slots: Vec<&[u8]> = sources.iter().map(|src| &src[s.slot.clone()]).collect();
            s.scorer.merge(&mut dst[s.slot.clone()], &slots);
        }
    }

    /// Lexicographic over scorers in order of addition
    pub fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        for s in self.scorers.iter() {
            let (l, r) = (&lhs[s.slot.clone()], &rhs[s.slot.clone()]);
            if s.scorer.less(l, r) {
                return true;
            }
            if s.scorer.less(r, l) {
                return false;
            }
        }
        false
    }

    /// Ordering that puts better-ranked buffers first
    pub fn rank(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        if self.less(rhs, lhs) {
            Ordering::Less
        } else if self.less(lhs, rhs) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Score functions of every scorer, prepared for one segment
pub struct SegmentScorer {
    scorers: Vec<(ScoreFn, Range<usize>)>,
}

impl SegmentScorer {
    pub fn score(&mut self, doc: DocId, buffer: &mut [u8]) {
        for (score, slot) in &mut self.scorers {
            score(doc, &mut buffer[slot.clone()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::scorer::{read_f32, Bm25Scorer, TfIdfScorer};
    use serde_json::json;

    fn segment() -> Arc<Segment> {
        let mut builder = Segment::builder();
        builder.add_json(json!({"body": "quick brown fox"}));
        builder.add_json(json!({"body": "lazy dog"}));
        builder.add_json(json!({"body": "quick quick fox jumps"}));
        Arc::new(builder.build())
    }

    #[test]
    fn test_slots_are_disjoint() {
        let order = Order::new()
            .add(Arc::new(Bm25Scorer::default()))
            .add(Arc::new(TfIdfScorer::new(false)));
        let prepared = order.prepare().finish();

        assert_eq!(prepared.score_size(), 8);
        assert_eq!(prepared.slot(0), Some(0..4));
        assert_eq!(prepared.slot(1), Some(4..8));
    }

    #[test]
    fn test_term_frequency_raises_score() {
        let segment = segment();
        let terms = vec![("body".to_string(), "quick".to_string())];
        let mut collector = Order::new().add(Arc::new(Bm25Scorer::default())).prepare();
        collector.collect_segment(&segment, &terms);
        let prepared = collector.finish();

        let mut scorer = prepared.prepare_segment(&segment, 1.0);
        let mut once = prepared.new_buffer();
        let mut twice = prepared.new_buffer();
        let mut none = prepared.new_buffer();
        scorer.score(DocId(0), &mut once);
        scorer.score(DocId(2), &mut twice);
        scorer.score(DocId(1), &mut none);

        assert!(read_f32(&twice) > read_f32(&once));
        assert_eq!(read_f32(&none), 0.0);
        assert!(prepared.less(&once, &twice));
        assert_eq!(prepared.rank(&twice, &once), Ordering::Less);
    }

    #[test]
    fn test_boost_scales_scores() {
        let segment = segment();
        let terms = vec![("body".to_string(), "fox".to_string())];
        let mut collector = Order::new().add(Arc::new(TfIdfScorer::new(false))).prepare();
        collector.collect_segment(&segment, &terms);
        let prepared = collector.finish();

        let mut plain = prepared.new_buffer();
        let mut boosted = prepared.new_buffer();
        prepared.prepare_segment(&segment, 1.0).score(DocId(0), &mut plain);
        prepared.prepare_segment(&segment, 2.0).score(DocId(0), &mut boosted);

        assert!((read_f32(&boosted) - 2.0 * read_f32(&plain)).abs() < 1e-6);
    }

    #[test]
    fn test_merge_adds_per_slot() {
        let order = Order::new().add(Arc::new(TfIdfScorer::new(false)));
        let prepared = order.prepare().finish();

        let a = 1.5f32.to_le_bytes();
        let b = 2.0f32.to_le_bytes();
        let mut dst = prepared.new_buffer();
        prepared.merge(&mut dst, &[&a, &b]);
        assert_eq!(read_f32(&dst), 3.5);
    }
}
