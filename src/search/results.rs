use std::cmp::Ordering;
use crate::core::types::DocId;
use crate::scoring::order::PreparedOrder;
use crate::scoring::scorer::read_f32;
use crate::storage::segment::SegmentId;

/// Matches produced by one execution of a search clause
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<ScoredDocument>,
    pub total_hits: usize,
    pub took_ms: u64,
}

impl SearchResults {
    pub fn doc_ids(&self) -> Vec<DocId> {
        self.hits.iter().map(|hit| hit.doc_id).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Matching document with its raw score buffer
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub segment: SegmentId,
    pub doc_id: DocId,
    pub score: Vec<u8>,     // Empty when no order is attached
}

impl ScoredDocument {
    /// Reads the float slot at `offset`, as written by the built-in scorers
    pub fn score_at(&self, offset: usize) -> Option<f32> {
        self.score.get(offset..offset + 4).map(read_f32)
    }
}

/// Top-K collector ranking by a prepared order.
///
/// Hits are kept sorted best-first; equal ranks keep arrival order. Without
/// an order documents are kept in arrival order.
pub struct TopKCollector<'a> {
    pub hits: Vec<ScoredDocument>,
    pub k: usize,
    pub total_collected: usize,  // Track total documents processed
    order: Option<&'a PreparedOrder>,
}

impl<'a> TopKCollector<'a> {
    pub fn new(k: usize, order: Option<&'a PreparedOrder>) -> Self {
        TopKCollector {
            hits: Vec::with_capacity(k.min(1024)),
            k,
            total_collected: 0,
            order,
        }
    }

    pub fn collect(&mut self, scored_doc: ScoredDocument) {
        self.total_collected += 1;
        if self.k == 0 {
            return;
        }

        match self.order {
            None => {
                if self.hits.len() < self.k {
                    self.hits.push(scored_doc);
                }
            }
            Some(order) => {
                let position = self.hits.partition_point(|hit| {
                    order.rank(&hit.score, &scored_doc.score) != Ordering::Greater
                });
                if position < self.k {
                    self.hits.insert(position, scored_doc);
                    self.hits.truncate(self.k);
                }
            }
        }
    }

    pub fn get_results(self) -> Vec<ScoredDocument> {
        self.hits
    }

    pub fn into_results(self, took_ms: u64) -> SearchResults {
        SearchResults {
            total_hits: self.total_collected,
            hits: self.hits,
            took_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::scoring::order::Order;
    use crate::scoring::scorer::TfIdfScorer;

    fn hit(doc: u64, score: f32) -> ScoredDocument {
        ScoredDocument {
            segment: SegmentId::default(),
            doc_id: DocId(doc),
            score: score.to_le_bytes().to_vec(),
        }
    }

    #[test]
    fn test_best_first_with_stable_ties() {
        let order = Order::new().add(Arc::new(TfIdfScorer::new(false))).prepare().finish();
        let mut collector = TopKCollector::new(3, Some(&order));
        collector.collect(hit(0, 1.0));
        collector.collect(hit(1, 3.0));
        collector.collect(hit(2, 1.0));
        collector.collect(hit(3, 2.0));

        let results = collector.into_results(0);
        assert_eq!(results.total_hits, 4);
        assert_eq!(results.doc_ids(), vec![DocId(1), DocId(3), DocId(0)]);
    }

    #[test]
    fn test_unordered_keeps_arrival() {
        let mut collector = TopKCollector::new(2, None);
        for doc in 0..5 {
            collector.collect(hit(doc, 0.0));
        }
        assert_eq!(collector.get_results().iter().map(|h| h.doc_id.0).collect::<Vec<_>>(), vec![0, 1]);
    }
}
