use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use crate::core::types::DocId;
use crate::storage::segment::{FieldStats, Segment, TermStats};

/// Per-document scoring function: writes the raw score of `doc` into its slot
pub type ScoreFn = Box<dyn FnMut(DocId, &mut [u8]) + Send>;

/// Corpus statistics produced by [`Scorer::collect`], opaque to everyone but the scorer
pub type ScorerStats = Arc<dyn Any + Send + Sync>;

/// Gathers per-field statistics, fed once per (segment, field)
pub trait FieldCollector: Send {
    fn collect(&mut self, segment: &Segment, field: &str, stats: &FieldStats);
    fn as_any(&self) -> &dyn Any;
}

/// Gathers per-term statistics, fed once per (segment, field, term)
pub trait TermCollector: Send {
    fn collect(&mut self, segment: &Segment, field: &str, term: &str, stats: &TermStats);
    fn as_any(&self) -> &dyn Any;
}

/// Collector for scorers without statistics needs
pub struct NoopCollector;

impl FieldCollector for NoopCollector {
    fn collect(&mut self, _segment: &Segment, _field: &str, _stats: &FieldStats) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TermCollector for NoopCollector {
    fn collect(&mut self, _segment: &Segment, _field: &str, _term: &str, _stats: &TermStats) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pluggable ranking function contributing one fixed-width slot to an order.
///
/// Lifecycle per query: collectors are prepared and fed while segments are
/// visited, [`collect`](Scorer::collect) folds them once, and
/// [`prepare_scorer`](Scorer::prepare_scorer) is entered once per segment.
/// Slot comparison follows `less`: a document ranks ahead of another when the
/// other's slot is `less` than its own.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    /// Width of this scorer's slot in the shared score buffer
    fn score_size(&self) -> usize;

    fn prepare_field_collector(&self) -> Box<dyn FieldCollector> {
        Box::new(NoopCollector)
    }

    fn prepare_term_collector(&self) -> Box<dyn TermCollector> {
        Box::new(NoopCollector)
    }

    fn collect(&self, _field: &dyn FieldCollector, _term: &dyn TermCollector) -> ScorerStats {
        Arc::new(())
    }

    fn prepare_scorer(&self, segment: &Arc<Segment>, stats: &ScorerStats, boost: f32) -> ScoreFn;

    /// Combines `src` into `dst` when a document matches through several terms
    fn add(&self, dst: &mut [u8], src: &[u8]);

    /// Combines per-segment slots into `dst`
    fn merge(&self, dst: &mut [u8], sources: &[&[u8]]) {
        for src in sources {
            self.add(dst, src);
        }
    }

    fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool;
}

pub fn read_f32(slot: &[u8]) -> f32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&slot[..4]);
    f32::from_le_bytes(bytes)
}

pub fn write_f32(slot: &mut [u8], value: f32) {
    slot[..4].copy_from_slice(&value.to_le_bytes());
}

/// Field lengths seen across all segments
#[derive(Debug, Default)]
pub struct FieldLengthCollector {
    pub docs: HashMap<String, FieldStats>,
}

impl FieldCollector for FieldLengthCollector {
    fn collect(&mut self, _segment: &Segment, field: &str, stats: &FieldStats) {
        let entry = self.docs.entry(field.to_string()).or_default();
        entry.docs_with_field += stats.docs_with_field;
        entry.total_tokens += stats.total_tokens;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Document frequencies of the query terms across all segments
#[derive(Debug, Default)]
pub struct DocFreqCollector {
    pub terms: HashMap<(String, String), TermStats>,
}

impl TermCollector for DocFreqCollector {
    fn collect(&mut self, _segment: &Segment, field: &str, term: &str, stats: &TermStats) {
        let entry = self.terms.entry((field.to_string(), term.to_string())).or_default();
        entry.doc_freq += stats.doc_freq;
        entry.total_freq += stats.total_freq;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Corpus statistics shared by the term-frequency scorers
#[derive(Debug, Default, Clone)]
pub struct TermScoringStats {
    pub fields: HashMap<String, FieldStats>,
    pub terms: Vec<TermWeight>,
}

#[derive(Debug, Clone)]
pub struct TermWeight {
    pub field: String,
    pub term: String,
    pub idf: f32,
}

impl TermScoringStats {
    fn from_collectors(field: &dyn FieldCollector, term: &dyn TermCollector) -> Self {
        let fields = field
            .as_any()
            .downcast_ref::<FieldLengthCollector>()
            .map(|c| c.docs.clone())
            .unwrap_or_default();

        let mut terms: Vec<TermWeight> = term
            .as_any()
            .downcast_ref::<DocFreqCollector>()
            .map(|c| {
                c.terms
                    .iter()
                    .map(|((field_name, term), stats)| {
                        let total = fields
                            .get(field_name)
                            .map(|f| f.docs_with_field)
                            .unwrap_or(0) as f32;
                        let df = stats.doc_freq as f32;
                        TermWeight {
                            field: field_name.clone(),
                            term: term.clone(),
                            idf: ((total - df + 0.5) / (df + 0.5) + 1.0).ln(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        // Deterministic summation order regardless of hash map iteration
        terms.sort_by(|a, b| (&a.field, &a.term).cmp(&(&b.field, &b.term)));

        TermScoringStats { fields, terms }
    }

    fn avg_field_length(&self, field: &str) -> f32 {
        match self.fields.get(field) {
            Some(stats) if stats.docs_with_field > 0 => {
                stats.total_tokens as f32 / stats.docs_with_field as f32
            }
            _ => 0.0,
        }
    }
}

fn term_stats(stats: &ScorerStats) -> TermScoringStats {
    stats
        .downcast_ref::<TermScoringStats>()
        .cloned()
        .unwrap_or_default()
}

/// Higher float scores rank first
fn float_less(lhs: &[u8], rhs: &[u8]) -> bool {
    read_f32(lhs) < read_f32(rhs)
}

fn float_add(dst: &mut [u8], src: &[u8]) {
    let sum = read_f32(dst) + read_f32(src);
    write_f32(dst, sum);
}

/// TF-IDF Scorer
pub struct TfIdfScorer {
    pub normalize: bool,
}

impl TfIdfScorer {
    pub fn new(normalize: bool) -> Self {
        TfIdfScorer { normalize }
    }
}

impl Scorer for TfIdfScorer {
    fn name(&self) -> &str {
        "tfidf"
    }

    fn score_size(&self) -> usize {
        4
    }

    fn prepare_field_collector(&self) -> Box<dyn FieldCollector> {
        Box::new(FieldLengthCollector::default())
    }

    fn prepare_term_collector(&self) -> Box<dyn TermCollector> {
        Box::new(DocFreqCollector::default())
    }

    fn collect(&self, field: &dyn FieldCollector, term: &dyn TermCollector) -> ScorerStats {
        Arc::new(TermScoringStats::from_collectors(field, term))
    }

    fn prepare_scorer(&self, segment: &Arc<Segment>, stats: &ScorerStats, boost: f32) -> ScoreFn {
        let stats = term_stats(stats);
        let normalize = self.normalize;
        let segment = Arc::clone(segment);

        Box::new(move |doc: DocId, out: &mut [u8]| {
            let mut score = 0.0f32;
            for weight in &stats.terms {
                let Some(column) = segment.column(&weight.field) else { continue };
                // TF = term frequency / document length (if normalized)
                let tf = column.term_freq(doc, &weight.term) as f32;
                let tf = if normalize {
                    let len = column.length(doc).max(1) as f32;
                    tf / len
                } else {
                    tf
                };
                score += tf * weight.idf;
            }
            write_f32(out, score * boost);
        })
    }

    fn add(&self, dst: &mut [u8], src: &[u8]) {
        float_add(dst, src);
    }

    fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        float_less(lhs, rhs)
    }
}

/// BM25 Scorer
pub struct Bm25Scorer {
    pub k1: f32,  // Term frequency saturation (default: 1.2)
    pub b: f32,   // Length normalization strength (default: 0.75)
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Bm25Scorer {
            k1: 1.2,
            b: 0.75,
        }
    }
}

impl Scorer for Bm25Scorer {
    fn name(&self) -> &str {
        "bm25"
    }

    fn score_size(&self) -> usize {
        4
    }

    fn prepare_field_collector(&self) -> Box<dyn FieldCollector> {
        Box::new(FieldLengthCollector::default())
    }

    fn prepare_term_collector(&self) -> Box<dyn TermCollector> {
        Box::new(DocFreqCollector::default())
    }

    fn collect(&self, field: &dyn FieldCollector, term: &dyn TermCollector) -> ScorerStats {
        Arc::new(TermScoringStats::from_collectors(field, term))
    }

    fn prepare_scorer(&self, segment: &Arc<Segment>, stats: &ScorerStats, boost: f32) -> ScoreFn {
        let stats = term_stats(stats);
        let (k1, b) = (self.k1, self.b);
        let segment = Arc::clone(segment);
        let avg_lengths: Vec<f32> = stats.terms
            .iter()
            .map(|w| stats.avg_field_length(&w.field))
            .collect();

        Box::new(move |doc: DocId, out: &mut [u8]| {
            let mut score = 0.0f32;
            for (weight, avg_doc_len) in stats.terms.iter().zip(&avg_lengths) {
                let Some(column) = segment.column(&weight.field) else { continue };
                let tf = column.term_freq(doc, &weight.term) as f32;
                if tf == 0.0 {
                    continue;
                }
                let doc_len = column.length(doc) as f32;
                let norm = if *avg_doc_len > 0.0 { doc_len / avg_doc_len } else { 1.0 };

                // BM25 formula
                let numerator = weight.idf * tf * (k1 + 1.0);
                let denominator = tf + k1 * (1.0 - b + b * norm);
                score += numerator / denominator;
            }
            write_f32(out, score * boost);
        })
    }

    fn add(&self, dst: &mut [u8], src: &[u8]) {
        float_add(dst, src);
    }

    fn less(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        float_less(lhs, rhs)
    }
}
