use std::sync::Arc;
use crate::storage::segment::Segment;

/// Point-in-time view over the segments a query scans
#[derive(Debug, Clone, Default)]
pub struct IndexReader {
    segments: Vec<Arc<Segment>>,
}

impl IndexReader {
    pub fn new(segments: Vec<Arc<Segment>>) -> Self {
        IndexReader { segments }
    }

    pub fn add_segment(&mut self, segment: Arc<Segment>) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }
}
