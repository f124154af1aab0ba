use std::collections::HashMap;
use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, Document, FieldValue};
use crate::query::matcher::Attributes;

/// Unique segment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub Uuid);

impl SegmentId {
    pub fn new() -> Self {
        SegmentId(Uuid::new_v4())
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMetadata {
    pub created_at: DateTime<Utc>,
    pub doc_count: u64,
    pub deleted_count: u64,
}

/// Per-field statistics of one segment
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldStats {
    pub docs_with_field: u64,
    pub total_tokens: u64,
}

/// Per-term statistics of one field in one segment
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TermStats {
    pub doc_freq: u64,
    pub total_freq: u64,
}

/// Splits text into lowercase words, the unit term statistics are kept in
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Values of one attribute, indexed by document position
#[derive(Debug, Clone, Default)]
pub struct Column {
    values: Vec<Option<FieldValue>>,
    lengths: Vec<u32>,      // Token count per document, 0 for non-text values
}

/// Borrowed view over one column
#[derive(Debug, Clone, Copy)]
pub struct ColumnReader<'a> {
    pub name: &'a str,
    column: &'a Column,
}

impl<'a> ColumnReader<'a> {
    pub fn get(&self, doc: DocId) -> Option<&'a FieldValue> {
        self.column.values.get(doc.0 as usize).and_then(|v| v.as_ref())
    }

    pub fn length(&self, doc: DocId) -> u32 {
        self.column.lengths.get(doc.0 as usize).copied().unwrap_or(0)
    }

    /// Occurrences of `term` (already tokenized) in this document's text value
    pub fn term_freq(&self, doc: DocId, term: &str) -> u32 {
        match self.get(doc) {
            Some(FieldValue::Text(text)) => {
                tokenize(text).iter().filter(|t| t.as_str() == term).count() as u32
            }
            _ => 0,
        }
    }
}

/// Immutable in-memory columnar segment
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: SegmentId,
    pub metadata: SegmentMetadata,
    columns: HashMap<String, Column>,
    field_stats: HashMap<String, FieldStats>,
    term_stats: HashMap<String, HashMap<String, TermStats>>,
    deleted: RoaringBitmap,
}

impl Segment {
    pub fn builder() -> SegmentBuilder {
        SegmentBuilder::default()
    }

    /// Documents keep their insertion order as positions; their own ids are not used
    pub fn from_documents(docs: impl IntoIterator<Item = Document>) -> Self {
        let mut builder = Self::builder();
        for doc in docs {
            builder.add_document(doc);
        }
        builder.build()
    }

    /// Total positions including deleted documents
    pub fn doc_count(&self) -> u64 {
        self.metadata.doc_count
    }

    pub fn live_doc_count(&self) -> u64 {
        self.metadata.doc_count - self.metadata.deleted_count
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        doc.0 <= u32::MAX as u64 && self.deleted.contains(doc.0 as u32)
    }

    /// First live document at or after `from`
    pub fn next_live(&self, from: u64) -> Option<DocId> {
        (from..self.doc_count())
            .map(DocId)
            .find(|doc| !self.is_deleted(*doc))
    }

    pub fn live_docs(&self) -> impl Iterator<Item = DocId> + '_ {
        (0..self.doc_count()).map(DocId).filter(|doc| !self.is_deleted(*doc))
    }

    pub fn column(&self, name: &str) -> Option<ColumnReader<'_>> {
        self.columns
            .get_key_value(name)
            .map(|(name, column)| ColumnReader { name, column })
    }

    pub fn field_stats(&self, field: &str) -> FieldStats {
        self.field_stats.get(field).copied().unwrap_or_default()
    }

    pub fn term_stats(&self, field: &str, term: &str) -> TermStats {
        self.term_stats
            .get(field)
            .and_then(|terms| terms.get(term))
            .copied()
            .unwrap_or_default()
    }

    pub fn attributes(&self, doc: DocId) -> DocAttributes<'_> {
        DocAttributes { segment: self, doc }
    }
}

/// Attribute view of a single document, read straight from the columns
pub struct DocAttributes<'a> {
    segment: &'a Segment,
    doc: DocId,
}

impl Attributes for DocAttributes<'_> {
    fn attribute(&self, field: &str) -> Option<&FieldValue> {
        self.segment.columns
            .get(field)?
            .values
            .get(self.doc.0 as usize)?
            .as_ref()
    }
}

#[derive(Debug, Default)]
pub struct SegmentBuilder {
    doc_count: u64,
    columns: HashMap<String, Column>,
    deleted: RoaringBitmap,
}

impl SegmentBuilder {
    pub fn add_document(&mut self, doc: Document) -> DocId {
        let position = DocId(self.doc_count);
        for (name, value) in doc.fields {
            let column = self.columns.entry(name).or_default();
            column.values.resize(position.0 as usize, None);
            column.lengths.resize(position.0 as usize, 0);
            let length = match &value {
                FieldValue::Text(text) => tokenize(text).len() as u32,
                _ => 0,
            };
            column.values.push(Some(value));
            column.lengths.push(length);
        }
        self.doc_count += 1;
        position
    }

    pub fn add_json(&mut self, json: serde_json::Value) -> DocId {
        let doc = Document::from_json(DocId(self.doc_count), json);
        self.add_document(doc)
    }

    pub fn delete(&mut self, doc: DocId) -> Result<()> {
        if doc.0 >= self.doc_count || doc.0 > u32::MAX as u64 {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("Document {} is not in the segment", doc.0),
            ));
        }
        self.deleted.insert(doc.0 as u32);
        Ok(())
    }

    pub fn build(mut self) -> Segment {
        let doc_count = self.doc_count as usize;
        let mut field_stats = HashMap::new();
        let mut term_stats: HashMap<String, HashMap<String, TermStats>> = HashMap::new();

        for (name, column) in self.columns.iter_mut() {
            column.values.resize(doc_count, None);
            column.lengths.resize(doc_count, 0);

            let mut stats = FieldStats::default();
            let terms = term_stats.entry(name.clone()).or_default();
            for (position, value) in column.values.iter().enumerate() {
                if self.deleted.contains(position as u32) {
                    continue;
                }
                let Some(value) = value else { continue };
                stats.docs_with_field += 1;

                if let FieldValue::Text(text) = value {
                    let tokens = tokenize(text);
                    stats.total_tokens += tokens.len() as u64;

                    let mut counts: HashMap<&str, u64> = HashMap::new();
                    for token in &tokens {
                        *counts.entry(token.as_str()).or_default() += 1;
                    }
                    for (token, count) in counts {
                        let entry = terms.entry(token.to_string()).or_default();
                        entry.doc_freq += 1;
                        entry.total_freq += count;
                    }
                }
            }
            field_stats.insert(name.clone(), stats);
        }

        Segment {
            id: SegmentId::new(),
            metadata: SegmentMetadata {
                created_at: Utc::now(),
                doc_count: self.doc_count,
                deleted_count: self.deleted.len(),
            },
            columns: self.columns,
            field_stats,
            term_stats,
            deleted: self.deleted,
        }
    }
}
