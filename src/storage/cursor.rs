use std::ops::Index;

use serde::Serialize;

use super::document::Document;

/// One-shot stream of documents produced by an engine query.
///
/// Consuming it is not restartable; [`ResultSet::from_cursor`] drains it
/// into memory.
pub struct Cursor {
    documents: Box<dyn Iterator<Item = Document> + Send>,
    full_count: Option<u64>,
}

impl Cursor {
    pub fn new(documents: Vec<Document>, full_count: Option<u64>) -> Self {
        Self {
            documents: Box::new(documents.into_iter()),
            full_count,
        }
    }

    /// Matches before pagination, when the engine reported it.
    pub fn full_count(&self) -> Option<u64> {
        self.full_count
    }

    /// Transform each document lazily, keeping the statistics.
    pub fn map_documents<F>(self, f: F) -> Cursor
    where
        F: FnMut(Document) -> Document + Send + 'static,
    {
        Cursor {
            documents: Box::new(self.documents.map(f)),
            full_count: self.full_count,
        }
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.documents.next()
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("full_count", &self.full_count)
            .finish_non_exhaustive()
    }
}

/// Where [`ResultSet::count`] takes its number from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    /// Engine-reported total of matches ignoring pagination
    FullCount,
    /// Length of the materialized page; a lower bound of the true total
    Materialized,
}

/// Materialized query result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    documents: Vec<Document>,
    full_count: Option<u64>,
}

impl ResultSet {
    pub fn from_cursor(cursor: Cursor) -> Self {
        let full_count = cursor.full_count();
        Self {
            documents: cursor.collect(),
            full_count,
        }
    }

    /// Wrap a plain list; `count()` falls back to its length.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self {
            documents,
            full_count: None,
        }
    }

    /// Total matches when the engine reported it, else the page length.
    pub fn count(&self) -> u64 {
        self.full_count.unwrap_or(self.documents.len() as u64)
    }

    pub fn count_source(&self) -> CountSource {
        if self.full_count.is_some() {
            CountSource::FullCount
        } else {
            CountSource::Materialized
        }
    }

    pub fn total_count(&self) -> Option<u64> {
        self.full_count
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    /// Paging metadata for a response envelope.
    pub fn meta(&self, page: u32, max_results: u32) -> PageMeta {
        PageMeta {
            page,
            max_results,
            total: self.count(),
        }
    }
}

impl Index<usize> for ResultSet {
    type Output = Document;

    fn index(&self, index: usize) -> &Document {
        &self.documents[index]
    }
}

impl IntoIterator for ResultSet {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub max_results: u32,
    pub total: u64,
}
