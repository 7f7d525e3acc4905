use serde::{Deserialize, Serialize};

use crate::language::Language;

pub type DocId = u32;
pub type SegmentId = u32;

/// Stored per document; loadable without the postings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    pub external_id: String,
    pub title: String,
    pub url: String,
    /// Leading characters of the text, newlines flattened.
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
}

impl Posting {
    pub fn new(doc_id: DocId, tf: u32) -> Self {
        Self { doc_id, tf }
    }
}

/// A raw document as yielded by a document source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    pub url: String,
    pub text: String,
    #[serde(default)]
    pub language: Option<Language>,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into(), text: text.into(), ..Default::default() }
    }

    pub(crate) fn to_meta(&self, snippet_chars: usize) -> DocMeta {
        let snippet: String = self.text.chars().take(snippet_chars).collect::<String>().replace('\n', " ");
        DocMeta { external_id: self.id.clone(), title: self.title.clone(), url: self.url.clone(), snippet }
    }
}

/// Read-only summary attached to a completed index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub language: Language,
    pub total_documents: u32,
    pub vocabulary_size: u64,
    pub total_postings: u64,
    pub build_duration_secs: f64,
    pub created_at: String,
    pub format_version: u32,
}
