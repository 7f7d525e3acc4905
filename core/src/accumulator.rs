use std::collections::HashMap;

use crate::index::DocId;

/// Term frequencies of a single document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocTerms {
    pub doc_id: DocId,
    pub terms: HashMap<String, u32>,
}

impl DocTerms {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Number of `(term, doc, tf)` entries this document contributes.
    pub fn len(&self) -> usize {
        self.terms.len()
    }
}

/// Turns one document's term sequence at a time into a term-frequency map
/// and hands out dense document ids.
///
/// Documents that normalize to no terms do not receive an id: they can never
/// appear in a postings list and so never reach the scorer.
#[derive(Debug, Default)]
pub struct TermAccumulator {
    next_doc_id: DocId,
}

impl TermAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes id assignment after `documents_indexed` documents.
    pub fn resume(documents_indexed: DocId) -> Self {
        Self { next_doc_id: documents_indexed }
    }

    pub fn documents_indexed(&self) -> DocId {
        self.next_doc_id
    }

    pub fn accumulate<I, S>(&mut self, terms: I) -> Option<DocTerms>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *counts.entry(term.into()).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return None;
        }
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        Some(DocTerms { doc_id, terms: counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_repeated_terms() {
        let mut acc = TermAccumulator::new();
        let doc = acc.accumulate(["cat", "dog", "cat"]).unwrap();
        assert_eq!(doc.doc_id, 0);
        assert_eq!(doc.terms["cat"], 2);
        assert_eq!(doc.terms["dog"], 1);
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn empty_documents_get_no_id() {
        let mut acc = TermAccumulator::new();
        assert!(acc.accumulate(Vec::<String>::new()).is_none());
        let doc = acc.accumulate(["fish"]).unwrap();
        assert_eq!(doc.doc_id, 0);
        assert_eq!(acc.documents_indexed(), 1);
    }

    #[test]
    fn resume_continues_numbering() {
        let mut acc = TermAccumulator::resume(41);
        assert_eq!(acc.accumulate(["x"]).unwrap().doc_id, 41);
    }
}
