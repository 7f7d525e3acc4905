//! Query-time view of a published index and cosine ranking over it.

use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use crate::error::{Result, SearchError};
use crate::index::{DocId, DocMeta};
use crate::language::Language;
use crate::persist::{
    peek_doc_count, read_idf_table, read_norms, read_term_dictionary, ArtifactPaths, PostingsFile, HEADER_LEN,
};
use crate::weighting::{idf, tf_idf};

#[derive(Debug, Clone, Copy)]
struct TermInfo {
    offset: u64,
    df: u32,
    idf: f64,
}

/// One ranked result with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f64,
    pub meta: DocMeta,
}

/// Ranked `(doc_id, score)` pairs plus the number of documents that matched
/// at least one query term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub hits: Vec<(DocId, f64)>,
    pub total_hits: usize,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f64,
    doc_id: DocId,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    /// Greater means ranked earlier: higher score, then lower doc id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.doc_id.cmp(&self.doc_id))
    }
}

/// Bounded min-heap keeping the `k` best results seen so far.
struct TopK {
    heap: BinaryHeap<Reverse<Scored>>,
    k: usize,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k.min(1024)), k }
    }

    #[inline]
    fn push(&mut self, entry: Scored) {
        if self.heap.len() < self.k {
            self.heap.push(Reverse(entry));
        } else if let Some(Reverse(worst)) = self.heap.peek() {
            if entry > *worst {
                self.heap.pop();
                self.heap.push(Reverse(entry));
            }
        }
    }

    fn into_sorted(self) -> Vec<Scored> {
        // Ascending `Reverse` order is descending rank order.
        self.heap.into_sorted_vec().into_iter().map(|Reverse(s)| s).collect()
    }
}

/// Postings, dictionary, idf and norms of one language, validated at load
/// and read-only afterwards.
pub struct PostingsIndex {
    language: Language,
    num_docs: u32,
    dictionary: HashMap<String, TermInfo>,
    postings: PostingsFile,
    norms: Vec<f64>,
}

impl std::fmt::Debug for PostingsIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingsIndex")
            .field("language", &self.language)
            .field("num_docs", &self.num_docs)
            .field("terms", &self.dictionary.len())
            .finish()
    }
}

impl PostingsIndex {
    /// Loads and cross-checks every scoring artifact in `paths`.
    pub fn load(paths: &ArtifactPaths, language: Language) -> Result<Self> {
        let corrupt = |reason: String| SearchError::corrupt(language, reason);

        let entries = read_term_dictionary(&paths.terms(), language)?;
        let table = read_idf_table(&paths.idf(), language)?;
        let postings = PostingsFile::open(&paths.postings(), language)?;
        let norms = read_norms(&paths.norms(), language)?;
        let num_docs = table.num_docs;

        if norms.len() as u64 != num_docs as u64 {
            return Err(corrupt(format!("{} norms for {num_docs} documents", norms.len())));
        }
        let doc_count = peek_doc_count(paths, language)?;
        if doc_count != num_docs as u64 {
            return Err(corrupt(format!("metadata holds {doc_count} documents, idf table {num_docs}")));
        }
        if entries.len() != table.entries.len() || postings.term_count() != entries.len() as u64 {
            return Err(corrupt(format!(
                "term counts disagree: dictionary {}, idf {}, postings {}",
                entries.len(),
                table.entries.len(),
                postings.term_count()
            )));
        }

        let mut dictionary = HashMap::with_capacity(entries.len());
        let mut expected_offset = HEADER_LEN;
        let mut previous: Option<&str> = None;
        for (entry, weight) in entries.iter().zip(&table.entries) {
            if previous.map_or(false, |p| p >= entry.term.as_str()) {
                return Err(corrupt(format!("dictionary out of order at {:?}", entry.term)));
            }
            previous = Some(entry.term.as_str());
            if weight.term != entry.term || weight.df != entry.df {
                return Err(corrupt(format!("idf entry {:?} does not match dictionary", weight.term)));
            }
            if entry.offset != expected_offset {
                return Err(corrupt(format!("postings for {:?} start at {}, expected {expected_offset}", entry.term, entry.offset)));
            }
            let block = postings.block(entry.offset)?;
            if block.len() as u64 != entry.df as u64 || entry.df == 0 {
                return Err(corrupt(format!("df of {:?} is {} but {} postings are stored", entry.term, entry.df, block.len())));
            }
            if weight.idf != idf(num_docs, entry.df) {
                return Err(corrupt(format!("idf of {:?} is not ln(N/df)", entry.term)));
            }
            let mut last: Option<DocId> = None;
            for p in block.iter() {
                if p.doc_id >= num_docs || last.map_or(false, |l| l >= p.doc_id) || p.tf == 0 {
                    return Err(corrupt(format!("bad posting (doc {}, tf {}) for {:?}", p.doc_id, p.tf, entry.term)));
                }
                last = Some(p.doc_id);
            }
            expected_offset += block.encoded_len();
            dictionary.insert(entry.term.clone(), TermInfo { offset: entry.offset, df: entry.df, idf: weight.idf });
        }
        if expected_offset != postings.len() {
            return Err(corrupt(format!("postings.bin has {} trailing bytes", postings.len() - expected_offset.min(postings.len()))));
        }

        tracing::info!(language = %language, documents = num_docs, terms = dictionary.len(), "loaded postings index");
        Ok(Self { language, num_docs, dictionary, postings, norms })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn vocabulary_size(&self) -> usize {
        self.dictionary.len()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.dictionary.get(term).map(|t| t.idf)
    }

    pub fn df(&self, term: &str) -> Option<u32> {
        self.dictionary.get(term).map(|t| t.df)
    }

    pub fn norm(&self, doc_id: DocId) -> Option<f64> {
        self.norms.get(doc_id as usize).copied()
    }

    /// Cosine ranking of `terms` (already normalized) against the index.
    ///
    /// Only the postings of query terms are visited. Unknown terms and terms
    /// with zero idf carry no weight. Ties rank by ascending doc id.
    pub fn rank(&self, terms: &[String], k: usize) -> Result<Ranking> {
        if k == 0 {
            return Err(SearchError::QueryValidation("k must be at least 1".into()));
        }

        let mut query_tf: BTreeMap<&str, u32> = BTreeMap::new();
        for t in terms {
            *query_tf.entry(t.as_str()).or_insert(0) += 1;
        }
        let weighted: Vec<(TermInfo, f64)> = query_tf
            .into_iter()
            .filter_map(|(term, tf)| self.dictionary.get(term).map(|info| (*info, tf_idf(tf, info.idf))))
            .filter(|(_, w)| *w > 0.0)
            .collect();
        if weighted.is_empty() {
            return Ok(Ranking::default());
        }
        let query_norm = weighted.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();

        let mut dots: HashMap<DocId, f64> = HashMap::new();
        for (info, q_weight) in &weighted {
            for p in self.postings.block(info.offset)?.iter() {
                *dots.entry(p.doc_id).or_insert(0.0) += tf_idf(p.tf, info.idf) * q_weight;
            }
        }

        let total_hits = dots.len();
        let mut top = TopK::new(k);
        for (doc_id, dot) in dots {
            // Positive contributions imply a positive norm.
            let norm = self.norms[doc_id as usize];
            top.push(Scored { score: dot / (norm * query_norm), doc_id });
        }
        let hits = top.into_sorted().into_iter().map(|s| (s.doc_id, s.score)).collect();
        Ok(Ranking { hits, total_hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_orders_by_score_then_doc() {
        let mut top = TopK::new(3);
        for (doc_id, score) in [(4, 0.5), (2, 0.9), (7, 0.5), (1, 0.5), (3, 0.1)] {
            top.push(Scored { score, doc_id });
        }
        let order: Vec<DocId> = top.into_sorted().iter().map(|s| s.doc_id).collect();
        assert_eq!(order, vec![2, 1, 4]);
    }

    #[test]
    fn top_k_keeps_everything_below_capacity() {
        let mut top = TopK::new(10);
        top.push(Scored { score: 0.2, doc_id: 0 });
        top.push(Scored { score: 0.3, doc_id: 1 });
        assert_eq!(top.into_sorted().len(), 2);
    }
}
