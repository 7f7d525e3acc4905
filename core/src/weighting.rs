use std::fs::File;
use std::io::BufReader;

use crate::error::{Result, SearchError};
use crate::index::DocId;
use crate::language::Language;
use crate::persist::{write_norms, ArtifactHeader, ArtifactKind, ArtifactPaths, IdfEntry, IdfWriter, PostingsFile, TermEntry};

/// `ln(N / df)`. `df` is at least 1 for every term that exists.
#[inline]
pub fn idf(num_docs: u32, df: u32) -> f64 {
    (num_docs as f64 / df as f64).ln()
}

/// Raw term frequency times idf.
#[inline]
pub fn tf_idf(tf: u32, idf: f64) -> f64 {
    tf as f64 * idf
}

/// Running sums of squared weights, one slot per document.
#[derive(Debug, Clone)]
pub struct NormAccumulator {
    sums: Vec<f64>,
}

impl NormAccumulator {
    pub fn new(num_docs: u32) -> Self {
        Self { sums: vec![0.0; num_docs as usize] }
    }

    /// Returns `false` when `doc_id` is outside the corpus.
    pub fn add(&mut self, doc_id: DocId, weight: f64) -> bool {
        match self.sums.get_mut(doc_id as usize) {
            Some(sum) => {
                *sum += weight * weight;
                true
            }
            None => false,
        }
    }

    pub fn finish(self) -> Vec<f64> {
        self.sums.into_iter().map(f64::sqrt).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSummary {
    pub terms: u64,
    pub zero_norm_documents: u64,
}

/// Derives `idf.bin` and `norms.bin` from merged `postings.bin` and
/// `terms.bin` in one sequential pass. Terms are visited in dictionary
/// order, so the floating point sums are reproducible.
pub fn compute_weights(paths: &ArtifactPaths, num_docs: u32, language: Language) -> Result<WeightSummary> {
    let terms_path = paths.terms();
    let file = File::open(&terms_path).map_err(|e| SearchError::corrupt(language, format!("terms: {e}")))?;
    let mut terms = BufReader::new(file);
    let count = ArtifactHeader::read_from(&mut terms, ArtifactKind::Terms, language)?;
    let postings = PostingsFile::open(&paths.postings(), language)?;

    let mut idf_out = IdfWriter::create(&paths.idf(), num_docs)?;
    let mut norms = NormAccumulator::new(num_docs);
    for _ in 0..count {
        let entry: TermEntry = bincode::deserialize_from(&mut terms)
            .map_err(|e| SearchError::corrupt(language, format!("terms: {e}")))?;
        if entry.df == 0 {
            return Err(SearchError::corrupt(language, format!("term {:?} has df 0", entry.term)));
        }
        let weight = idf(num_docs, entry.df);
        for p in postings.block(entry.offset)?.iter() {
            if !norms.add(p.doc_id, tf_idf(p.tf, weight)) {
                return Err(SearchError::corrupt(language, format!("doc {} outside corpus of {num_docs}", p.doc_id)));
            }
        }
        idf_out.push(&IdfEntry { term: entry.term, df: entry.df, idf: weight })?;
    }
    let terms_written = idf_out.finish()?;

    let norms = norms.finish();
    let zero_norm_documents = norms.iter().filter(|n| **n == 0.0).count() as u64;
    write_norms(&paths.norms(), &norms)?;
    tracing::info!(language = %language, terms = terms_written, documents = num_docs, zero_norm_documents, "computed weights");
    Ok(WeightSummary { terms: terms_written, zero_norm_documents })
}
