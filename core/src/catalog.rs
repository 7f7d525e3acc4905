//! Per-language registry of published indices for the serving path.
//!
//! A language loads on first use, postings and metadata together, so a
//! slot never pairs artifacts of two different builds. Each slot is a
//! `OnceCell`: concurrent first queries wait on one load instead of starting
//! their own. Loaded indices are shared through `Arc` and never mutated;
//! `unload` only detaches the slot.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::index::{DocId, DocMeta, IndexStatistics};
use crate::language::Language;
use crate::persist::{load_stats, DocTable, IndexPaths};
use crate::search::{PostingsIndex, SearchHit};
use crate::tokenizer::{Analysis, Analyzer, Preprocessor};

/// Attempts at loading a consistent artifact set while a rebuild publishes.
const LOAD_ATTEMPTS: usize = 3;

/// Every artifact of one published build.
pub struct LoadedIndex {
    stats: IndexStatistics,
    postings: PostingsIndex,
    docs: DocTable,
}

impl LoadedIndex {
    /// Opens the published index of `language`. `stats.json` is read before
    /// and after the binary artifacts; a different build stamp means the
    /// directory was replaced mid-load and the load starts over.
    fn open(paths: &IndexPaths, language: Language) -> Result<Self> {
        let dir = paths.published();
        for attempt in 1..=LOAD_ATTEMPTS {
            let stats = load_stats(&dir, language)?;
            let postings = PostingsIndex::load(&dir, language)?;
            let docs = DocTable::open(&dir, language)?;
            let after = load_stats(&dir, language)?;
            if after.created_at != stats.created_at {
                tracing::warn!(language = %language, attempt, "index replaced while loading, retrying");
                continue;
            }
            let num_docs = postings.num_docs();
            if docs.len() != num_docs as usize || stats.total_documents != num_docs {
                return Err(SearchError::corrupt(
                    language,
                    format!(
                        "index holds {num_docs} documents, metadata {}, stats {}",
                        docs.len(),
                        stats.total_documents
                    ),
                ));
            }
            tracing::info!(language = %language, documents = num_docs, built = %stats.created_at, "loaded index");
            return Ok(Self { stats, postings, docs });
        }
        Err(SearchError::corrupt(language, "index kept changing while loading"))
    }

    pub fn stats(&self) -> &IndexStatistics {
        &self.stats
    }

    pub fn postings(&self) -> &PostingsIndex {
        &self.postings
    }

    pub fn docs(&self) -> &DocTable {
        &self.docs
    }
}

type Slot = OnceCell<Arc<LoadedIndex>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub language: Language,
    /// Documents sharing at least one weighted term with the query.
    pub total_hits: usize,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermWeight {
    pub term: String,
    pub tf: u32,
    pub df: Option<u32>,
    pub idf: Option<f64>,
    pub weight: f64,
}

/// How a query is seen by the engine: every analysis step plus the weight
/// each surviving term receives.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub language: Language,
    pub analysis: Analysis,
    pub terms: Vec<TermWeight>,
}

pub struct Catalog {
    root: PathBuf,
    config: SearchConfig,
    analyzers: HashMap<Language, Analyzer>,
    slots: RwLock<HashMap<Language, Arc<Slot>>>,
}

impl Catalog {
    pub fn new(root: impl AsRef<Path>, config: SearchConfig) -> Self {
        let analyzers = Language::ALL.iter().map(|&l| (l, Analyzer::for_language(l))).collect();
        Self { root: root.as_ref().to_path_buf(), config, analyzers, slots: RwLock::new(HashMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    fn paths(&self, language: Language) -> IndexPaths {
        IndexPaths::new(&self.root, language)
    }

    fn published(&self, language: Language) -> Result<IndexPaths> {
        let paths = self.paths(language);
        if paths.is_published() {
            Ok(paths)
        } else {
            Err(SearchError::UnknownLanguage(format!("{} (no index built)", language.code())))
        }
    }

    fn analyzer(&self, language: Language) -> &Analyzer {
        // Built for every variant in `new`.
        &self.analyzers[&language]
    }

    fn slot(&self, language: Language) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(&language) {
            return slot.clone();
        }
        self.slots.write().entry(language).or_default().clone()
    }

    /// Languages with a published index.
    pub fn available_languages(&self) -> Vec<Language> {
        Language::ALL.iter().copied().filter(|&l| self.paths(l).is_published()).collect()
    }

    /// Reads only `stats.json`.
    pub fn stats(&self, language: Language) -> Result<IndexStatistics> {
        let paths = self.published(language)?;
        load_stats(&paths.published(), language)
    }

    pub fn is_loaded(&self, language: Language) -> bool {
        self.slots.read().get(&language).map_or(false, |s| s.get().is_some())
    }

    /// The loaded index of `language`, loading it on first use.
    pub fn index(&self, language: Language) -> Result<Arc<LoadedIndex>> {
        let slot = self.slot(language);
        let index = slot.get_or_try_init(|| {
            let paths = self.published(language)?;
            LoadedIndex::open(&paths, language).map(Arc::new)
        })?;
        Ok(index.clone())
    }

    /// Warms up every artifact of `language`.
    pub fn load(&self, language: Language) -> Result<IndexStatistics> {
        Ok(self.index(language)?.stats().clone())
    }

    /// Drops the loaded artifacts; queries in flight keep theirs.
    pub fn unload(&self, language: Language) -> bool {
        let removed = self.slots.write().remove(&language);
        let was_loaded = removed.map_or(false, |s| s.get().is_some());
        if was_loaded {
            tracing::info!(language = %language, "unloaded index");
        }
        was_loaded
    }

    pub fn document(&self, language: Language, doc_id: DocId) -> Result<Option<DocMeta>> {
        self.index(language)?.docs().get(doc_id)
    }

    /// Top `k` documents for `query` by cosine similarity.
    pub fn search(&self, query: &str, language: Language, k: usize) -> Result<SearchResults> {
        if query.trim().is_empty() {
            return Err(SearchError::QueryValidation("query must not be empty".into()));
        }
        if k == 0 || k > self.config.max_k {
            return Err(SearchError::QueryValidation(format!("k must be between 1 and {}", self.config.max_k)));
        }
        let terms = self.analyzer(language).normalize(query);
        let index = self.index(language)?;
        let ranking = index.postings().rank(&terms, k)?;
        if ranking.hits.is_empty() {
            return Ok(SearchResults { language, total_hits: 0, hits: Vec::new() });
        }

        let mut hits = Vec::with_capacity(ranking.hits.len());
        for (doc_id, score) in ranking.hits {
            let meta = index
                .docs()
                .get(doc_id)?
                .ok_or_else(|| SearchError::corrupt(language, format!("doc {doc_id} has no metadata")))?;
            hits.push(SearchHit { doc_id, score, meta });
        }
        tracing::debug!(language = %language, query, total_hits = ranking.total_hits, returned = hits.len(), "search");
        Ok(SearchResults { language, total_hits: ranking.total_hits, hits })
    }

    /// Runs the analysis pipeline on `query`. Term weights are filled in when
    /// the language has a published index.
    pub fn analyze(&self, query: &str, language: Language) -> Result<QueryAnalysis> {
        let analysis = self.analyzer(language).analyze(query);
        let index = if self.paths(language).is_published() { Some(self.index(language)?) } else { None };
        let postings = index.as_ref().map(|i| i.postings());

        let mut tf: BTreeMap<&str, u32> = BTreeMap::new();
        for stem in &analysis.stems {
            *tf.entry(stem.as_str()).or_insert(0) += 1;
        }
        let terms = tf
            .into_iter()
            .map(|(term, tf)| {
                let df = postings.and_then(|p| p.df(term));
                let idf = postings.and_then(|p| p.idf(term));
                TermWeight { term: term.to_string(), tf, df, idf, weight: idf.map_or(0.0, |i| tf as f64 * i) }
            })
            .collect();
        Ok(QueryAnalysis { language, analysis, terms })
    }
}
