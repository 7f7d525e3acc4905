pub mod accumulator;
pub mod build;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod index;
pub mod language;
pub mod merge;
pub mod persist;
pub mod search;
pub mod source;
pub mod spill;
pub mod tokenizer;
pub mod weighting;

pub use build::{build_status, clean_build, BuildLock, BuildOutcome, BuildStatus, IndexBuilder};
pub use catalog::{Catalog, LoadedIndex, QueryAnalysis, SearchResults, TermWeight};
pub use checkpoint::{BuildPhase, Checkpoint, CheckpointManager};
pub use config::{BuildConfig, BuildOptions, SearchConfig};
pub use error::{Result, SearchError};
pub use index::{DocId, DocMeta, IndexStatistics, Posting, SegmentId, SourceDocument};
pub use language::Language;
pub use search::{PostingsIndex, Ranking, SearchHit};
pub use source::{from_documents, DocumentSource, IterSource};
pub use tokenizer::{Analysis, Analyzer, Preprocessor, WhitespacePreprocessor};
