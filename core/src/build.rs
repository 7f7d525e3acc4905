//! Resumable, memory-bounded index construction for one language.
//!
//! Phases run in order, each one recorded in the checkpoint before the next
//! consumes its output:
//!
//! 1. scan: source -> preprocessor -> accumulator -> spiller, metadata staged
//! 2. compact: merge segments until at most `merge_fan_in` remain
//! 3. merge: k-way merge into staged `postings.bin` / `terms.bin`
//! 4. weigh: `idf.bin` and `norms.bin`
//! 5. finalize: metadata, stats, then publish the staged directory

use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;

use crate::accumulator::TermAccumulator;
use crate::checkpoint::{now_rfc3339, BuildPhase, Checkpoint, CheckpointManager};
use crate::config::{BuildConfig, BuildOptions};
use crate::error::{Result, SearchError};
use crate::index::{IndexStatistics, SegmentId};
use crate::language::Language;
use crate::merge::{compact_segments, BlockMerger};
use crate::persist::{
    external_id_hash, load_stats, publish_docs, read_staged_ids, save_stats, sync_dir, ArtifactHeader, ArtifactKind, IndexPaths,
    PostingsFile, PostingsWriter, StagedDocsWriter, FORMAT_VERSION, HEADER_LEN, POSTING_LEN,
};
use crate::source::DocumentSource;
use crate::spill::{segment_id_of, BlockSpiller};
use crate::tokenizer::Preprocessor;
use crate::weighting::compute_weights;

/// Exclusive per-language build lock, released on drop or process exit.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
}

impl BuildLock {
    pub fn acquire(paths: &IndexPaths) -> Result<Self> {
        fs::create_dir_all(paths.lang_dir())?;
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(paths.lock())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(SearchError::BuildInProgress(paths.language))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Complete(IndexStatistics),
    /// Stopped after durably recording the phase, as requested.
    Halted(BuildPhase),
}

/// Checkpoint plus published stats, for status reporting.
#[derive(Debug, Clone)]
pub struct BuildStatus {
    pub checkpoint: Option<Checkpoint>,
    pub stats: Option<IndexStatistics>,
}

struct Clock {
    base_secs: f64,
    started: Instant,
}

impl Clock {
    fn total(&self) -> f64 {
        self.base_secs + self.started.elapsed().as_secs_f64()
    }
}

pub struct IndexBuilder<'a> {
    paths: IndexPaths,
    config: BuildConfig,
    preprocessor: &'a dyn Preprocessor,
    checkpoints: CheckpointManager,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(root: impl AsRef<Path>, language: Language, config: BuildConfig, preprocessor: &'a dyn Preprocessor) -> Self {
        let paths = IndexPaths::new(root, language);
        let checkpoints = CheckpointManager::new(paths.checkpoint(), language);
        Self { paths, config: config.sanitized(), preprocessor, checkpoints }
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    fn language(&self) -> Language {
        self.paths.language
    }

    /// Runs the build from wherever the last durable checkpoint left it.
    pub fn build<S: DocumentSource + ?Sized>(&self, source: &mut S, options: &BuildOptions) -> Result<BuildOutcome> {
        let _lock = BuildLock::acquire(&self.paths)?;
        let language = self.language();

        let mut cp = match self.checkpoints.load() {
            Some(cp) if options.rebuild => {
                tracing::info!(language = %language, phase = %cp.phase, "rebuild requested, discarding build state");
                self.fresh()?
            }
            Some(cp) if cp.is_complete() => {
                tracing::info!(language = %language, "index already complete");
                return Ok(BuildOutcome::Complete(load_stats(&self.paths.published(), language)?));
            }
            Some(cp) => {
                tracing::info!(
                    language = %language,
                    phase = %cp.phase,
                    documents_processed = cp.documents_processed,
                    segments = cp.segments.len(),
                    "resuming build"
                );
                cp
            }
            None => self.fresh()?,
        };
        let clock = Clock { base_secs: cp.elapsed_secs, started: Instant::now() };

        loop {
            match cp.phase {
                BuildPhase::Empty => self.scan(source, &mut cp, options, &clock)?,
                BuildPhase::DocumentsScanned => self.compact(&mut cp, &clock)?,
                BuildPhase::TermsSpilled => self.merge(&mut cp, &clock)?,
                BuildPhase::Merged => self.weigh(&mut cp, &clock)?,
                BuildPhase::WeightsComputed => {
                    let stats = self.finalize(&mut cp, &clock)?;
                    return Ok(BuildOutcome::Complete(stats));
                }
                BuildPhase::Complete => {
                    return Ok(BuildOutcome::Complete(load_stats(&self.paths.published(), language)?));
                }
            }
            tracing::info!(language = %language, phase = %cp.phase, elapsed_secs = clock.total(), "phase complete");
            if options.halt_after == Some(cp.phase) {
                tracing::info!(language = %language, phase = %cp.phase, "halting as requested");
                return Ok(BuildOutcome::Halted(cp.phase));
            }
        }
    }

    /// Wipes intermediate build state and returns an empty checkpoint.
    fn fresh(&self) -> Result<Checkpoint> {
        let build_dir = self.paths.build_dir();
        match fs::remove_dir_all(&build_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.checkpoints.clear()?;
        fs::create_dir_all(self.paths.segments_dir())?;
        Ok(Checkpoint::new(self.language()))
    }

    fn record(&self, cp: &mut Checkpoint, clock: &Clock) -> Result<()> {
        cp.elapsed_secs = clock.total();
        self.checkpoints.store(cp)
    }

    fn advance(&self, cp: &mut Checkpoint, clock: &Clock) -> Result<()> {
        if let Some(next) = cp.phase.next() {
            cp.phase = next;
        }
        self.record(cp, clock)
    }

    /// Removes segment files the checkpoint does not know about: leftovers of
    /// a spill or compaction that crashed before being recorded.
    fn remove_orphan_segments(&self, live: &[SegmentId]) -> Result<()> {
        let dir = self.paths.segments_dir();
        fs::create_dir_all(&dir)?;
        let live: HashSet<SegmentId> = live.iter().copied().collect();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let keep = segment_id_of(&path).map_or(false, |id| live.contains(&id));
            if !keep {
                tracing::debug!(path = %path.display(), "removing orphan segment");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn scan<S: DocumentSource + ?Sized>(
        &self,
        source: &mut S,
        cp: &mut Checkpoint,
        options: &BuildOptions,
        clock: &Clock,
    ) -> Result<()> {
        let language = self.language();
        self.remove_orphan_segments(&cp.segments)?;
        let staged_docs = self.paths.staged_docs();
        // One 64-bit hash per indexed document.
        let mut seen = read_staged_ids(&staged_docs, cp.staged_metadata_bytes, language)?;
        let mut docs_log = StagedDocsWriter::open(&staged_docs, cp.staged_metadata_bytes)?;

        if cp.documents_processed > 0 {
            let skipped = source.skip(cp.documents_processed)?;
            if skipped < cp.documents_processed {
                return Err(SearchError::CorpusRead(format!(
                    "source ended after {skipped} documents but {} were already processed",
                    cp.documents_processed
                )));
            }
            tracing::info!(language = %language, skipped, "skipped documents processed by a previous run");
        }

        let mut accumulator = TermAccumulator::resume(cp.documents_indexed);
        let mut spiller = BlockSpiller::new(
            &self.paths.segments_dir(),
            self.config.buffer_capacity,
            self.config.parallel_sort,
            cp.next_segment,
        );
        let resumed_at = cp.documents_processed;
        let mut processed = cp.documents_processed;
        let mut rejected = 0u64;
        let mut empty = 0u64;
        let started = Instant::now();

        loop {
            if options.max_docs.map_or(false, |max| processed >= max) {
                tracing::info!(language = %language, max_docs = processed, "document limit reached");
                break;
            }
            let Some(doc) = source.next_document()? else { break };
            processed += 1;

            if doc.language.map_or(false, |l| l != language) {
                rejected += 1;
                continue;
            }
            let id_hash = external_id_hash(&doc.id);
            if seen.contains(&id_hash) {
                tracing::warn!(language = %language, external_id = %doc.id, "document already ingested, rejecting");
                rejected += 1;
                continue;
            }
            let terms = self.preprocessor.normalize(&doc.text);
            let Some(doc_terms) = accumulator.accumulate(terms) else {
                empty += 1;
                continue;
            };
            docs_log.push(&doc.to_meta(self.config.snippet_chars))?;
            seen.insert(id_hash);
            spiller.add(doc_terms);

            if spiller.is_full() {
                if let Some(info) = spiller.spill()? {
                    cp.segments.push(info.id);
                }
                cp.next_segment = spiller.next_segment();
                cp.staged_metadata_bytes = docs_log.sync()?;
                cp.documents_processed = processed;
                cp.documents_indexed = accumulator.documents_indexed();
                self.record(cp, clock)?;
                let rate = (processed - resumed_at) as f64 / started.elapsed().as_secs_f64().max(1e-9);
                tracing::info!(
                    language = %language,
                    documents = processed,
                    indexed = cp.documents_indexed,
                    segments = cp.segments.len(),
                    docs_per_sec = rate as u64,
                    "scan progress"
                );
            }
        }

        if let Some(info) = spiller.spill()? {
            cp.segments.push(info.id);
        }
        cp.next_segment = spiller.next_segment();
        cp.staged_metadata_bytes = docs_log.sync()?;
        cp.documents_processed = processed;
        cp.documents_indexed = accumulator.documents_indexed();
        tracing::info!(
            language = %language,
            documents = processed,
            indexed = cp.documents_indexed,
            rejected,
            empty,
            segments = cp.segments.len(),
            "scan finished"
        );
        self.advance(cp, clock)
    }

    fn compact(&self, cp: &mut Checkpoint, clock: &Clock) -> Result<()> {
        self.remove_orphan_segments(&cp.segments)?;
        let segments = cp.segments.clone();
        let next = cp.next_segment;
        compact_segments(
            &self.paths.segments_dir(),
            self.language(),
            &segments,
            self.config.merge_fan_in,
            next,
            |live, next_segment| {
                cp.segments = live.to_vec();
                cp.next_segment = next_segment;
                self.record(cp, clock)
            },
        )?;
        self.advance(cp, clock)
    }

    fn merge(&self, cp: &mut Checkpoint, clock: &Clock) -> Result<()> {
        self.remove_orphan_segments(&cp.segments)?;
        let staging = self.paths.staging_dir();
        match fs::remove_dir_all(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SearchError::spill(&staging, e)),
        }
        let mut writer = PostingsWriter::create(&self.paths.staged())?;
        let merged = BlockMerger::open(&self.paths.segments_dir(), &cp.segments, self.language())?.merge_into(&mut writer)?;
        let summary = writer.finish()?;
        tracing::info!(
            language = %self.language(),
            terms = summary.vocabulary_size,
            postings = summary.total_postings,
            duplicates = merged.duplicates,
            "merged segments"
        );
        self.advance(cp, clock)
    }

    fn weigh(&self, cp: &mut Checkpoint, clock: &Clock) -> Result<()> {
        compute_weights(&self.paths.staged(), cp.documents_indexed, self.language())?;
        self.advance(cp, clock)
    }

    fn finalize(&self, cp: &mut Checkpoint, clock: &Clock) -> Result<IndexStatistics> {
        let language = self.language();
        let staged = self.paths.staged();
        let published = self.paths.published();

        if !staged.postings().is_file() && self.paths.is_published() {
            // Published by a previous run that stopped before recording it.
            let stats = load_stats(&published, language)?;
            if stats.total_documents == cp.documents_indexed {
                cp.phase = BuildPhase::Complete;
                self.record(cp, clock)?;
                self.cleanup();
                return Ok(stats);
            }
        }

        publish_docs(&self.paths.staged_docs(), cp.staged_metadata_bytes, cp.documents_indexed, &staged, language)?;
        let mut terms_file = File::open(staged.terms())?;
        let vocabulary_size = ArtifactHeader::read_from(&mut terms_file, ArtifactKind::Terms, language)?;
        let postings = PostingsFile::open(&staged.postings(), language)?;
        let total_postings = (postings.len() - HEADER_LEN - 4 * vocabulary_size) / POSTING_LEN as u64;
        drop(postings);

        let stats = IndexStatistics {
            language,
            total_documents: cp.documents_indexed,
            vocabulary_size,
            total_postings,
            build_duration_secs: clock.total(),
            created_at: now_rfc3339(),
            format_version: FORMAT_VERSION,
        };
        save_stats(&staged, &stats)?;
        self.publish()?;

        cp.phase = BuildPhase::Complete;
        self.record(cp, clock)?;
        self.cleanup();
        tracing::info!(
            language = %language,
            documents = stats.total_documents,
            terms = stats.vocabulary_size,
            postings = stats.total_postings,
            build_secs = stats.build_duration_secs,
            "index published"
        );
        Ok(stats)
    }

    /// Swaps the staged directory in as the live index.
    fn publish(&self) -> Result<()> {
        let lang_dir = self.paths.lang_dir();
        let live = self.paths.index_dir();
        let old = lang_dir.join("index.old");
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        if live.exists() {
            fs::rename(&live, &old)?;
        }
        fs::rename(self.paths.staging_dir(), &live)?;
        sync_dir(Some(&lang_dir));
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        Ok(())
    }

    fn cleanup(&self) {
        if let Err(e) = fs::remove_dir_all(self.paths.build_dir()) {
            tracing::warn!(error = %e, "could not remove build directory");
        }
    }
}

/// Checkpoint and published stats of a language, without loading anything else.
pub fn build_status(root: impl AsRef<Path>, language: Language) -> BuildStatus {
    let paths = IndexPaths::new(root, language);
    let checkpoint = CheckpointManager::new(paths.checkpoint(), language).load();
    let stats = if paths.is_published() { load_stats(&paths.published(), language).ok() } else { None };
    BuildStatus { checkpoint, stats }
}

/// Drops the checkpoint and intermediate files. The published index stays.
pub fn clean_build(root: impl AsRef<Path>, language: Language) -> Result<()> {
    let paths = IndexPaths::new(root, language);
    let _lock = BuildLock::acquire(&paths)?;
    match fs::remove_dir_all(paths.build_dir()) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    CheckpointManager::new(paths.checkpoint(), language).clear()
}
