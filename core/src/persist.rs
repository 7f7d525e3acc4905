//! On-disk layout of a per-language index.
//!
//! ```text
//! <root>/<lang>/
//! ├── checkpoint.json     build progress (see `checkpoint`)
//! ├── build.lock
//! ├── build/              segments, staged metadata, staged artifacts
//! └── index/              the published, read-only artifact set
//!     ├── postings.bin    header + per-term blocks {count, (doc, tf)*}
//!     ├── terms.bin       header + sorted {term, offset, df} records
//!     ├── idf.bin         header + num_docs + {term, df, idf} records
//!     ├── norms.bin       header + f64 per document
//!     ├── docs.bin        header + DocMeta records
//!     ├── docs.idx        header + u64 offset per document
//!     └── stats.json
//! ```
//!
//! Every binary artifact starts with an [`ArtifactHeader`] so that a reader can
//! reject a file of the wrong kind, version or length before trusting it.

use crate::error::{Result, SearchError};
use crate::index::{DocId, DocMeta, IndexStatistics, Posting};
use crate::language::Language;
use crate::merge::PostingsSink;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ahash::RandomState;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
const MAGIC: [u8; 4] = *b"WSIX";
/// Serialized size of [`ArtifactHeader`] under bincode's fixed-int encoding.
pub const HEADER_LEN: u64 = 20;
/// Bytes per posting in `postings.bin` and in segments.
pub const POSTING_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Postings,
    Terms,
    Idf,
    Norms,
    Docs,
    DocOffsets,
    Segment,
    StagedDocs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    magic: [u8; 4],
    pub kind: ArtifactKind,
    pub version: u32,
    pub count: u64,
}

impl ArtifactHeader {
    pub fn new(kind: ArtifactKind, count: u64) -> Self {
        Self { magic: MAGIC, kind, version: FORMAT_VERSION, count }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Only fixed-size fields, serialization cannot fail.
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decodes and checks a header, returning the record count.
    pub fn check(bytes: &[u8], expected: ArtifactKind, language: Language) -> Result<u64> {
        if bytes.len() < HEADER_LEN as usize {
            return Err(SearchError::corrupt(language, format!("{expected:?}: truncated header")));
        }
        let header: ArtifactHeader = bincode::deserialize(&bytes[..HEADER_LEN as usize])
            .map_err(|e| SearchError::corrupt(language, format!("{expected:?}: bad header: {e}")))?;
        if header.magic != MAGIC {
            return Err(SearchError::corrupt(language, format!("{expected:?}: bad magic")));
        }
        if header.kind != expected {
            return Err(SearchError::corrupt(
                language,
                format!("expected {expected:?} artifact, found {:?}", header.kind),
            ));
        }
        if header.version != FORMAT_VERSION {
            return Err(SearchError::corrupt(
                language,
                format!("{expected:?}: unsupported format version {}", header.version),
            ));
        }
        Ok(header.count)
    }

    pub fn read_from<R: Read>(reader: &mut R, expected: ArtifactKind, language: Language) -> Result<u64> {
        let mut buf = [0u8; HEADER_LEN as usize];
        reader
            .read_exact(&mut buf)
            .map_err(|e| SearchError::corrupt(language, format!("{expected:?}: {e}")))?;
        Self::check(&buf, expected, language)
    }
}

/// Paths of everything stored for one language.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
    pub language: Language,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P, language: Language) -> Self {
        Self { root: root.as_ref().to_path_buf(), language }
    }
    pub fn lang_dir(&self) -> PathBuf { self.root.join(self.language.code()) }
    pub fn index_dir(&self) -> PathBuf { self.lang_dir().join("index") }
    pub fn build_dir(&self) -> PathBuf { self.lang_dir().join("build") }
    pub fn segments_dir(&self) -> PathBuf { self.build_dir().join("segments") }
    pub fn staging_dir(&self) -> PathBuf { self.build_dir().join("out") }
    pub fn staged_docs(&self) -> PathBuf { self.build_dir().join("docs.log") }
    pub fn checkpoint(&self) -> PathBuf { self.lang_dir().join("checkpoint.json") }
    pub fn lock(&self) -> PathBuf { self.lang_dir().join("build.lock") }
    pub fn published(&self) -> ArtifactPaths { ArtifactPaths::new(self.index_dir()) }
    pub fn staged(&self) -> ArtifactPaths { ArtifactPaths::new(self.staging_dir()) }

    /// `true` once an index has been published. Stats are written last, so
    /// their presence marks a usable artifact set.
    pub fn is_published(&self) -> bool {
        self.published().stats().is_file()
    }
}

/// File names inside an artifact directory (published or staged).
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }
    pub fn postings(&self) -> PathBuf { self.dir.join("postings.bin") }
    pub fn terms(&self) -> PathBuf { self.dir.join("terms.bin") }
    pub fn idf(&self) -> PathBuf { self.dir.join("idf.bin") }
    pub fn norms(&self) -> PathBuf { self.dir.join("norms.bin") }
    pub fn docs(&self) -> PathBuf { self.dir.join("docs.bin") }
    pub fn docs_index(&self) -> PathBuf { self.dir.join("docs.idx") }
    pub fn stats(&self) -> PathBuf { self.dir.join("stats.json") }
}

/// Writes `bytes` to a sibling temp file, fsyncs it and renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_dir(path.parent());
    Ok(())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Best effort: directory fsync is unsupported on some platforms.
pub(crate) fn sync_dir(dir: Option<&Path>) {
    if let Some(dir) = dir {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
}

/// Rewrites the header of a finished artifact with its final record count.
fn finish_artifact(writer: BufWriter<File>, path: &Path, kind: ArtifactKind, count: u64) -> Result<()> {
    let mut file = writer.into_inner().map_err(|e| SearchError::spill(path, e.into_error()))?;
    let io = |e| SearchError::spill(path, e);
    file.seek(SeekFrom::Start(0)).map_err(io)?;
    file.write_all(&ArtifactHeader::new(kind, count).to_bytes()).map_err(io)?;
    file.sync_all().map_err(io)?;
    Ok(())
}

fn create_artifact(path: &Path, kind: ArtifactKind) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|e| SearchError::spill(parent, e))?;
    }
    let file = File::create(path).map_err(|e| SearchError::spill(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&ArtifactHeader::new(kind, 0).to_bytes())
        .map_err(|e| SearchError::spill(path, e))?;
    Ok(writer)
}

/// Encodes `value` with bincode and appends it to `writer`. Encoding errors
/// stay `Encoding`; write failures are reported against `path`.
pub(crate) fn encode_into<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T, path: &Path) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    writer.write_all(&bytes).map_err(|e| SearchError::spill(path, e))
}

fn open_artifact(path: &Path, language: Language) -> Result<File> {
    File::open(path).map_err(|e| {
        SearchError::corrupt(language, format!("cannot open {}: {e}", path.display()))
    })
}

// --- Postings and term dictionary ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    pub term: String,
    /// Byte offset of the term's block in `postings.bin`.
    pub offset: u64,
    pub df: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingsSummary {
    pub vocabulary_size: u64,
    pub total_postings: u64,
}

/// Streams merged postings into `postings.bin` and `terms.bin`.
pub struct PostingsWriter {
    postings_path: PathBuf,
    terms_path: PathBuf,
    postings: BufWriter<File>,
    terms: BufWriter<File>,
    offset: u64,
    summary: PostingsSummary,
    last_term: Option<String>,
}

impl PostingsWriter {
    pub fn create(paths: &ArtifactPaths) -> Result<Self> {
        let postings_path = paths.postings();
        let terms_path = paths.terms();
        let postings = create_artifact(&postings_path, ArtifactKind::Postings)?;
        let terms = create_artifact(&terms_path, ArtifactKind::Terms)?;
        Ok(Self {
            postings_path,
            terms_path,
            postings,
            terms,
            offset: HEADER_LEN,
            summary: PostingsSummary::default(),
            last_term: None,
        })
    }

    pub fn finish(self) -> Result<PostingsSummary> {
        let count = self.summary.vocabulary_size;
        finish_artifact(self.postings, &self.postings_path, ArtifactKind::Postings, count)?;
        finish_artifact(self.terms, &self.terms_path, ArtifactKind::Terms, count)?;
        Ok(self.summary)
    }
}

impl PostingsSink for PostingsWriter {
    fn accept(&mut self, term: &str, postings: &[Posting]) -> Result<()> {
        debug_assert!(self.last_term.as_deref().map_or(true, |last| last < term));
        debug_assert!(!postings.is_empty());
        let io = |e| SearchError::spill(&self.postings_path, e);
        self.postings.write_u32::<LittleEndian>(postings.len() as u32).map_err(io)?;
        for p in postings {
            self.postings.write_u32::<LittleEndian>(p.doc_id).map_err(io)?;
            self.postings.write_u32::<LittleEndian>(p.tf).map_err(io)?;
        }
        let entry = TermEntry { term: term.to_string(), offset: self.offset, df: postings.len() as u32 };
        encode_into(&mut self.terms, &entry, &self.terms_path)?;
        self.offset += 4 + (postings.len() * POSTING_LEN) as u64;
        self.summary.vocabulary_size += 1;
        self.summary.total_postings += postings.len() as u64;
        self.last_term = Some(entry.term);
        Ok(())
    }
}

/// Reads the whole term dictionary; entries come back sorted by term.
pub fn read_term_dictionary(path: &Path, language: Language) -> Result<Vec<TermEntry>> {
    let mut reader = BufReader::new(open_artifact(path, language)?);
    let count = ArtifactHeader::read_from(&mut reader, ArtifactKind::Terms, language)?;
    let mut entries = Vec::with_capacity(count.min(1 << 24) as usize);
    for _ in 0..count {
        let entry: TermEntry = bincode::deserialize_from(&mut reader)
            .map_err(|e| SearchError::corrupt(language, format!("terms: {e}")))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Memory-mapped `postings.bin`.
pub struct PostingsFile {
    mmap: Mmap,
    term_count: u64,
    language: Language,
}

impl PostingsFile {
    pub fn open(path: &Path, language: Language) -> Result<Self> {
        let file = open_artifact(path, language)?;
        // The index directory is immutable once published.
        let mmap = unsafe { Mmap::map(&file)? };
        let term_count = ArtifactHeader::check(&mmap, ArtifactKind::Postings, language)?;
        Ok(Self { mmap, term_count, language })
    }

    pub fn term_count(&self) -> u64 {
        self.term_count
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.term_count == 0
    }

    /// The postings block starting at `offset`.
    pub fn block(&self, offset: u64) -> Result<PostingsSlice<'_>> {
        let start = offset as usize;
        let corrupt = || SearchError::corrupt(self.language, format!("postings block at {offset} out of bounds"));
        let head = self.mmap.get(start..start + 4).ok_or_else(corrupt)?;
        let count = LittleEndian::read_u32(head) as usize;
        let body = self
            .mmap
            .get(start + 4..start + 4 + count * POSTING_LEN)
            .ok_or_else(corrupt)?;
        Ok(PostingsSlice { bytes: body })
    }
}

/// A borrowed postings list, decoded on the fly.
#[derive(Debug, Clone, Copy)]
pub struct PostingsSlice<'a> {
    bytes: &'a [u8],
}

impl<'a> PostingsSlice<'a> {
    pub fn len(&self) -> usize {
        self.bytes.len() / POSTING_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Size of the block on disk, including the count prefix.
    pub fn encoded_len(&self) -> u64 {
        4 + self.bytes.len() as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = Posting> + 'a {
        let bytes: &'a [u8] = self.bytes;
        bytes.chunks_exact(POSTING_LEN).map(|c| Posting {
            doc_id: LittleEndian::read_u32(&c[0..4]),
            tf: LittleEndian::read_u32(&c[4..8]),
        })
    }
}

// --- IDF table ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdfEntry {
    pub term: String,
    pub df: u32,
    pub idf: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdfTable {
    pub num_docs: u32,
    pub entries: Vec<IdfEntry>,
}

pub struct IdfWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    count: u64,
}

impl IdfWriter {
    pub fn create(path: &Path, num_docs: u32) -> Result<Self> {
        let mut writer = create_artifact(path, ArtifactKind::Idf)?;
        writer.write_u32::<LittleEndian>(num_docs).map_err(|e| SearchError::spill(path, e))?;
        Ok(Self { path: path.to_path_buf(), writer, count: 0 })
    }

    pub fn push(&mut self, entry: &IdfEntry) -> Result<()> {
        encode_into(&mut self.writer, entry, &self.path)?;
        self.count += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<u64> {
        let count = self.count;
        finish_artifact(self.writer, &self.path, ArtifactKind::Idf, count)?;
        Ok(count)
    }
}

pub fn read_idf_table(path: &Path, language: Language) -> Result<IdfTable> {
    let mut reader = BufReader::new(open_artifact(path, language)?);
    let count = ArtifactHeader::read_from(&mut reader, ArtifactKind::Idf, language)?;
    let corrupt = |e: String| SearchError::corrupt(language, format!("idf: {e}"));
    let num_docs = reader.read_u32::<LittleEndian>().map_err(|e| corrupt(e.to_string()))?;
    let mut entries = Vec::with_capacity(count.min(1 << 24) as usize);
    for _ in 0..count {
        let entry: IdfEntry = bincode::deserialize_from(&mut reader).map_err(|e| corrupt(e.to_string()))?;
        entries.push(entry);
    }
    Ok(IdfTable { num_docs, entries })
}

// --- Document norms ---

pub fn write_norms(path: &Path, norms: &[f64]) -> Result<()> {
    let mut writer = create_artifact(path, ArtifactKind::Norms)?;
    for n in norms {
        writer.write_f64::<LittleEndian>(*n).map_err(|e| SearchError::spill(path, e))?;
    }
    finish_artifact(writer, path, ArtifactKind::Norms, norms.len() as u64)
}

pub fn read_norms(path: &Path, language: Language) -> Result<Vec<f64>> {
    let mut bytes = Vec::new();
    open_artifact(path, language)?.read_to_end(&mut bytes)?;
    let count = ArtifactHeader::check(&bytes, ArtifactKind::Norms, language)?;
    let body = &bytes[HEADER_LEN as usize..];
    if count.checked_mul(8) != Some(body.len() as u64) {
        return Err(SearchError::corrupt(language, format!("norms: expected {count} values, found {} bytes", body.len())));
    }
    Ok(body.chunks_exact(8).map(LittleEndian::read_f64).collect())
}

// --- Document metadata ---

/// Appends `DocMeta` records to the staged metadata log during the scan.
pub struct StagedDocsWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StagedDocsWriter {
    /// Opens the log, truncating it to `valid_len` bytes first. A zero length
    /// starts a fresh log.
    pub fn open(path: &Path, valid_len: u64) -> Result<Self> {
        let io = |e| SearchError::spill(path, e);
        if valid_len == 0 {
            let writer = create_artifact(path, ArtifactKind::StagedDocs)?;
            return Ok(Self { path: path.to_path_buf(), writer });
        }
        let mut file = fs::OpenOptions::new().read(true).write(true).open(path).map_err(io)?;
        file.set_len(valid_len).map_err(io)?;
        file.seek(SeekFrom::End(0)).map_err(io)?;
        Ok(Self { path: path.to_path_buf(), writer: BufWriter::new(file) })
    }

    pub fn push(&mut self, meta: &DocMeta) -> Result<()> {
        encode_into(&mut self.writer, meta, &self.path)?;
        Ok(())
    }

    /// Flushes and fsyncs, returning the durable length of the log.
    pub fn sync(&mut self) -> Result<u64> {
        let io = |e| SearchError::spill(&self.path, e);
        self.writer.flush().map_err(io)?;
        let file = self.writer.get_mut();
        file.sync_all().map_err(io)?;
        file.stream_position().map_err(io)
    }
}

/// 64-bit hash of an external document id. Seeds are fixed so hashes stay
/// stable across processes.
pub fn external_id_hash(id: &str) -> u64 {
    RandomState::with_seeds(0x5753_4958, 0x6964_7321, 0x9e37_79b9, 0x7f4a_7c15).hash_one(id)
}

/// Hashes of the external ids staged in the first `len` bytes of the log.
/// Records are decoded one at a time and dropped once their id is hashed.
pub fn read_staged_ids(path: &Path, len: u64, language: Language) -> Result<HashSet<u64>> {
    let mut ids = HashSet::new();
    if len == 0 {
        return Ok(ids);
    }
    let mut reader = BufReader::new(open_artifact(path, language)?.take(len));
    ArtifactHeader::read_from(&mut reader, ArtifactKind::StagedDocs, language)?;
    let mut consumed = HEADER_LEN;
    while consumed < len {
        let meta: DocMeta = bincode::deserialize_from(&mut reader)
            .map_err(|e| SearchError::corrupt(language, format!("staged docs: {e}")))?;
        consumed += bincode::serialized_size(&meta)?;
        ids.insert(external_id_hash(&meta.external_id));
    }
    Ok(ids)
}

/// Copies the first `count` staged records into `docs.bin` + `docs.idx`.
pub fn publish_docs(staged: &Path, staged_len: u64, count: u32, out: &ArtifactPaths, language: Language) -> Result<()> {
    let mut reader = BufReader::new(open_artifact(staged, language)?.take(staged_len));
    ArtifactHeader::read_from(&mut reader, ArtifactKind::StagedDocs, language)?;
    let docs_path = out.docs();
    let index_path = out.docs_index();
    let mut docs = create_artifact(&docs_path, ArtifactKind::Docs)?;
    let mut index = create_artifact(&index_path, ArtifactKind::DocOffsets)?;
    let mut offset = HEADER_LEN;
    for _ in 0..count {
        let meta: DocMeta = bincode::deserialize_from(&mut reader)
            .map_err(|e| SearchError::corrupt(language, format!("staged docs: {e}")))?;
        let bytes = bincode::serialize(&meta)?;
        docs.write_all(&bytes).map_err(|e| SearchError::spill(&docs_path, e))?;
        index.write_u64::<LittleEndian>(offset).map_err(|e| SearchError::spill(&index_path, e))?;
        offset += bytes.len() as u64;
    }
    finish_artifact(docs, &docs_path, ArtifactKind::Docs, count as u64)?;
    finish_artifact(index, &index_path, ArtifactKind::DocOffsets, count as u64)
}

/// Memory-mapped metadata table; records are decoded on lookup.
pub struct DocTable {
    mmap: Mmap,
    offsets: Vec<u64>,
    language: Language,
}

impl DocTable {
    pub fn open(paths: &ArtifactPaths, language: Language) -> Result<Self> {
        let file = open_artifact(&paths.docs(), language)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let count = ArtifactHeader::check(&mmap, ArtifactKind::Docs, language)?;

        let mut idx = Vec::new();
        open_artifact(&paths.docs_index(), language)?.read_to_end(&mut idx)?;
        let idx_count = ArtifactHeader::check(&idx, ArtifactKind::DocOffsets, language)?;
        let body = &idx[HEADER_LEN as usize..];
        if idx_count != count || body.len() as u64 != count * 8 {
            return Err(SearchError::corrupt(language, "docs.idx does not match docs.bin"));
        }
        let offsets: Vec<u64> = body.chunks_exact(8).map(LittleEndian::read_u64).collect();
        let len = mmap.len() as u64;
        let mut prev = HEADER_LEN;
        for &off in &offsets {
            if off < prev || off >= len {
                return Err(SearchError::corrupt(language, format!("docs.idx offset {off} out of order or bounds")));
            }
            prev = off;
        }
        Ok(Self { mmap, offsets, language })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn get(&self, doc_id: DocId) -> Result<Option<DocMeta>> {
        let i = doc_id as usize;
        let Some(&start) = self.offsets.get(i) else { return Ok(None) };
        let end = self.offsets.get(i + 1).copied().unwrap_or(self.mmap.len() as u64);
        let meta = bincode::deserialize(&self.mmap[start as usize..end as usize])
            .map_err(|e| SearchError::corrupt(self.language, format!("doc {doc_id}: {e}")))?;
        Ok(Some(meta))
    }
}

/// Record count of `docs.bin`, read from the header only.
pub fn peek_doc_count(paths: &ArtifactPaths, language: Language) -> Result<u64> {
    let mut f = open_artifact(&paths.docs(), language)?;
    ArtifactHeader::read_from(&mut f, ArtifactKind::Docs, language)
}

// --- Stats ---

pub fn save_stats(paths: &ArtifactPaths, stats: &IndexStatistics) -> Result<()> {
    let json = serde_json::to_string_pretty(stats)?;
    write_atomic(&paths.stats(), json.as_bytes()).map_err(|e| SearchError::spill(paths.stats(), e))
}

pub fn load_stats(paths: &ArtifactPaths, language: Language) -> Result<IndexStatistics> {
    let mut buf = String::new();
    open_artifact(&paths.stats(), language)?.read_to_string(&mut buf)?;
    let stats: IndexStatistics = serde_json::from_str(&buf)
        .map_err(|e| SearchError::corrupt(language, format!("stats.json: {e}")))?;
    if stats.language != language {
        return Err(SearchError::corrupt(language, format!("stats.json belongs to {}", stats.language)));
    }
    Ok(stats)
}
