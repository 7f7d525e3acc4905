//! Bounded in-memory blocks and the sorted segment files they spill to.
//!
//! A segment is a header followed by term groups sorted by term:
//! `term (bincode string) | count u32 | count × (doc_id u32, tf u32)`,
//! postings inside a group sorted by doc id.

use crate::accumulator::DocTerms;
use crate::error::{Result, SearchError};
use crate::index::{Posting, SegmentId};
use crate::language::Language;
use crate::merge::PostingsSink;
use crate::persist::{encode_into, sync_dir, tmp_path, ArtifactHeader, ArtifactKind};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub fn segment_path(dir: &Path, id: SegmentId) -> PathBuf {
    dir.join(format!("{id:08}.seg"))
}

/// Parses a segment id back out of a file name written by [`segment_path`].
pub fn segment_id_of(path: &Path) -> Option<SegmentId> {
    if path.extension()?.to_str()? != "seg" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub terms: u64,
    pub entries: u64,
}

/// Writes one segment under a temporary name; `finish` makes it durable and
/// gives it its final name.
pub struct SegmentWriter {
    id: SegmentId,
    tmp: PathBuf,
    path: PathBuf,
    writer: BufWriter<File>,
    terms: u64,
    entries: u64,
}

impl SegmentWriter {
    pub fn create(dir: &Path, id: SegmentId) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| SearchError::spill(dir, e))?;
        let path = segment_path(dir, id);
        let tmp = tmp_path(&path);
        let file = File::create(&tmp).map_err(|e| SearchError::spill(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        Self::write_header(&mut writer, id, 0, 0).map_err(|e| SearchError::spill(&tmp, e))?;
        Ok(Self { id, tmp, path, writer, terms: 0, entries: 0 })
    }

    fn write_header<W: Write>(w: &mut W, id: SegmentId, terms: u64, entries: u64) -> std::io::Result<()> {
        w.write_all(&ArtifactHeader::new(ArtifactKind::Segment, terms).to_bytes())?;
        w.write_u32::<LittleEndian>(id)?;
        w.write_u64::<LittleEndian>(entries)
    }

    pub fn write_group(&mut self, term: &str, postings: &[Posting]) -> Result<()> {
        let io = |e| SearchError::spill(&self.tmp, e);
        encode_into(&mut self.writer, term, &self.tmp)?;
        self.writer.write_u32::<LittleEndian>(postings.len() as u32).map_err(io)?;
        for p in postings {
            self.writer.write_u32::<LittleEndian>(p.doc_id).map_err(io)?;
            self.writer.write_u32::<LittleEndian>(p.tf).map_err(io)?;
        }
        self.terms += 1;
        self.entries += postings.len() as u64;
        Ok(())
    }

    pub fn finish(self) -> Result<SegmentInfo> {
        let SegmentWriter { id, tmp, path, writer, terms, entries } = self;
        let io = |e| SearchError::spill(&tmp, e);
        let mut file = writer.into_inner().map_err(|e| io(e.into_error()))?;
        file.seek(SeekFrom::Start(0)).map_err(io)?;
        Self::write_header(&mut file, id, terms, entries).map_err(io)?;
        file.sync_all().map_err(io)?;
        drop(file);
        fs::rename(&tmp, &path).map_err(|e| SearchError::spill(&path, e))?;
        sync_dir(path.parent());
        Ok(SegmentInfo { id, terms, entries })
    }
}

impl PostingsSink for SegmentWriter {
    fn accept(&mut self, term: &str, postings: &[Posting]) -> Result<()> {
        self.write_group(term, postings)
    }
}

/// Streaming cursor over a segment: one term group header and one posting
/// at a time.
pub struct SegmentReader {
    id: SegmentId,
    reader: BufReader<File>,
    language: Language,
    groups_left: u64,
    term: Option<String>,
    postings_left: u32,
}

impl SegmentReader {
    pub fn open(dir: &Path, id: SegmentId, language: Language) -> Result<Self> {
        let path = segment_path(dir, id);
        let file = File::open(&path)
            .map_err(|e| SearchError::corrupt(language, format!("segment {}: {e}", path.display())))?;
        let mut reader = BufReader::with_capacity(64 * 1024, file);
        let groups = ArtifactHeader::read_from(&mut reader, ArtifactKind::Segment, language)?;
        let stored_id = reader.read_u32::<LittleEndian>().map_err(|e| SearchError::corrupt(language, e.to_string()))?;
        let _entries = reader.read_u64::<LittleEndian>().map_err(|e| SearchError::corrupt(language, e.to_string()))?;
        if stored_id != id {
            return Err(SearchError::corrupt(language, format!("segment {id} claims id {stored_id}")));
        }
        let mut cursor = Self { id, reader, language, groups_left: groups, term: None, postings_left: 0 };
        cursor.advance_group()?;
        Ok(cursor)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Term of the current group, `None` once the segment is exhausted.
    pub fn term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    fn corrupt(&self, what: impl std::fmt::Display) -> SearchError {
        SearchError::corrupt(self.language, format!("segment {}: {what}", self.id))
    }

    /// Next posting of the current group.
    pub fn next_posting(&mut self) -> Result<Option<Posting>> {
        if self.postings_left == 0 {
            return Ok(None);
        }
        let doc_id = self.reader.read_u32::<LittleEndian>().map_err(|e| self.corrupt(e))?;
        let tf = self.reader.read_u32::<LittleEndian>().map_err(|e| self.corrupt(e))?;
        self.postings_left -= 1;
        Ok(Some(Posting { doc_id, tf }))
    }

    /// Skips what is left of the current group and reads the next header.
    pub fn advance_group(&mut self) -> Result<()> {
        while self.next_posting()?.is_some() {}
        if self.groups_left == 0 {
            self.term = None;
            return Ok(());
        }
        let term: String = bincode::deserialize_from(&mut self.reader).map_err(|e| self.corrupt(e))?;
        if let Some(prev) = &self.term {
            if *prev >= term {
                return Err(self.corrupt(format!("terms out of order: {prev:?} then {term:?}")));
            }
        }
        self.postings_left = self.reader.read_u32::<LittleEndian>().map_err(|e| self.corrupt(e))?;
        self.groups_left -= 1;
        self.term = Some(term);
        Ok(())
    }
}

/// Buffers `(term, doc, tf)` entries up to a fixed capacity and spills them
/// as sorted segments.
pub struct BlockSpiller {
    dir: PathBuf,
    capacity: usize,
    parallel_sort: bool,
    block: HashMap<String, Vec<Posting>>,
    entries: usize,
    next_segment: SegmentId,
}

impl BlockSpiller {
    pub fn new(dir: &Path, capacity: usize, parallel_sort: bool, next_segment: SegmentId) -> Self {
        Self {
            dir: dir.to_path_buf(),
            capacity: capacity.max(1),
            parallel_sort,
            block: HashMap::new(),
            entries: 0,
            next_segment,
        }
    }

    pub fn buffered_entries(&self) -> usize {
        self.entries
    }

    pub fn next_segment(&self) -> SegmentId {
        self.next_segment
    }

    /// Buffers one document. Capacity is checked by the caller through
    /// [`BlockSpiller::is_full`] so spills always land on document boundaries.
    pub fn add(&mut self, doc: DocTerms) {
        self.entries += doc.terms.len();
        for (term, tf) in doc.terms {
            self.block.entry(term).or_default().push(Posting { doc_id: doc.doc_id, tf });
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries >= self.capacity
    }

    /// Sorts the buffer by `(term, doc_id)` and writes it as the next segment.
    pub fn spill(&mut self) -> Result<Option<SegmentInfo>> {
        if self.entries == 0 {
            return Ok(None);
        }
        let mut groups: Vec<(String, Vec<Posting>)> = self.block.drain().collect();
        if self.parallel_sort {
            groups.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));
            groups.par_iter_mut().for_each(|(_, p)| p.sort_unstable_by_key(|p| p.doc_id));
        } else {
            groups.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            groups.iter_mut().for_each(|(_, p)| p.sort_unstable_by_key(|p| p.doc_id));
        }

        let mut writer = SegmentWriter::create(&self.dir, self.next_segment)?;
        for (term, postings) in &groups {
            writer.write_group(term, postings)?;
        }
        let info = writer.finish()?;
        tracing::debug!(segment = info.id, terms = info.terms, entries = info.entries, "spilled block");
        self.next_segment += 1;
        self.entries = 0;
        Ok(Some(info))
    }
}
