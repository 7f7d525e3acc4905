use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::path::Path;

use crate::error::{Result, SearchError};
use crate::index::{DocId, Posting, SegmentId};
use crate::language::Language;
use crate::spill::{segment_path, SegmentReader, SegmentWriter};

/// Receives merged postings one term at a time, in ascending term order.
pub trait PostingsSink {
    fn accept(&mut self, term: &str, postings: &[Posting]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub terms: u64,
    pub postings: u64,
    /// `(term, doc)` pairs found in more than one segment and summed.
    pub duplicates: u64,
}

/// k-way merge over sorted segments.
///
/// An outer heap orders the cursors by their current term; the cursors that
/// share the smallest term are merged through an inner heap keyed by doc id.
/// Only one term's postings are ever materialized.
pub struct BlockMerger {
    cursors: Vec<SegmentReader>,
    language: Language,
}

impl BlockMerger {
    pub fn open(dir: &Path, segments: &[SegmentId], language: Language) -> Result<Self> {
        let cursors = segments
            .iter()
            .map(|&id| SegmentReader::open(dir, id, language))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { cursors, language })
    }

    pub fn merge_into<S: PostingsSink>(mut self, sink: &mut S) -> Result<MergeSummary> {
        let mut summary = MergeSummary::default();
        let mut terms: BinaryHeap<Reverse<(String, usize)>> = self
            .cursors
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.term().map(|t| Reverse((t.to_string(), i))))
            .collect();

        let mut group: Vec<usize> = Vec::new();
        let mut postings: Vec<Posting> = Vec::new();
        while let Some(Reverse((term, first))) = terms.pop() {
            group.clear();
            group.push(first);
            while let Some(Reverse((next, _))) = terms.peek() {
                if *next != term {
                    break;
                }
                if let Some(Reverse((_, i))) = terms.pop() {
                    group.push(i);
                }
            }

            postings.clear();
            summary.duplicates += self.merge_group(&term, &group, &mut postings)?;
            if !postings.is_empty() {
                sink.accept(&term, &postings)?;
                summary.terms += 1;
                summary.postings += postings.len() as u64;
            }

            for &i in &group {
                let cursor = &mut self.cursors[i];
                cursor.advance_group()?;
                if let Some(t) = cursor.term() {
                    terms.push(Reverse((t.to_string(), i)));
                }
            }
        }
        Ok(summary)
    }

    /// Merges the current group of every cursor in `group` by doc id.
    fn merge_group(&mut self, term: &str, group: &[usize], out: &mut Vec<Posting>) -> Result<u64> {
        let mut duplicates = 0;
        let mut docs: BinaryHeap<Reverse<(DocId, usize, u32)>> = BinaryHeap::with_capacity(group.len());
        for &i in group {
            if let Some(p) = self.cursors[i].next_posting()? {
                docs.push(Reverse((p.doc_id, i, p.tf)));
            }
        }
        while let Some(Reverse((doc_id, i, tf))) = docs.pop() {
            match out.last_mut() {
                Some(last) if last.doc_id == doc_id => {
                    tracing::warn!(language = %self.language, term, doc_id, "duplicate posting across segments, summing");
                    last.tf += tf;
                    duplicates += 1;
                }
                Some(last) if last.doc_id > doc_id => {
                    return Err(SearchError::corrupt(
                        self.language,
                        format!("segment {} has unsorted postings for {term:?}", self.cursors[i].id()),
                    ));
                }
                _ => out.push(Posting { doc_id, tf }),
            }
            if let Some(p) = self.cursors[i].next_posting()? {
                if p.doc_id <= doc_id {
                    return Err(SearchError::corrupt(
                        self.language,
                        format!("segment {} has unsorted postings for {term:?}", self.cursors[i].id()),
                    ));
                }
                docs.push(Reverse((p.doc_id, i, p.tf)));
            }
        }
        Ok(duplicates)
    }
}

/// Merges runs of `fan_in` segments into larger ones until at most `fan_in`
/// remain.
///
/// After each step `record(live, next_segment)` must make the new segment set
/// durable; the inputs are deleted only afterwards. Returns the final live
/// set and the next free segment id.
pub fn compact_segments<F>(
    dir: &Path,
    language: Language,
    live: &[SegmentId],
    fan_in: usize,
    mut next_segment: SegmentId,
    mut record: F,
) -> Result<(Vec<SegmentId>, SegmentId)>
where
    F: FnMut(&[SegmentId], SegmentId) -> Result<()>,
{
    let fan_in = fan_in.max(2);
    let mut live = live.to_vec();
    while live.len() > fan_in {
        let inputs: Vec<SegmentId> = live.drain(..fan_in).collect();
        let mut writer = SegmentWriter::create(dir, next_segment)?;
        let summary = BlockMerger::open(dir, &inputs, language)?.merge_into(&mut writer)?;
        let info = writer.finish()?;
        tracing::info!(
            language = %language,
            inputs = inputs.len(),
            output = info.id,
            terms = summary.terms,
            postings = summary.postings,
            "compacted segments"
        );
        live.push(info.id);
        next_segment += 1;
        record(&live, next_segment)?;
        for id in inputs {
            let path = segment_path(dir, id);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove merged segment");
            }
        }
    }
    Ok((live, next_segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Collect(Vec<(String, Vec<Posting>)>);

    impl PostingsSink for Collect {
        fn accept(&mut self, term: &str, postings: &[Posting]) -> Result<()> {
            self.0.push((term.to_string(), postings.to_vec()));
            Ok(())
        }
    }

    fn write_segment(dir: &Path, id: SegmentId, groups: Vec<(&str, Vec<(DocId, u32)>)>) {
        let mut w = SegmentWriter::create(dir, id).unwrap();
        for (term, postings) in &groups {
            let postings: Vec<Posting> = postings.iter().map(|&(d, tf)| Posting::new(d, tf)).collect();
            w.write_group(term, &postings).unwrap();
        }
        w.finish().unwrap();
    }

    #[test]
    fn merges_terms_across_segments() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 0, vec![("bird", vec![(1, 1)]), ("cat", vec![(0, 1)])]);
        write_segment(dir.path(), 1, vec![("cat", vec![(2, 3)]), ("dog", vec![(2, 1)])]);
        write_segment(dir.path(), 2, vec![("ant", vec![(4, 2)]), ("cat", vec![(3, 1)])]);

        let mut sink = Collect::default();
        let summary = BlockMerger::open(dir.path(), &[0, 1, 2], Language::En)
            .unwrap()
            .merge_into(&mut sink)
            .unwrap();
        assert_eq!(summary, MergeSummary { terms: 4, postings: 6, duplicates: 0 });
        let terms: Vec<&str> = sink.0.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(terms, vec!["ant", "bird", "cat", "dog"]);
        assert_eq!(sink.0[2].1, vec![Posting::new(0, 1), Posting::new(2, 3), Posting::new(3, 1)]);
    }

    #[test]
    fn duplicate_pairs_are_summed() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 0, vec![("cat", vec![(0, 1)])]);
        write_segment(dir.path(), 1, vec![("cat", vec![(0, 2)])]);
        let mut sink = Collect::default();
        let summary = BlockMerger::open(dir.path(), &[0, 1], Language::En)
            .unwrap()
            .merge_into(&mut sink)
            .unwrap();
        assert_eq!(summary.duplicates, 1);
        assert_eq!(sink.0[0].1, vec![Posting::new(0, 3)]);
    }

    #[test]
    fn compaction_bounds_live_segments() {
        let dir = tempdir().unwrap();
        for id in 0..5u32 {
            write_segment(dir.path(), id, vec![("t", vec![(id, 1)])]);
        }
        let mut recorded = Vec::new();
        let (live, next) = compact_segments(dir.path(), Language::En, &[0, 1, 2, 3, 4], 2, 5, |live, next| {
            recorded.push((live.to_vec(), next));
            Ok(())
        })
        .unwrap();
        assert!(live.len() <= 2);
        assert_eq!(recorded.last().unwrap(), &(live.clone(), next));
        assert!(!segment_path(dir.path(), 0).exists());

        let mut sink = Collect::default();
        BlockMerger::open(dir.path(), &live, Language::En).unwrap().merge_into(&mut sink).unwrap();
        let docs: Vec<DocId> = sink.0[0].1.iter().map(|p| p.doc_id).collect();
        assert_eq!(docs, vec![0, 1, 2, 3, 4]);
    }
}
