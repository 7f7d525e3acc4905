//! Durable build progress, one record per language.
//!
//! The record is rewritten atomically (temp file, fsync, rename) on every
//! transition. A record that cannot be parsed is treated as absent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SearchError};
use crate::index::{DocId, SegmentId};
use crate::language::Language;
use crate::persist::write_atomic;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Build phases in execution order. A checkpoint at phase `P` means the
/// outputs of `P` are durable and the next phase may consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Empty,
    DocumentsScanned,
    TermsSpilled,
    Merged,
    WeightsComputed,
    Complete,
}

impl BuildPhase {
    pub fn next(self) -> Option<BuildPhase> {
        match self {
            BuildPhase::Empty => Some(BuildPhase::DocumentsScanned),
            BuildPhase::DocumentsScanned => Some(BuildPhase::TermsSpilled),
            BuildPhase::TermsSpilled => Some(BuildPhase::Merged),
            BuildPhase::Merged => Some(BuildPhase::WeightsComputed),
            BuildPhase::WeightsComputed => Some(BuildPhase::Complete),
            BuildPhase::Complete => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Empty => "empty",
            BuildPhase::DocumentsScanned => "documents_scanned",
            BuildPhase::TermsSpilled => "terms_spilled",
            BuildPhase::Merged => "merged",
            BuildPhase::WeightsComputed => "weights_computed",
            BuildPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildPhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.replace('-', "_").to_lowercase().as_str() {
            "empty" => Ok(BuildPhase::Empty),
            "documents_scanned" | "scanned" => Ok(BuildPhase::DocumentsScanned),
            "terms_spilled" | "spilled" => Ok(BuildPhase::TermsSpilled),
            "merged" => Ok(BuildPhase::Merged),
            "weights_computed" | "weighted" => Ok(BuildPhase::WeightsComputed),
            "complete" => Ok(BuildPhase::Complete),
            other => Err(format!("unknown build phase: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub language: Language,
    pub phase: BuildPhase,
    /// Source documents consumed, including rejected ones.
    pub documents_processed: u64,
    /// Documents that received an id.
    pub documents_indexed: DocId,
    /// Segments holding every spilled entry so far.
    pub segments: Vec<SegmentId>,
    pub next_segment: SegmentId,
    /// Durable length of the staged metadata log.
    pub staged_metadata_bytes: u64,
    /// Wall-clock seconds spent across all runs of this build.
    pub elapsed_secs: f64,
    pub updated_at: String,
}

impl Checkpoint {
    pub fn new(language: Language) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            language,
            phase: BuildPhase::Empty,
            documents_processed: 0,
            documents_indexed: 0,
            segments: Vec::new(),
            next_segment: 0,
            staged_metadata_bytes: 0,
            elapsed_secs: 0.0,
            updated_at: now_rfc3339(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == BuildPhase::Complete
    }
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Loads and stores the checkpoint of one language.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    path: PathBuf,
    language: Language,
}

impl CheckpointManager {
    pub fn new(path: impl AsRef<Path>, language: Language) -> Self {
        Self { path: path.as_ref().to_path_buf(), language }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last durable checkpoint. Missing, unparseable or foreign records
    /// all read as `None`.
    pub fn load(&self) -> Option<Checkpoint> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot read checkpoint, starting over");
                return None;
            }
        };
        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(cp) if cp.version == CHECKPOINT_VERSION && cp.language == self.language => Some(cp),
            Ok(cp) => {
                tracing::warn!(version = cp.version, language = %cp.language, "checkpoint does not match this build, starting over");
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unparseable checkpoint, starting over");
                None
            }
        }
    }

    pub fn store(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.updated_at = now_rfc3339();
        let json = serde_json::to_vec_pretty(checkpoint)?;
        write_atomic(&self.path, &json).map_err(|source| SearchError::Checkpoint { path: self.path.clone(), source })?;
        tracing::debug!(
            language = %self.language,
            phase = %checkpoint.phase,
            documents_processed = checkpoint.documents_processed,
            "checkpoint stored"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SearchError::Checkpoint { path: self.path.clone(), source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn phases_advance_in_order() {
        let mut phase = BuildPhase::Empty;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(phase, BuildPhase::Complete);
        assert_eq!("terms-spilled".parse::<BuildPhase>().unwrap(), BuildPhase::TermsSpilled);
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path().join("checkpoint.json"), Language::Pt);
        assert!(mgr.load().is_none());
        let mut cp = Checkpoint::new(Language::Pt);
        cp.phase = BuildPhase::Merged;
        cp.documents_processed = 12;
        cp.segments = vec![3, 4];
        mgr.store(&mut cp).unwrap();
        assert_eq!(mgr.load().unwrap(), cp);
        mgr.clear().unwrap();
        assert!(mgr.load().is_none());
    }

    #[test]
    fn garbage_reads_as_no_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"{\"version\": 1, \"phase\": \"mer").unwrap();
        assert!(CheckpointManager::new(&path, Language::Es).load().is_none());
    }

    #[test]
    fn other_language_reads_as_no_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut cp = Checkpoint::new(Language::Es);
        CheckpointManager::new(&path, Language::Es).store(&mut cp).unwrap();
        assert!(CheckpointManager::new(&path, Language::Ca).load().is_none());
    }
}
