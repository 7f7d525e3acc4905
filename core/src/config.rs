use serde::{Deserialize, Serialize};

use crate::checkpoint::BuildPhase;

/// Tuning knobs for an index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Maximum `(term, doc, tf)` entries held in memory before a spill.
    pub buffer_capacity: usize,
    /// Maximum number of segments opened by one merge.
    pub merge_fan_in: usize,
    /// Characters of text stored as the result snippet.
    pub snippet_chars: usize,
    /// Sort spill buffers with rayon.
    pub parallel_sort: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { buffer_capacity: 2_000_000, merge_fan_in: 64, snippet_chars: 300, parallel_sort: true }
    }
}

impl BuildConfig {
    pub(crate) fn sanitized(mut self) -> Self {
        self.buffer_capacity = self.buffer_capacity.max(1);
        self.merge_fan_in = self.merge_fan_in.max(2);
        self
    }
}

/// Per-run options that are not part of the persistent configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Stop once this phase has been durably recorded.
    pub halt_after: Option<BuildPhase>,
    /// Discard existing build state and start over.
    pub rebuild: bool,
    /// Stop reading the source after this many documents.
    pub max_docs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_k: 20, max_k: 100 }
    }
}
