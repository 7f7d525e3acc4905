use crate::error::Result;
use crate::index::SourceDocument;

/// Yields each document of a corpus exactly once.
///
/// Resuming an interrupted scan skips the documents already processed, so a
/// source must replay the same order when it is reopened.
pub trait DocumentSource {
    fn next_document(&mut self) -> Result<Option<SourceDocument>>;

    /// Discards `n` documents. Returns how many were actually skipped.
    fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            if self.next_document()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }
}

/// Adapts an iterator of documents (or of fallible documents).
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I> {
    pub fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I> DocumentSource for IterSource<I>
where
    I: Iterator<Item = Result<SourceDocument>>,
{
    fn next_document(&mut self) -> Result<Option<SourceDocument>> {
        self.inner.next().transpose()
    }
}

/// Builds an [`IterSource`] over infallible documents.
pub fn from_documents<I>(docs: I) -> IterSource<impl Iterator<Item = Result<SourceDocument>>>
where
    I: IntoIterator<Item = SourceDocument>,
{
    IterSource::new(docs.into_iter().map(Ok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_stops_at_end() {
        let mut src = from_documents((0..3).map(|i| SourceDocument::new(i.to_string(), "", "x")));
        assert_eq!(src.skip(2).unwrap(), 2);
        assert_eq!(src.next_document().unwrap().unwrap().id, "2");
        assert_eq!(src.skip(5).unwrap(), 0);
    }
}
