use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use wikisearch_core::{DocumentSource, Language, SearchError, SourceDocument};

/// One article as written by WikiExtractor (`{"id","url","title","text"}`).
#[derive(Debug, Deserialize)]
struct InputDoc {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "body")]
    text: String,
    #[serde(default, alias = "lang")]
    language: Option<String>,
}

enum Pending {
    Lines { path: PathBuf, lines: Lines<BufReader<File>>, line_no: usize },
    Buffered(VecDeque<SourceDocument>),
}

/// Streams documents from a file or a directory tree of JSON lines files.
///
/// Directories are walked in sorted order so that a resumed build sees the
/// documents in the same sequence.
pub struct JsonlSource {
    files: VecDeque<PathBuf>,
    current: Option<Pending>,
    min_text_chars: usize,
    short: u64,
    malformed: u64,
}

fn corpus_err(path: &Path, e: impl std::fmt::Display) -> SearchError {
    SearchError::CorpusRead(format!("{}: {e}", path.display()))
}

fn is_corpus_file(path: &Path) -> bool {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") | Some("jsonl") => true,
        Some(_) => false,
        // WikiExtractor names its output wiki_00, wiki_01, ...
        None => path.file_name().and_then(|s| s.to_str()).map_or(false, |n| n.starts_with("wiki_")),
    }
}

impl JsonlSource {
    pub fn open(input: &Path, min_text_chars: usize) -> Result<Self, SearchError> {
        let mut files = VecDeque::new();
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(|e| corpus_err(input, e))?;
                let p = entry.path();
                if p.is_file() && is_corpus_file(p) {
                    files.push_back(p.to_path_buf());
                }
            }
        } else if input.is_file() {
            files.push_back(input.to_path_buf());
        } else {
            return Err(corpus_err(input, "no such file or directory"));
        }
        tracing::info!(input = %input.display(), files = files.len(), "opened corpus");
        Ok(Self { files, current: None, min_text_chars, short: 0, malformed: 0 })
    }

    fn open_next_file(&mut self) -> Result<bool, SearchError> {
        let Some(path) = self.files.pop_front() else { return Ok(false) };
        let file = File::open(&path).map_err(|e| corpus_err(&path, e))?;
        let reader = BufReader::new(file);
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            let json: serde_json::Value = match serde_json::from_reader(reader) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed json file");
                    self.malformed += 1;
                    self.current = Some(Pending::Buffered(VecDeque::new()));
                    return Ok(true);
                }
            };
            let values = match json {
                serde_json::Value::Array(arr) => arr,
                obj @ serde_json::Value::Object(_) => vec![obj],
                _ => Vec::new(),
            };
            let mut docs = VecDeque::with_capacity(values.len());
            for v in values {
                match serde_json::from_value::<InputDoc>(v) {
                    Ok(doc) => docs.extend(self.accept(doc)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping malformed document");
                        self.malformed += 1;
                    }
                }
            }
            self.current = Some(Pending::Buffered(docs));
        } else {
            self.current = Some(Pending::Lines { path, lines: reader.lines(), line_no: 0 });
        }
        Ok(true)
    }

    fn accept(&mut self, doc: InputDoc) -> Option<SourceDocument> {
        let text = doc.text.trim();
        if text.chars().count() < self.min_text_chars {
            self.short += 1;
            return None;
        }
        let id = match doc.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        let language = doc.language.as_deref().and_then(|l| l.parse::<Language>().ok());
        Some(SourceDocument {
            id,
            title: doc.title,
            url: doc.url.unwrap_or_default(),
            text: text.to_string(),
            language,
        })
    }

    /// Articles dropped as too short and records that failed to parse.
    pub fn skipped(&self) -> (u64, u64) {
        (self.short, self.malformed)
    }
}

impl DocumentSource for JsonlSource {
    fn next_document(&mut self) -> Result<Option<SourceDocument>, SearchError> {
        loop {
            let next = match self.current.as_mut() {
                None => {
                    if !self.open_next_file()? {
                        return Ok(None);
                    }
                    continue;
                }
                Some(Pending::Buffered(docs)) => match docs.pop_front() {
                    Some(doc) => return Ok(Some(doc)),
                    None => None,
                },
                Some(Pending::Lines { path, lines, line_no }) => match lines.next() {
                    None => None,
                    Some(Err(e)) => return Err(corpus_err(path, e)),
                    Some(Ok(line)) => {
                        *line_no += 1;
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<InputDoc>(line) {
                            Ok(doc) => Some(doc),
                            Err(e) => {
                                tracing::warn!(path = %path.display(), line = *line_no, error = %e, "skipping malformed line");
                                self.malformed += 1;
                                continue;
                            }
                        }
                    }
                },
            };
            match next {
                Some(doc) => {
                    if let Some(doc) = self.accept(doc) {
                        return Ok(Some(doc));
                    }
                }
                None => self.current = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn long(word: &str) -> String {
        vec![word; 40].join(" ")
    }

    #[test]
    fn walks_directories_in_sorted_order() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("AB")).unwrap();
        fs::create_dir_all(dir.path().join("AA")).unwrap();
        let line = |id: &str| format!("{{\"id\": \"{id}\", \"url\": \"u\", \"title\": \"t\", \"text\": \"{}\"}}\n", long(id));
        fs::write(dir.path().join("AB/wiki_00"), line("3")).unwrap();
        fs::write(dir.path().join("AA/wiki_01"), line("2")).unwrap();
        fs::write(dir.path().join("AA/wiki_00"), format!("{}\n{}", line("0"), line("1"))).unwrap();
        fs::write(dir.path().join("AA/notes.txt"), "ignored").unwrap();

        let mut src = JsonlSource::open(dir.path(), 10).unwrap();
        let mut ids = Vec::new();
        while let Some(doc) = src.next_document().unwrap() {
            ids.push(doc.id);
        }
        assert_eq!(ids, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn skips_short_and_malformed_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let body = format!(
            "{{\"id\": 1, \"title\": \"ok\", \"text\": \"{}\", \"lang\": \"es\"}}\n\
             {{\"id\": 2, \"title\": \"short\", \"text\": \"tiny\"}}\n\
             not json at all\n\
             \n\
             {{\"id\": 3, \"title\": \"body\", \"body\": \"{}\"}}\n",
            long("uno"),
            long("dos")
        );
        fs::write(&path, body).unwrap();

        let mut src = JsonlSource::open(&path, 100).unwrap();
        let first = src.next_document().unwrap().unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(first.language, Some(Language::Es));
        assert_eq!(src.next_document().unwrap().unwrap().id, "3");
        assert!(src.next_document().unwrap().is_none());
        assert_eq!(src.skipped(), (1, 1));
    }

    #[test]
    fn reads_json_arrays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.json");
        let docs = serde_json::json!([
            {"id": "a", "title": "A", "text": long("alpha")},
            {"id": "b", "title": "B", "text": long("beta")}
        ]);
        fs::write(&path, docs.to_string()).unwrap();
        let mut src = JsonlSource::open(&path, 10).unwrap();
        assert_eq!(src.skip(1).unwrap(), 1);
        assert_eq!(src.next_document().unwrap().unwrap().id, "b");
        assert!(src.next_document().unwrap().is_none());
    }

    #[test]
    fn missing_input_is_a_corpus_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(JsonlSource::open(&dir.path().join("nope"), 0), Err(SearchError::CorpusRead(_))));
    }
}
