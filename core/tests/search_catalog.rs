use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use wikisearch_core::persist::{
    read_idf_table, read_term_dictionary, ArtifactHeader, ArtifactKind, IdfWriter, IndexPaths,
};
use wikisearch_core::{
    from_documents, Analyzer, BuildConfig, BuildOptions, Catalog, IndexBuilder, Language, SearchConfig, SearchError,
    SourceDocument,
};

fn build_english_with(root: &Path, texts: &[(&str, &str)], options: &BuildOptions) {
    let analyzer = Analyzer::for_language(Language::En);
    let config = BuildConfig { buffer_capacity: 8, merge_fan_in: 2, ..Default::default() };
    let docs = texts.iter().map(|(id, text)| SourceDocument::new(*id, format!("About {id}"), *text));
    IndexBuilder::new(root, Language::En, config, &analyzer)
        .build(&mut from_documents(docs), options)
        .unwrap();
}

fn build_english(root: &Path, texts: &[(&str, &str)]) {
    build_english_with(root, texts, &BuildOptions::default());
}

fn assert_corrupt(result: wikisearch_core::Result<impl std::fmt::Debug>, needle: &str) {
    match result {
        Err(SearchError::CorruptIndex { reason, .. }) => {
            assert!(reason.contains(needle), "unexpected reason: {reason}")
        }
        other => panic!("expected CorruptIndex, got {other:?}"),
    }
}

fn three_docs(root: &Path) {
    build_english(root, &[("doc1", "cat dog"), ("doc2", "dog bird"), ("doc3", "cat bird fish")]);
}

#[test]
fn cat_ranks_by_document_norm() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Catalog::new(dir.path(), SearchConfig::default());

    let results = catalog.search("cat", Language::En, 10).unwrap();
    let ids: Vec<&str> = results.hits.iter().map(|h| h.meta.external_id.as_str()).collect();
    assert_eq!(ids, vec!["doc1", "doc3"]);
    assert_eq!(results.total_hits, 2);

    let ln = (1.5f64).ln();
    let expected_doc1 = ln / (2f64.sqrt() * ln);
    let expected_doc3 = ln / (2.0 * ln * ln + 3f64.ln().powi(2)).sqrt();
    assert!((results.hits[0].score - expected_doc1).abs() < 1e-12);
    assert!((results.hits[1].score - expected_doc3).abs() < 1e-12);
    assert_eq!(results.hits[0].meta.title, "About doc1");
}

#[test]
fn ties_rank_by_ascending_doc_id() {
    let dir = tempdir().unwrap();
    build_english(
        dir.path(),
        &[
            ("a", "apple pie"),
            ("b", "grape juice"),
            ("c", "apple pie"),
            ("d", "apple pie"),
            ("e", "apple pie"),
            ("f", "lemon tart"),
        ],
    );
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    for _ in 0..3 {
        let results = catalog.search("apple", Language::En, 3).unwrap();
        let doc_ids: Vec<u32> = results.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(doc_ids, vec![0, 2, 3]);
        assert_eq!(results.total_hits, 4);
        assert_eq!(results.hits[0].score, results.hits[2].score);
    }
}

#[test]
fn stopword_only_documents_are_never_returned() {
    let dir = tempdir().unwrap();
    build_english(
        dir.path(),
        &[("empty", "the and of to"), ("cats", "cats sleeping"), ("dogs", "dogs barking")],
    );
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert_eq!(catalog.stats(Language::En).unwrap().total_documents, 2);

    let results = catalog.search("cats the", Language::En, 10).unwrap();
    assert_eq!(results.hits.len(), 1);
    assert_eq!(results.hits[0].meta.external_id, "cats");

    let nothing = catalog.search("the of", Language::En, 10).unwrap();
    assert!(nothing.hits.is_empty());
    for doc_id in 0..2 {
        let meta = catalog.document(Language::En, doc_id).unwrap().unwrap();
        assert_ne!(meta.external_id, "empty");
    }
    assert!(catalog.document(Language::En, 2).unwrap().is_none());
}

#[test]
fn unknown_terms_give_empty_results() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    let results = catalog.search("zebra", Language::En, 5).unwrap();
    assert!(results.hits.is_empty());
    assert_eq!(results.total_hits, 0);
}

#[test]
fn invalid_queries_are_rejected() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert!(matches!(catalog.search("cat", Language::En, 0), Err(SearchError::QueryValidation(_))));
    assert!(matches!(catalog.search("   ", Language::En, 5), Err(SearchError::QueryValidation(_))));
    assert!(matches!(catalog.search("cat", Language::En, 101), Err(SearchError::QueryValidation(_))));
    assert!(matches!(catalog.search("gato", Language::Es, 5), Err(SearchError::UnknownLanguage(_))));
    assert!(matches!(catalog.stats(Language::Pt), Err(SearchError::UnknownLanguage(_))));
}

#[test]
fn reload_gives_identical_results() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert!(!catalog.is_loaded(Language::En));
    let first = catalog.search("bird cat", Language::En, 10).unwrap();
    assert!(catalog.is_loaded(Language::En));
    assert!(catalog.unload(Language::En));
    assert!(!catalog.is_loaded(Language::En));
    let second = catalog.search("bird cat", Language::En, 10).unwrap();
    assert_eq!(first, second);
}

#[test]
fn stats_do_not_load_postings() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert_eq!(catalog.available_languages(), vec![Language::En]);
    let stats = catalog.stats(Language::En).unwrap();
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.vocabulary_size, 4);
    assert!(!catalog.is_loaded(Language::En));
    assert_eq!(catalog.load(Language::En).unwrap().total_documents, 3);
    assert!(catalog.is_loaded(Language::En));
}

#[test]
fn concurrent_first_queries_share_one_index() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Arc::new(Catalog::new(dir.path(), SearchConfig::default()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let catalog = catalog.clone();
            std::thread::spawn(move || catalog.search("dog", Language::En, 5).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0].hits.len(), 2);

    catalog.unload(Language::En);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let catalog = catalog.clone();
            std::thread::spawn(move || catalog.index(Language::En).unwrap())
        })
        .collect();
    let indices: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(indices.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert!(Arc::ptr_eq(&indices[0], &catalog.index(Language::En).unwrap()));
}

#[test]
fn loaded_index_is_never_mixed_with_a_newer_build() {
    let dir = tempdir().unwrap();
    build_english(dir.path(), &[("old0", "cat dog"), ("old1", "bird fish"), ("old2", "cow pig")]);
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert_eq!(catalog.document(Language::En, 0).unwrap().unwrap().external_id, "old0");

    let rebuild = BuildOptions { rebuild: true, ..Default::default() };
    build_english_with(
        dir.path(),
        &[("new0", "zebra lion"), ("new1", "cat mouse"), ("new2", "owl hawk")],
        &rebuild,
    );

    // The loaded build keeps answering until it is unloaded.
    let results = catalog.search("cat", Language::En, 5).unwrap();
    assert_eq!(results.hits.len(), 1);
    assert_eq!(results.hits[0].meta.external_id, "old0");
    assert!(results.hits[0].meta.snippet.contains("cat"));

    assert!(catalog.unload(Language::En));
    let results = catalog.search("cat", Language::En, 5).unwrap();
    assert_eq!(results.hits.len(), 1);
    assert_eq!(results.hits[0].doc_id, 1);
    assert_eq!(results.hits[0].meta.external_id, "new1");
    assert!(results.hits[0].meta.snippet.contains("cat"));
}

#[test]
fn corrupt_artifacts_are_refused() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let index = IndexPaths::new(dir.path(), Language::En).published();
    let mut postings = fs::read(index.postings()).unwrap();
    postings.truncate(postings.len() - 8);
    fs::write(index.postings(), postings).unwrap();

    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert!(matches!(catalog.search("cat", Language::En, 5), Err(SearchError::CorruptIndex { .. })));
    assert!(!catalog.is_loaded(Language::En));

    fs::write(index.norms(), b"not a norms table").unwrap();
    assert!(matches!(catalog.load(Language::En), Err(SearchError::CorruptIndex { .. })));
}

#[test]
fn idf_df_disagreeing_with_dictionary_is_refused() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let index = IndexPaths::new(dir.path(), Language::En).published();

    let mut table = read_idf_table(&index.idf(), Language::En).unwrap();
    let fish = table.entries.iter_mut().find(|e| e.term == "fish").unwrap();
    fish.df += 1;
    let mut writer = IdfWriter::create(&index.idf(), table.num_docs).unwrap();
    for entry in &table.entries {
        writer.push(entry).unwrap();
    }
    writer.finish().unwrap();

    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert_corrupt(catalog.load(Language::En), "does not match dictionary");
    assert!(!catalog.is_loaded(Language::En));
}

#[test]
fn df_disagreeing_with_postings_length_is_refused() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let index = IndexPaths::new(dir.path(), Language::En).published();

    // Dictionary and idf table agree with each other, not with postings.bin.
    let mut terms = read_term_dictionary(&index.terms(), Language::En).unwrap();
    terms.iter_mut().find(|e| e.term == "fish").unwrap().df = 2;
    let mut bytes = ArtifactHeader::new(ArtifactKind::Terms, terms.len() as u64).to_bytes();
    for entry in &terms {
        bytes.extend(bincode::serialize(entry).unwrap());
    }
    fs::write(index.terms(), bytes).unwrap();

    let mut table = read_idf_table(&index.idf(), Language::En).unwrap();
    table.entries.iter_mut().find(|e| e.term == "fish").unwrap().df = 2;
    let mut writer = IdfWriter::create(&index.idf(), table.num_docs).unwrap();
    for entry in &table.entries {
        writer.push(entry).unwrap();
    }
    writer.finish().unwrap();

    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert_corrupt(catalog.search("fish", Language::En, 5), "postings are stored");
}

#[test]
fn metadata_shorter_than_index_is_refused() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let smaller = tempdir().unwrap();
    build_english(smaller.path(), &[("doc1", "cat dog"), ("doc2", "dog bird")]);

    let index = IndexPaths::new(dir.path(), Language::En).published();
    let donor = IndexPaths::new(smaller.path(), Language::En).published();
    fs::copy(donor.docs(), index.docs()).unwrap();
    fs::copy(donor.docs_index(), index.docs_index()).unwrap();

    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    assert_corrupt(catalog.document(Language::En, 0), "metadata holds 2 documents");
    assert_corrupt(catalog.search("fish", Language::En, 5), "metadata holds 2 documents");
    assert!(!catalog.is_loaded(Language::En));
}

#[test]
fn analysis_reports_term_weights() {
    let dir = tempdir().unwrap();
    three_docs(dir.path());
    let catalog = Catalog::new(dir.path(), SearchConfig::default());
    let analysis = catalog.analyze("The cats and the fish", Language::En).unwrap();
    assert_eq!(analysis.analysis.tokens, vec!["the", "cats", "and", "the", "fish"]);
    assert_eq!(analysis.analysis.stems, vec!["cat", "fish"]);
    let fish = analysis.terms.iter().find(|t| t.term == "fish").unwrap();
    assert_eq!(fish.df, Some(1));
    assert!((fish.weight - 3f64.ln()).abs() < 1e-12);
}
