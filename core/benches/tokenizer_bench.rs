use criterion::{criterion_group, criterion_main, Criterion};
use wikisearch_core::{Analyzer, Language, Preprocessor};

const ARTICLE: &str = "La Biblioteca Nacional de España es un organismo autónomo encargado del depósito \
del patrimonio bibliográfico y documental de España. Es la primera biblioteca del país y cabecera del \
sistema español de bibliotecas. Alberga más de treinta millones de publicaciones producidas en territorio \
español desde comienzos del siglo XVIII: libros, revistas, mapas, grabados, dibujos, partituras y folletos.";

fn bench_normalize(c: &mut Criterion) {
    let analyzer = Analyzer::for_language(Language::Es);
    let text = ARTICLE.repeat(20);
    c.bench_function("normalize_es_article", |b| b.iter(|| analyzer.normalize(&text)));
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
