use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::tempdir;
use tower::ServiceExt;
use wikisearch_core::{from_documents, Analyzer, BuildConfig, BuildOptions, IndexBuilder, Language, SourceDocument};

const TOKEN: &str = "s3cret";

fn build_tiny_index(dir: &std::path::Path) {
    let analyzer = Analyzer::for_language(Language::En);
    let docs = vec![
        SourceDocument { url: "https://en.example.org/1".into(), ..SourceDocument::new("doc1", "Doc 1", "cat dog") },
        SourceDocument { url: "https://en.example.org/2".into(), ..SourceDocument::new("doc2", "Doc 2", "dog bird") },
        SourceDocument {
            url: "https://en.example.org/3".into(),
            ..SourceDocument::new("doc3", "Doc 3", "cat bird fish")
        },
    ];
    IndexBuilder::new(dir, Language::En, BuildConfig::default(), &analyzer)
        .build(&mut from_documents(docs), &BuildOptions::default())
        .unwrap();
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn call(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn app(dir: &std::path::Path) -> Router {
    server::build_app(dir, Some(TOKEN.to_string())).unwrap()
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let (status, json) = call(app(dir.path()), "/search?q=cat&lang=en&k=2").await;
    assert_eq!(status, StatusCode::OK);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["external_id"], "doc1");
    assert_eq!(arr[1]["external_id"], "doc3");
    assert_eq!(arr[0]["doc_id"].as_u64().unwrap(), 0);
    assert_eq!(arr[0]["snippet"], "<em>cat</em> dog");
    assert_eq!(arr[0]["url"], "https://en.example.org/1");
    assert_eq!(json["total_hits"], 2);
    assert_eq!(json["language"], "en");
}

#[tokio::test]
async fn invalid_requests_map_to_client_errors() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let (status, json) = call(app(dir.path()), "/search?q=cat&lang=en&k=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("k"));

    let (status, _) = call(app(dir.path()), "/search?q=%20%20&lang=en").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app(dir.path()), "/search?q=cat&lang=xx").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(app(dir.path()), "/search?q=gato&lang=pt").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn documents_and_stats_are_served() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let (status, json) = call(app(dir.path()), "/doc/en/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], "Doc 3");

    let (status, _) = call(app(dir.path()), "/doc/en/9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = call(app(dir.path()), "/stats?lang=en").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_documents"], 3);
    assert_eq!(json["loaded"], false);

    let (status, json) = call(app(dir.path()), "/languages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["code"], "en");
    assert_eq!(json[0]["documents"], 3);
}

#[tokio::test]
async fn analyze_shows_pipeline() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let (status, json) = call(app(dir.path()), "/analyze?q=The%20Cats&lang=en").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["analysis"]["stems"][0], "cat");
    assert_eq!(json["terms"][0]["df"], 2);
}

#[tokio::test]
async fn admin_endpoints_require_token() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());

    let req = Request::post("/admin/en/load").body(Body::empty()).unwrap();
    let (status, _) = send(app(dir.path()), req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let app = app(dir.path());
    let req = Request::post("/admin/en/load").header("X-ADMIN-TOKEN", TOKEN).body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["vocabulary_size"], 4);

    let (_, json) = call(app.clone(), "/stats?lang=en").await;
    assert_eq!(json["loaded"], true);

    let req = Request::post("/admin/en/unload").header("X-ADMIN-TOKEN", TOKEN).body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["unloaded"], true);
}
