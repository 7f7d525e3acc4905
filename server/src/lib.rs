use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wikisearch_core::{Catalog, IndexStatistics, Language, SearchConfig, SearchError};

const DEFAULT_LANG: &str = "es";

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Signed so that non-positive values reach validation instead of
    /// failing deserialization.
    pub k: Option<i64>,
}

#[derive(Deserialize)]
pub struct LangParams {
    #[serde(default = "default_lang")]
    pub lang: String,
}

#[derive(Deserialize)]
pub struct AnalyzeParams {
    pub q: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub language: Language,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub external_id: String,
    pub score: f64,
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Serialize)]
pub struct LanguageInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub documents: u32,
    pub terms: u64,
    pub loaded: bool,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: IndexStatistics,
    pub loaded: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub admin_token: Option<String>,
}

/// JSON error body with a status derived from the core error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        let status = match &err {
            SearchError::QueryValidation(_) => StatusCode::BAD_REQUEST,
            SearchError::UnknownLanguage(_) => StatusCode::NOT_FOUND,
            SearchError::BuildInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn build_app(index_root: impl Into<PathBuf>, admin_token: Option<String>) -> Result<Router> {
    let catalog = Catalog::new(index_root.into(), SearchConfig::default());
    tracing::info!(root = %catalog.root().display(), languages = ?catalog.available_languages(), "serving indices");
    let app_state = AppState { catalog: Arc::new(catalog), admin_token };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/languages", get(languages_handler))
        .route("/stats", get(stats_handler))
        .route("/search", get(search_handler))
        .route("/doc/:lang/:doc_id", get(doc_handler))
        .route("/analyze", get(analyze_handler))
        .route("/admin/:lang/load", post(load_handler))
        .route("/admin/:lang/unload", post(unload_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

fn parse_lang(code: &str) -> Result<Language, ApiError> {
    code.parse::<Language>().map_err(ApiError::from)
}

/// Runs catalog work off the async executor; index loads and mmap reads block.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Catalog) -> wikisearch_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let catalog = state.catalog.clone();
    tokio::task::spawn_blocking(move || f(&catalog))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from)
}

pub async fn languages_handler(State(state): State<AppState>) -> Result<Json<Vec<LanguageInfo>>, ApiError> {
    let infos = blocking(&state, |catalog| {
        let mut infos = Vec::new();
        for lang in catalog.available_languages() {
            let stats = catalog.stats(lang)?;
            infos.push(LanguageInfo {
                code: lang.code(),
                name: lang.display_name(),
                documents: stats.total_documents,
                terms: stats.vocabulary_size,
                loaded: catalog.is_loaded(lang),
            });
        }
        Ok(infos)
    })
    .await?;
    Ok(Json(infos))
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Query(params): Query<LangParams>,
) -> Result<Json<StatsResponse>, ApiError> {
    let lang = parse_lang(&params.lang)?;
    let response = blocking(&state, move |catalog| {
        Ok(StatsResponse { stats: catalog.stats(lang)?, loaded: catalog.is_loaded(lang) })
    })
    .await?;
    Ok(Json(response))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let lang = parse_lang(&params.lang)?;
    let k = match params.k {
        None => state.catalog.config().default_k,
        Some(k) if k <= 0 => {
            return Err(SearchError::QueryValidation(format!("k must be positive, got {k}")).into());
        }
        Some(k) => k as usize,
    };

    let query = params.q.clone();
    let found = blocking(&state, move |catalog| catalog.search(&query, lang, k)).await?;

    // Capture raw query terms for highlighting
    let raw_terms: Vec<String> = params
        .q
        .split_whitespace()
        .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let results = found
        .hits
        .into_iter()
        .map(|hit| SearchHit {
            doc_id: hit.doc_id,
            external_id: hit.meta.external_id,
            score: hit.score,
            title: hit.meta.title,
            url: hit.meta.url,
            snippet: highlight_terms(&hit.meta.snippet, &raw_terms),
        })
        .collect();

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query: params.q,
        language: lang,
        took_ms: elapsed.as_millis(),
        took_s: elapsed.as_secs_f64(),
        total_hits: found.total_hits,
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path((lang, doc_id)): Path<(String, u32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lang = parse_lang(&lang)?;
    match blocking(&state, move |catalog| catalog.document(lang, doc_id)).await? {
        Some(meta) => Ok(Json(serde_json::json!({
            "doc_id": doc_id,
            "language": lang,
            "external_id": meta.external_id,
            "title": meta.title,
            "url": meta.url,
            "snippet": meta.snippet,
        }))),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, format!("document {doc_id} not found"))),
    }
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Json<wikisearch_core::QueryAnalysis>, ApiError> {
    let lang = parse_lang(&params.lang)?;
    let analysis = blocking(&state, move |catalog| catalog.analyze(&params.q, lang)).await?;
    Ok(Json(analysis))
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        let Ok(pat) = regex::RegexBuilder::new(&format!(r"\b{}\b", regex::escape(t)))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}

// --- Admin endpoints ---
async fn load_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(lang): Path<String>,
) -> Result<Json<IndexStatistics>, ApiError> {
    authorize(&state, &headers)?;
    let lang = parse_lang(&lang)?;
    let stats = blocking(&state, move |catalog| catalog.load(lang)).await?;
    Ok(Json(stats))
}

async fn unload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(lang): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let lang = parse_lang(&lang)?;
    let unloaded = state.catalog.unload(lang);
    Ok(Json(serde_json::json!({ "language": lang, "unloaded": unloaded })))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err(ApiError::new(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set")),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_whole_words_case_insensitively() {
        let out = highlight_terms("Cats and cat-like catalogs", &["cat".to_string()]);
        assert_eq!(out, "Cats and <em>cat</em>-like catalogs");
    }

    #[test]
    fn status_follows_error_kind() {
        let e: ApiError = SearchError::QueryValidation("k".into()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        let e: ApiError = SearchError::UnknownLanguage("xx".into()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        let e: ApiError = SearchError::BuildInProgress(Language::Es).into();
        assert_eq!(e.status, StatusCode::CONFLICT);
    }
}
