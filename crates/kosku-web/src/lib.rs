//! Axum JSON API for the kost search service.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kosku_core::{KostCategory, SearchFilters};
use kosku_search::{simulated_sync_listing, AppConfig, SearchService};
use kosku_store::ListingFileStore;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "kosku-web";

pub struct AppState {
    pub search: SearchService,
    pub store: ListingFileStore,
}

impl AppState {
    pub fn new(search: SearchService, store: ListingFileStore) -> Self {
        Self { search, store }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        Ok(Self {
            search: SearchService::from_config(&config)?,
            store: ListingFileStore::new(config.listings_path),
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search_handler).post(chat_handler))
        .route("/api/kosts", get(kosts_handler))
        .route("/api/sync", post(sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "kosku web API listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct SearchQuery {
    location: Option<String>,
    #[serde(rename = "maxBudget")]
    max_budget: Option<u64>,
    facilities: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn filters_from_query(query: SearchQuery) -> SearchFilters {
    SearchFilters {
        location: query.location.unwrap_or_default(),
        max_budget: query.max_budget.unwrap_or(1_000_000),
        facilities: query
            .facilities
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        category: query
            .kind
            .map(|kind| KostCategory::parse_or(&kind, KostCategory::Semua))
            .unwrap_or(KostCategory::Semua),
    }
}

/// `GET /api/search`: filter search. The search path always answers, so
/// this handler has no failure branch of its own.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let filters = filters_from_query(query);
    let hits = state.search.search(&filters).await;
    Json(hits).into_response()
}

#[derive(Debug, Deserialize, Default)]
struct ChatRequest {
    message: Option<String>,
}

/// `POST /api/search`: chat entry point. A message that yields extractable
/// filters runs a search; anything else gets a conversational reply.
async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let Some(message) = request.message.filter(|m| !m.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Message is required" })),
        )
            .into_response();
    };

    if let Some(filters) = state.search.extract_filters(&message).await {
        let results = state.search.search(&filters).await;
        return Json(json!({ "results": results, "filters": filters })).into_response();
    }

    let reply = state.search.chat_reply(&message).await;
    Json(json!({ "message": reply, "type": "chat" })).into_response()
}

/// `GET /api/kosts`: the static listing file, verbatim.
async fn kosts_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.load().await {
        Ok(listings) => Json(listings).into_response(),
        Err(err) => server_error("Failed to load kosts", err),
    }
}

/// `POST /api/sync`: placeholder integration that appends one simulated
/// listing to the listing file until a real marketplace push exists.
async fn sync_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.append(simulated_sync_listing()).await {
        Ok(_total) => Json(json!({
            "success": true,
            "message": "Data synchronized successfully",
            "newKosts": 1,
        }))
        .into_response(),
        Err(err) => server_error("Failed to sync data", err),
    }
}

fn server_error(message: &str, err: anyhow::Error) -> Response {
    error!(error = %err, context = message, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use kosku_core::Listing;
    use kosku_providers::{all_providers, ProvidersConfig};
    use kosku_store::{HttpConfig, HttpFetcher, ListingCache};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn offline_state(dir: &TempDir) -> AppState {
        let search = SearchService::new(
            all_providers(&ProvidersConfig::disabled()),
            HttpFetcher::new(HttpConfig::default()).unwrap(),
            Arc::new(ListingCache::with_defaults()),
            None,
        );
        AppState::new(search, ListingFileStore::new(dir.path().join("kosan.json")))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn search_endpoint_always_answers_with_at_least_one_hit() {
        let dir = TempDir::new().unwrap();
        let app = app(offline_state(&dir));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/search?location=Bandung&maxBudget=1000000&facilities=WiFi&type=Campur")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let value = body_json(response).await;
        let hits = value.as_array().expect("JSON array");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["origin"], "synthetic");
        assert!(hits[0]["harga"].as_u64().unwrap() <= 1_000_000);
        assert_eq!(hits[0]["tipe"], "Campur");
    }

    #[tokio::test]
    async fn chat_endpoint_rejects_missing_message() {
        let dir = TempDir::new().unwrap();
        let app = app(offline_state(&dir));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/search")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = body_json(response).await;
        assert_eq!(value["error"], "Message is required");
    }

    #[tokio::test]
    async fn chat_endpoint_falls_back_to_conversational_reply() {
        let dir = TempDir::new().unwrap();
        let app = app(offline_state(&dir));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/search")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"message": "halo mbah"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let value = body_json(response).await;
        assert_eq!(value["type"], "chat");
        assert!(value["message"].as_str().unwrap().contains("Mbah"));
    }

    #[tokio::test]
    async fn kosts_endpoint_returns_the_file_verbatim_or_an_error_envelope() {
        let dir = TempDir::new().unwrap();
        let state = offline_state(&dir);
        let store = state.store.clone();
        let app = app(state);

        let missing = app
            .clone()
            .oneshot(Request::builder().uri("/api/kosts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let value = body_json(missing).await;
        assert_eq!(value["error"], "Failed to load kosts");

        store
            .save(&[Listing::new("mamikos-1", "Kos A", "Jl. A", 700_000, "mamikos.com")])
            .await
            .unwrap();
        let loaded = app
            .oneshot(Request::builder().uri("/api/kosts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(loaded.status(), StatusCode::OK);
        let value = body_json(loaded).await;
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["nama"], "Kos A");
    }

    #[tokio::test]
    async fn sync_endpoint_appends_the_simulated_listing() {
        let dir = TempDir::new().unwrap();
        let state = offline_state(&dir);
        let store = state.store.clone();
        let app = app(state);

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let value = body_json(first).await;
        assert_eq!(value["success"], true);
        assert_eq!(value["newKosts"], 1);

        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        let listings = store.load().await.unwrap();
        assert_eq!(listings.len(), 2);
        assert!(listings.iter().all(|l| l.id.starts_with("sync-")));
        assert!(listings.iter().all(|l| l.source == "google-search"));
    }
}
