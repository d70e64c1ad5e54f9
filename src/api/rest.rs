//! Axum REST API handlers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::engine::FaceExtractor;
use crate::error::SearchError;
use crate::service::SearchService;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState<E: FaceExtractor> {
    pub service: Arc<SearchService<E>>,
    pub static_dir: PathBuf,
    pub start_time: Instant,
}

impl<E: FaceExtractor> AppState<E> {
    pub fn new(service: Arc<SearchService<E>>, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            static_dir: static_dir.into(),
            start_time: Instant::now(),
        }
    }
}

/// Create the REST API router
pub fn create_rest_router<E: FaceExtractor>(state: Arc<AppState<E>>) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/", get(index_handler::<E>))
        .route("/search", post(search_handler::<E>))
        .route("/health", get(health_handler::<E>))
        .nest_service("/static", static_files)
        // Middleware
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB limit for large images
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

fn search_error_response(e: SearchError) -> ApiError {
    let status = match &e {
        SearchError::Decode(_) | SearchError::ZeroEmbedding => StatusCode::UNPROCESSABLE_ENTITY,
        SearchError::DimensionMismatch { .. } | SearchError::Extraction(_) | SearchError::Join(_) => {
            error!("Search failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorResponse::new(e.to_string())))
}

/// Search indexed faces with an uploaded photo
async fn search_handler<E: FaceExtractor>(
    State(state): State<Arc<AppState<E>>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| bad_request(e.body_text()))?;

    let mut image_data: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or("");
        if name == "file" || name == "image" {
            let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
            image_data = Some(bytes.to_vec());
            break;
        }
    }

    let image_data = image_data.ok_or_else(|| bad_request("Missing file field"))?;

    let outcome = state
        .service
        .search(image_data)
        .await
        .map_err(search_error_response)?;

    Ok(Json(SearchResponse {
        count: outcome.count,
        results: outcome.results,
    }))
}

/// Health check
async fn health_handler<E: FaceExtractor>(
    State(state): State<Arc<AppState<E>>>,
) -> Json<HealthResponse> {
    let health = state.service.health();

    Json(HealthResponse {
        healthy: health.healthy,
        version: health.version,
        indexed_faces: health.indexed_faces,
        models_loaded: health.models_loaded,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Upload page
async fn index_handler<E: FaceExtractor>(State(state): State<Arc<AppState<E>>>) -> Html<String> {
    let path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            Html("<h1>index.html not found</h1>".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::service::search_service::tests::{png_bytes, FixedExtractor};
    use crate::service::EmbeddingIndex;
    use crate::storage::FaceRecord;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    const BOUNDARY: &str = "drivefacesboundary";

    fn router(extractor: FixedExtractor, static_dir: PathBuf) -> Router {
        let records = vec![
            FaceRecord::new("a", "a.jpg", "f", vec![1.0, 0.0]),
            FaceRecord::new("b", "b.jpg", "f", vec![0.0, 1.0]),
        ];
        let index = Arc::new(EmbeddingIndex::build(&records).unwrap());
        let service = Arc::new(SearchService::new(index, Arc::new(extractor), SearchConfig::default()));
        create_rest_router(Arc::new(AppState::new(service, static_dir)))
    }

    fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"q.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/search")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_search_returns_matches() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![vec![3.0, 0.0]]), dir.path().to_path_buf());

        let response = app.oneshot(multipart_request("file", &png_bytes(20, 20))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["file_id"], "a");
        assert_eq!(body["results"][0]["download_url"], "https://drive.google.com/uc?id=a&export=download");
    }

    #[tokio::test]
    async fn test_search_accepts_image_field() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![vec![0.0, 1.0]]), dir.path().to_path_buf());

        let response = app.oneshot(multipart_request("image", &png_bytes(20, 20))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["results"][0]["file_id"], "b");
    }

    #[tokio::test]
    async fn test_search_corrupted_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![vec![1.0, 0.0]]), dir.path().to_path_buf());

        let response = app.oneshot(multipart_request("file", b"definitely not an image")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["error"], "Unsupported or corrupted image");
    }

    #[tokio::test]
    async fn test_search_empty_upload_is_undecodable() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![vec![1.0, 0.0]]), dir.path().to_path_buf());

        let response = app.oneshot(multipart_request("file", b"")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["error"], "Unsupported or corrupted image");
    }

    #[tokio::test]
    async fn test_search_zero_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![vec![0.0, 0.0]]), dir.path().to_path_buf());

        let response = app.oneshot(multipart_request("file", &png_bytes(8, 8))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_search_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![]), dir.path().to_path_buf());

        let response = app.oneshot(multipart_request("other", b"x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Missing file field");
    }

    #[tokio::test]
    async fn test_search_requires_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![]), dir.path().to_path_buf());

        let request = Request::builder()
            .method("POST")
            .uri("/search")
            .body(Body::from("plain"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![]), dir.path().to_path_buf());

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["indexed_faces"], 2);
    }

    #[tokio::test]
    async fn test_index_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>upload</p>").unwrap();
        let app = router(FixedExtractor(vec![]), dir.path().to_path_buf());

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<p>upload</p>");
    }

    #[tokio::test]
    async fn test_index_page_missing() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(FixedExtractor(vec![]), dir.path().to_path_buf());

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("index.html not found"));
    }
}
