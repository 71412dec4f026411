use std::{collections::HashSet, path::Path, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method},
    routing::{get, post},
};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Semaphore};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use url::Url;

use crate::{
    config::Config, downloader::Downloader, error::ApiError, files::serve_download,
    request::DownloadRequest,
};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    downloader: Arc<Downloader>,
    download_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let downloader = Downloader::new(&config);
        let download_semaphore = Semaphore::new(config.max_concurrent_downloads);

        Self {
            config: Arc::new(config),
            downloader: Arc::new(downloader),
            download_semaphore: Arc::new(download_semaphore),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/download", post(start_download))
        .route("/download/{filename}", get(serve_download))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create download directory {}: {error}",
                config.download_dir.display()
            ))
        })?;

    let addr = config.bind_addr.clone();
    let state = AppState::new(config);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Could not bind {addr}: {error}")))?;

    info!("videofetch listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    message: &'static str,
    file_path: String,
    format: &'static str,
    quality: String,
    download_url: String,
}

/// `POST /api/download`: validate, then run one blocking orchestration and
/// answer only once the file is verified on disk. Orchestration failures of
/// any kind become a 500 payload, never an unhandled fault.
async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let job = payload.validate()?;

    let _permit = state
        .download_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve download capacity."))?;

    info!(
        url = %job.url,
        format = job.format_name(),
        quality = %job.quality_label(),
        "starting download"
    );

    let file_path = state.downloader.download(&job).await.map_err(|error| {
        warn!(url = %job.url, %error, "download failed");
        ApiError::internal("Download failed").with_details(error.to_string())
    })?;

    let file_name = file_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    Ok(Json(DownloadResponse {
        message: "Download complete",
        download_url: format!("/download/{}", urlencoding::encode(file_name)),
        file_path: file_path.display().to_string(),
        format: job.format_name(),
        quality: job.quality_label(),
    }))
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS is not set; allowing any origin");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let normalized = allowed_origins
        .iter()
        .filter_map(|origin| {
            let value = normalize_origin(origin);
            if value.is_none() {
                warn!(origin = %origin, "ignoring invalid entry in ALLOWED_ORIGINS");
            }
            value
        })
        .collect::<HashSet<_>>();

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .ok()
            .and_then(normalize_origin)
            .is_some_and(|value| normalized.contains(&value))
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Lowercased `scheme://host[:port]` form used for origin comparison;
/// default ports are dropped by the URL parser.
fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    match parsed.port() {
        Some(port) => Some(format!("{}://{host}:{port}", parsed.scheme())),
        None => Some(format!("{}://{host}", parsed.scheme())),
    }
}
