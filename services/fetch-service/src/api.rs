//! Resolve and download endpoints
//!
//! Every inbound request gets its own gateway session, so a credential
//! pinned by one request never leaks into another. Failures become JSON
//! bodies: {"error":{"type":"...","message":"...","request_id":"req_..."}}.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use api_client::{ErrorKind, Gateway, Resolved, Resolver, TrackInfo};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::media::MediaStore;

/// Progress is logged every this many bytes.
const PROGRESS_STEP: u64 = 1024 * 1024;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub media: Arc<MediaStore>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
    pub max_playlist_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
struct Saved {
    title: String,
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct Failed {
    title: String,
    error: String,
}

/// Per-request failure, mapped to a status code and error type.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Playlist(String),
    NoStream(String),
    Upstream(api_client::Error),
    Download(crate::error::Error),
    Internal(String),
}

impl From<api_client::Error> for ApiError {
    fn from(err: api_client::Error) -> Self {
        ApiError::Upstream(err)
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(err: crate::error::Error) -> Self {
        ApiError::Download(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Playlist(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NoStream(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(e) => match e.kind() {
                ErrorKind::InvalidUrl => StatusCode::BAD_REQUEST,
                ErrorKind::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Status if e.http_status() == Some(404) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            },
            ApiError::Download(crate::error::Error::TooLarge { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ApiError::Download(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Playlist(_) => "unsupported_playlist",
            ApiError::NoStream(_) => "not_found",
            ApiError::Upstream(e) => match e.kind() {
                ErrorKind::InvalidUrl => "invalid_request",
                ErrorKind::Exhausted => "unavailable",
                ErrorKind::NotFound => "not_found",
                _ if e.http_status() == Some(404) => "not_found",
                _ => "upstream_error",
            },
            ApiError::Download(_) => "download_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::Playlist(m)
            | ApiError::NoStream(m)
            | ApiError::Internal(m) => m.clone(),
            ApiError::Upstream(e) if e.kind() == ErrorKind::Exhausted => {
                "all API credentials are temporarily unavailable, try again later".to_string()
            }
            ApiError::Upstream(e) => e.to_string(),
            ApiError::Download(e) => e.to_string(),
        }
    }

    fn into_error_response(self, request_id: &str) -> Response {
        let status = self.status();
        match &self {
            ApiError::Upstream(e) => {
                crate::metrics::record_upstream_error(e.kind().label());
                if status.is_server_error() {
                    error!(request_id, error = %e, "upstream request failed");
                } else {
                    info!(request_id, error = %e, "request rejected");
                }
            }
            ApiError::Download(e) => warn!(request_id, error = %e, "download failed"),
            other => debug!(request_id, error = %other.message(), "request rejected"),
        }
        error_response(status, self.error_type(), &self.message(), request_id)
    }
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

fn finish(
    route: &'static str,
    started: Instant,
    request_id: &str,
    result: Result<Value, ApiError>,
) -> Response {
    let response = match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_error_response(request_id),
    };
    crate::metrics::record_request(
        route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// GET /v1/resolve?url=...: track or playlist metadata.
pub async fn resolve_handler(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();
    let result = resolve(&state, params.url.as_deref(), &request_id).await;
    finish("resolve", started, &request_id, result)
}

/// POST /v1/downloads {"url": "..."}: fetch a track or every track of a playlist.
pub async fn download_handler(
    State(state): State<AppState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();
    let result = match body {
        Ok(Json(req)) => download(&state, &req.url, &request_id).await,
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    };
    finish("downloads", started, &request_id, result)
}

/// Anything not routed.
pub async fn not_found_handler() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "not_found",
        "no such endpoint",
        &new_request_id(),
    )
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn resolve(
    state: &AppState,
    url: Option<&str>,
    request_id: &str,
) -> Result<Value, ApiError> {
    let url = required_url(url)?;
    let resolver = Resolver::new(state.gateway.session());
    let resolved = resolver.lookup(url).await?;
    serde_json::to_value(&resolved).map_err(|e| ApiError::Internal(e.to_string()))
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn download(state: &AppState, url: &str, request_id: &str) -> Result<Value, ApiError> {
    let url = required_url(Some(url))?;
    let resolver = Resolver::new(state.gateway.session());

    match resolver.lookup(url).await? {
        Resolved::Track(track) => {
            let path = fetch_track(state, &resolver, &track).await?;
            Ok(json!({
                "kind": "track",
                "saved": [Saved { title: track.display_name(), path }],
                "failed": Vec::<Failed>::new(),
            }))
        }
        Resolved::Playlist(playlist) => {
            let total = playlist.tracks.len();
            if total == 0 {
                return Err(ApiError::Playlist("playlist is empty".into()));
            }
            if total > state.max_playlist_size {
                return Err(ApiError::Playlist(format!(
                    "playlist has {total} tracks, the limit is {}",
                    state.max_playlist_size
                )));
            }

            info!(
                title = playlist.title.as_deref().unwrap_or_default(),
                total, "downloading playlist"
            );
            let mut saved = Vec::new();
            let mut failed = Vec::new();
            for (idx, track) in playlist.tracks.iter().enumerate() {
                let title = track.display_name();
                match fetch_track(state, &resolver, track).await {
                    Ok(path) => saved.push(Saved { title, path }),
                    Err(e) => {
                        warn!(track = idx + 1, total, error = %e.message(), "playlist track failed");
                        failed.push(Failed {
                            title,
                            error: e.message(),
                        });
                    }
                }
            }
            info!(saved = saved.len(), failed = failed.len(), "playlist finished");

            Ok(json!({
                "kind": "playlist",
                "title": playlist.title,
                "artist": playlist.artist,
                "saved": saved,
                "failed": failed,
            }))
        }
    }
}

fn required_url(url: Option<&str>) -> Result<&str, ApiError> {
    match url.map(str::trim) {
        Some(u) if !u.is_empty() => Ok(u),
        _ => Err(ApiError::BadRequest("missing url".into())),
    }
}

async fn fetch_track(
    state: &AppState,
    resolver: &Resolver,
    track: &TrackInfo,
) -> Result<PathBuf, ApiError> {
    let stream_url = resolver.stream_url(track).await?.ok_or_else(|| {
        ApiError::NoStream(format!("no stream available for {}", track.display_name()))
    })?;

    let name = track.display_name();
    let mut next_report = PROGRESS_STEP;
    let path = state
        .media
        .download_track(&stream_url, track, |done, total| {
            if done >= next_report {
                debug!(track = %name, done, total, "download progress");
                next_report = done + PROGRESS_STEP;
            }
        })
        .await?;
    Ok(path)
}
