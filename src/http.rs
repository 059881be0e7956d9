//! HTTP Endpoints
//!
//! REST API over `SubtitleService`.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        DefaultBodyLimit, Json, Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorKind, JimakuError, Result};
use crate::glossary::GlossaryEntry;
use crate::registry::JobId;
use crate::service::{GlossaryUpdate, JobSummary, SubtitleService, UploadReceipt, UploadedFile};

/// Multipart field name carrying uploaded files
pub const UPLOAD_FIELD: &str = "files";

type AppState = Arc<SubtitleService>;

/// Create the application router
pub fn create_router(service: Arc<SubtitleService>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        // Jobs
        .route("/upload", post(upload))
        .route("/status/:job_id", get(job_status))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:job_id/cancel", post(cancel_job))
        // Artifacts
        .route("/download/:job_id/:filename", get(download))
        .route("/outputs", get(list_outputs))
        // Glossary
        .route("/glossary", get(glossary_terms).post(add_glossary_terms))
        // Middleware
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(service: Arc<SubtitleService>, config: &ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(service, config.max_upload_bytes))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Error response carrying the classified failure
#[derive(Debug)]
pub struct ApiError(JimakuError);

impl From<JimakuError> for ApiError {
    fn from(err: JimakuError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ValidationFailure => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = json!({
            "error": self.0.to_string(),
            "kind": kind,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "message": "Subtitle generation API",
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn upload(
    State(service): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadReceipt>> {
    let mut multipart = multipart.map_err(|rejection| rejected(rejection.body_text()))?;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(bad_multipart)?;
        files.push(UploadedFile::new(name, bytes.to_vec()));
    }

    let receipt = service.upload(files).await?;
    Ok(Json(receipt))
}

async fn job_status(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    let job = service.status(&JobId::from(job_id.as_str()))?;
    Ok(Json(JobSummary::from(&job)))
}

async fn list_jobs(State(service): State<AppState>) -> Json<serde_json::Value> {
    let jobs: Vec<JobSummary> = service.jobs().iter().map(JobSummary::from).collect();
    Json(json!({
        "count": jobs.len(),
        "jobs": jobs,
    }))
}

async fn cancel_job(
    State(service): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSummary>> {
    let job = service.cancel(&JobId::from(job_id.as_str()))?;
    Ok(Json(JobSummary::from(&job)))
}

async fn download(
    State(service): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
) -> ApiResult<Response> {
    let bytes = service
        .download(&JobId::from(job_id.as_str()), &filename)
        .await?;

    let artifact = if filename.ends_with(".srt") {
        filename
    } else {
        format!("{}.srt", filename)
    };
    let headers = [
        (header::CONTENT_TYPE, "application/x-subrip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.replace('"', "")),
        ),
    ];
    Ok((headers, bytes).into_response())
}

async fn list_outputs(State(service): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let outputs = service.list_outputs()?;
    Ok(Json(json!({ "outputs": outputs })))
}

#[derive(Debug, Serialize)]
struct GlossaryListing {
    terms: Vec<GlossaryEntry>,
    total: usize,
}

async fn glossary_terms(State(service): State<AppState>) -> Json<GlossaryListing> {
    let terms = service.glossary_terms();
    Json(GlossaryListing {
        total: terms.len(),
        terms,
    })
}

/// Glossary addition request
#[derive(Debug, Deserialize)]
struct GlossaryRequest {
    terms: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

async fn add_glossary_terms(
    State(service): State<AppState>,
    request: std::result::Result<Json<GlossaryRequest>, JsonRejection>,
) -> ApiResult<Json<GlossaryUpdate>> {
    let Json(request) = request.map_err(|rejection| rejected(rejection.body_text()))?;
    Ok(Json(service.add_glossary_terms(&request.terms, request.category.as_deref())))
}

fn bad_multipart(err: MultipartError) -> ApiError {
    rejected(format!("malformed upload: {}", err))
}

/// Extractor rejections are client errors.
fn rejected(message: String) -> ApiError {
    ApiError(JimakuError::Validation(message))
}
