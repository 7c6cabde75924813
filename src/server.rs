//! HTTP surface over [`IntakePipeline`] (feature `server`).
//!
//! | Route | Behaviour |
//! |---|---|
//! | `POST /upload` | multipart `file`; annotation best-effort; 201 |
//! | `POST /upload/extract` | as above, annotation required, then extraction + webhook |
//! | `GET /health_check` | `{"status":"healthy"}` |
//! | `POST /webhook` | forward any JSON body to the configured webhook |
//! | `GET {base path}/*` | static files from the store root |
//!
//! Errors are `{message, error}` with the status from
//! [`IntakeError::status_code`].

use crate::error::{DispatchStage, IntakeError};
use crate::intake::{IntakePipeline, ProcessOptions};
use crate::output::{IntakeOutcome, UploadedDocument};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<IntakePipeline>,
}

/// JSON error body: `{message, error}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            error: None,
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &err {
            IntakeError::InvalidUpload { reason } => reason.clone(),
            other => other.public_message().to_string(),
        };
        if status.is_server_error() {
            warn!("Request failed: {}", err);
        }
        Self {
            status,
            message,
            error: Some(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.error {
            Some(error) => json!({ "message": self.message, "error": error }),
            None => json!({ "message": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Build the router. Static files are served under the path of
/// `public_base_url` so the URLs the pipeline hands out resolve here.
pub fn router(pipeline: Arc<IntakePipeline>) -> Router {
    let config = pipeline.config();
    let files = ServeDir::new(&config.store_root);
    let mount = mount_path(&config.public_base_url);

    let app = Router::new()
        .route("/upload", post(upload))
        .route("/upload/extract", post(upload_extract))
        .route("/health_check", get(health_check))
        .route("/webhook", post(forward_webhook));
    let app = if mount.is_empty() {
        app.fallback_service(files)
    } else {
        app.nest_service(&mount, files)
    };

    app.layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}

/// Path component of the public base URL without its trailing slash.
fn mount_path(base: &str) -> String {
    reqwest::Url::parse(base)
        .map(|u| u.path().trim_end_matches('/').to_string())
        .unwrap_or_default()
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    pipeline: Arc<IntakePipeline>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let doc = read_upload(multipart).await?;
    let outcome = state.pipeline.process(doc, ProcessOptions::upload()).await?;
    Ok((StatusCode::CREATED, Json(outcome_body(&outcome))))
}

async fn upload_extract(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let doc = read_upload(multipart).await?;
    let outcome = state
        .pipeline
        .process(doc, ProcessOptions::extract())
        .await?;

    let mut body = outcome_body(&outcome);
    body["result"] = serde_json::to_value(&outcome.record).unwrap_or(Value::Null);
    body["dispatch_errors"] = json!(outcome.dispatch_errors);
    Ok((StatusCode::CREATED, Json(body)))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn forward_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(webhook) = state.pipeline.webhook() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "message": "Failed to send data to webhook",
                "error": "no webhook configured",
            })),
        );
    };
    let timeout_secs = state.pipeline.config().dispatch_timeout_secs;
    let forwarded = tokio::time::timeout(Duration::from_secs(timeout_secs), webhook.post(&payload))
        .await
        .unwrap_or_else(|_| {
            Err(IntakeError::DispatchFailed {
                stage: DispatchStage::Webhook,
                detail: format!("exceeded {}s", timeout_secs),
            })
        });
    match forwarded {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!({
                "message": "Data successfully forwarded to webhook",
                "webhook_response": reply,
            })),
        ),
        Err(e) => {
            warn!("{}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": "Failed to send data to webhook",
                    "error": e.to_string(),
                })),
            )
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadedDocument, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Read error: {}", e)))?;
        let mut doc = UploadedDocument::new(filename, bytes.to_vec());
        doc.content_type = content_type;
        return Ok(doc);
    }
    Err(ApiError::bad_request("No file part"))
}

fn outcome_body(outcome: &IntakeOutcome) -> Value {
    json!({
        "message": "File processed successfully",
        "company_name": outcome.company_name,
        "file_url": outcome.file_url,
        "image_urls": outcome.image_urls,
        "annotated_image_url": outcome.annotated_image_url,
    })
}
