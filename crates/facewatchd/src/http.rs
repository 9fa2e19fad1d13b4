//! HTTP surface of the daemon.
//!
//! | route | body | reply |
//! |---|---|---|
//! | `POST /enroll` | multipart `name`, `image` | `{status, identifier}` |
//! | `POST /reenroll` | multipart `identifier`, `image` | `{status, identifier}` |
//! | `POST /identify` | multipart `image` | `{status, identity, distance}` |
//! | `POST /send_alert` | JSON `{text, number?}` | `202 {status}` |
//! | `GET /status` | | daemon and gallery summary |
//! | `GET /gallery` | | enrolled identifiers |

use crate::alert::{Alert, WhatsAppNotifier};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_typed_multipart::{TryFromMultipart, TypedMultipart};
use facewatch_core::{IdentificationService, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

const UNKNOWN_IDENTITY: &str = "unknown";

pub struct AppState {
    pub service: IdentificationService,
    pub notifier: Option<Arc<WhatsAppNotifier>>,
}

impl AppState {
    pub fn new(service: IdentificationService, notifier: Option<Arc<WhatsAppNotifier>>) -> Arc<Self> {
        Arc::new(Self { service, notifier })
    }
}

/// Build the router. Request bodies above `max_upload_bytes` are refused.
pub fn create_app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/enroll", post(enroll_handler))
        .route("/reenroll", post(reenroll_handler))
        .route("/identify", post(identify_handler))
        .route("/send_alert", post(send_alert_handler))
        .route("/status", get(status_handler))
        .route("/gallery", get(gallery_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}

#[derive(TryFromMultipart)]
pub struct EnrollForm {
    pub name: String,
    #[form_data(limit = "unlimited")]
    pub image: Bytes,
}

#[derive(TryFromMultipart)]
pub struct ReenrollForm {
    pub identifier: String,
    #[form_data(limit = "unlimited")]
    pub image: Bytes,
}

#[derive(TryFromMultipart)]
pub struct IdentifyForm {
    #[form_data(limit = "unlimited")]
    pub image: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollResponse {
    pub status: String,
    pub identifier: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub status: String,
    /// Matched identifier, or `"unknown"`.
    pub identity: String,
    /// Distance to the nearest enrolled face, if any are enrolled.
    pub distance: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    pub text: String,
    #[serde(default, alias = "mobile_number")]
    pub number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub identifier: String,
    pub dim: usize,
    pub updated_at: String,
}

async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(form): TypedMultipart<EnrollForm>,
) -> Result<Json<EnrollResponse>, ApiError> {
    tracing::debug!(name = %form.name, bytes = form.image.len(), "enroll requested");
    let identifier = state.service.enroll(&form.name, Vec::from(form.image)).await?;
    Ok(Json(EnrollResponse {
        status: "success".into(),
        identifier: identifier.to_string(),
    }))
}

async fn reenroll_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(form): TypedMultipart<ReenrollForm>,
) -> Result<Json<EnrollResponse>, ApiError> {
    tracing::debug!(identifier = %form.identifier, bytes = form.image.len(), "reenroll requested");
    let identifier = state
        .service
        .reenroll(&form.identifier, Vec::from(form.image))
        .await?;
    Ok(Json(EnrollResponse {
        status: "success".into(),
        identifier: identifier.to_string(),
    }))
}

async fn identify_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(form): TypedMultipart<IdentifyForm>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    tracing::debug!(bytes = form.image.len(), "identify requested");
    let result = state.service.identify(Vec::from(form.image)).await?;
    Ok(Json(IdentifyResponse {
        status: "success".into(),
        identity: result
            .identifier
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string()),
        distance: result.distance,
    }))
}

async fn send_alert_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AlertRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let notifier = state.notifier.as_ref().ok_or(ApiError::AlertingDisabled)?;
    let number = request
        .number
        .filter(|n| !n.trim().is_empty())
        .or_else(|| notifier.default_number().map(String::from))
        .ok_or(ApiError::MissingNumber)?;

    tracing::info!(%number, "alert requested");
    notifier.dispatch(Alert {
        text: request.text,
        number,
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let gallery_size = state.service.gallery_size().await?;
    let config = state.service.config();
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "gallery_size": gallery_size,
        "threshold": config.threshold,
        "name_mode": config.name_mode.as_str(),
        "alerting": state.notifier.is_some(),
        "alert_calls": state.notifier.as_ref().is_some_and(|n| n.places_calls()),
    })))
}

async fn gallery_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<GalleryEntry>>, ApiError> {
    let mut entries: Vec<GalleryEntry> = state
        .service
        .gallery()
        .await?
        .into_iter()
        .map(|record| GalleryEntry {
            identifier: record.identifier.to_string(),
            dim: record.descriptor.dim(),
            updated_at: record.updated_at,
        })
        .collect();
    entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    Ok(Json(entries))
}

/// Error returned by handlers, rendered as `{status: "error", error}`.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    AlertingDisabled,
    MissingNumber,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Service(err) => match err {
                ServiceError::NoFaceDetected => StatusCode::UNPROCESSABLE_ENTITY,
                ServiceError::InvalidName(_) => StatusCode::BAD_REQUEST,
                ServiceError::ExtractionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ServiceError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Storage(_)
                | ServiceError::Match(_)
                | ServiceError::Extraction(_)
                | ServiceError::IdentifierExhausted(_)
                | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::AlertingDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::MissingNumber => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Service(err) => err.to_string(),
            ApiError::AlertingDisabled => "alerting is not configured".into(),
            ApiError::MissingNumber => "no alert number given and no default configured".into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.message(), "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.message(), "request rejected");
        }
        (status, Json(json!({ "status": "error", "error": self.message() }))).into_response()
    }
}
