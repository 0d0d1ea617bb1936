// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP API for Leafscan

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::artifacts::{IMAGES_ROUTE, REPORTS_ROUTE};
use crate::config::WebConfig;
use crate::history::PredictionRecord;
use crate::knowledge::DiseaseLabel;
use crate::preprocess::UploadedImage;
use crate::service::{DiagnosisService, PredictionResponse};
use crate::LeafscanError;

/// Multipart field carrying the leaf photo
const UPLOAD_FIELD: &str = "file";

/// Shared application state
pub struct AppState {
    pub service: DiagnosisService,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for LeafscanError {
    fn into_response(self) -> Response {
        let status = match &self {
            LeafscanError::Decode(_) | LeafscanError::BadRequest(_) => StatusCode::BAD_REQUEST,
            LeafscanError::NotFound(_) => StatusCode::NOT_FOUND,
            LeafscanError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>, web: &WebConfig) -> Router {
    let images = ServeDir::new(state.service.artifacts().images_dir());
    let reports = ServeDir::new(state.service.artifacts().reports_dir());

    Router::new()
        .route("/predict", post(api_predict))
        .route("/history", get(api_history))
        .route("/download/pdf/:filename", get(api_download_pdf))
        .route("/health", get(api_health))
        .nest_service(IMAGES_ROUTE, images)
        .nest_service(REPORTS_ROUTE, reports)
        .layer(DefaultBodyLimit::max(web.max_upload_bytes))
        .layer(cors_layer(&web.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

// === API Handlers ===

async fn api_predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, LeafscanError> {
    let mut multipart = multipart.map_err(|e| LeafscanError::BadRequest(e.body_text()))?;
    let upload = read_upload(&mut multipart).await?;
    let response = state.service.predict(upload).await?;
    Ok(Json(response))
}

/// Take the `file` field, or failing that the first field with a body
async fn read_upload(multipart: &mut Multipart) -> Result<UploadedImage, LeafscanError> {
    let mut fallback = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| LeafscanError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let is_upload_field = field.name() == Some(UPLOAD_FIELD);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| LeafscanError::BadRequest(format!("Failed to read upload: {}", e)))?;

        if is_upload_field {
            return Ok(UploadedImage::new(bytes.to_vec(), content_type));
        }
        if fallback.is_none() && !bytes.is_empty() {
            fallback = Some(UploadedImage::new(bytes.to_vec(), content_type));
        }
    }
    fallback.ok_or_else(|| LeafscanError::BadRequest("no file uploaded".to_string()))
}

async fn api_history(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PredictionRecord>>, LeafscanError> {
    Ok(Json(state.service.list_history().await?))
}

async fn api_download_pdf(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, LeafscanError> {
    let bytes = state.service.download_report(&filename).await?;
    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    labels: Vec<&'static str>,
}

async fn api_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        labels: DiseaseLabel::ALL.iter().map(|l| l.name()).collect(),
    })
}

/// Start the web server
pub async fn start_server(service: DiagnosisService, web: &WebConfig) -> crate::Result<()> {
    let state = Arc::new(AppState { service });

    let addr = format!("{}:{}", web.host, web.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Leafscan API listening on http://{}", addr);

    let router = create_router(state, web);
    axum::serve(listener, router).await
        .map_err(|e| crate::LeafscanError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
