//! Fleetward API Module
//! HTTP endpoints polled by `fleetward-update`

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::authority::{AuthorityError, ReleaseStore, UpdateResponder};
use crate::engine::nosql::NoSqlEngine;
use crate::engine::protocol::{AcknowledgeRequest, UpdateRequest, UpdateResponse};
use crate::engine::updater::transport::{ACKNOWLEDGE_PATH, UPDATE_PATH};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<NoSqlEngine>,
    pub releases: Arc<ReleaseStore>,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route(UPDATE_PATH, post(update))
        .route(ACKNOWLEDGE_PATH, post(acknowledge_patch))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Authority(e) => e.code(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Authority(e) => match e {
                AuthorityError::PatchNotFound(_) => StatusCode::NOT_FOUND,
                AuthorityError::PatchConflict { .. } | AuthorityError::ReleaseNotNewer { .. } => StatusCode::CONFLICT,
                AuthorityError::UnknownHost { .. }
                | AuthorityError::MissingHostname
                | AuthorityError::InvalidPatchPath(_)
                | AuthorityError::InvalidAuditRecord(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn update(
    State(state): State<ApiState>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateResponse>> {
    let Json(request) = payload?;
    let response = UpdateResponder::new(&state.store, &state.releases).respond(&request)?;
    Ok(Json(response))
}

#[derive(Serialize)]
pub struct AcknowledgeResponse {
    pub status: String,
}

async fn acknowledge_patch(
    State(state): State<ApiState>,
    payload: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> ApiResult<Json<AcknowledgeResponse>> {
    let Json(ack) = payload?;
    UpdateResponder::new(&state.store, &state.releases).acknowledge(&ack)?;
    Ok(Json(AcknowledgeResponse {
        status: "ok".to_string(),
    }))
}
