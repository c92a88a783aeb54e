//! HTTP error responses.
//!
//! Implements `IntoResponse` for [`PolicyError`] so request handlers can
//! return enforcement failures directly. A refused request always maps to an
//! authorization-denied class response.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::PolicyError;

impl IntoResponse for PolicyError {
    fn into_response(self) -> Response {
        let status = status_code(&self);

        if status.is_server_error() {
            tracing::error!(error = %self, category = %self.category(), "Access-control failure");
        }

        let message = if status.is_server_error() {
            "Access control could not be evaluated".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": self.error_code(),
            "message": message,
            "conflicts": self.conflicts().unwrap_or_default(),
        });

        (status, Json(body)).into_response()
    }
}

/// HTTP status for an access-control error.
#[must_use]
pub fn status_code(error: &PolicyError) -> StatusCode {
    match error {
        PolicyError::PolicyConflict { .. }
        | PolicyError::EnvironmentResolution { .. }
        | PolicyError::UnresolvedEnvironment { .. }
        | PolicyError::Translation { .. }
        | PolicyError::InvalidClause { .. } => StatusCode::FORBIDDEN,
        PolicyError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        PolicyError::Storage(_) | PolicyError::Configuration { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
