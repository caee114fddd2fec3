//! HTTP mapping of fleet errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use osfleet_core::FleetError;

/// A `FleetError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub FleetError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FleetError::Authentication(_) | FleetError::Configuration(_) => {
                StatusCode::UNAUTHORIZED
            }
            FleetError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
            FleetError::InvalidState(_) => StatusCode::CONFLICT,
            FleetError::TransientBroker(_) | FleetError::Datastore(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<FleetError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let body = if self.0.is_node_invalid() {
            json!({ "error": self.0.to_string(), "node_invalid": true })
        } else {
            json!({ "error": self.0.to_string() })
        };

        (status, Json(body)).into_response()
    }
}
