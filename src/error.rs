//! Crate-wide error boundary.
//!
//! Internally every component returns `anyhow::Result`; this narrow enum only
//! exists at the HTTP health-endpoint boundary, where a typed status code
//! actually matters to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use derive_more::{Display, Error};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Display, Error)]
pub enum ProcError {
    #[display("Internal Error: {msg}")]
    InternalError { msg: String },

    #[display("Resource not found: {msg}")]
    NotFound { msg: String },
}

impl From<anyhow::Error> for ProcError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ProcError>() {
            Ok(proc_err) => proc_err,
            Err(err) => ProcError::InternalError { msg: err.to_string() },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ProcError {
    fn into_response(self) -> Response {
        let status = match self {
            ProcError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProcError::NotFound { .. } => StatusCode::NOT_FOUND,
        };
        log::error!("{self}");
        (status, Json(json!(ErrorBody { error: self.to_string() }))).into_response()
    }
}
