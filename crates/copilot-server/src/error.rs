// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server error types and handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Server result type
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Sync(#[from] copilot_sync::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Problem+JSON body
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Sync(copilot_sync::Error::Config { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::Sync(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_problem(&self) -> ProblemDetails {
        let (problem_type, title) = match self {
            ServerError::BadRequest(_) => ("bad-request", "Bad Request"),
            ServerError::Sync(err) => (err.code(), "Upstream Agent Error"),
            ServerError::Internal(_) => ("internal", "Internal Server Error"),
        };
        ProblemDetails {
            problem_type: problem_type.to_string(),
            title: title.to_string(),
            status: self.status().as_u16(),
            detail: self.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_problem())).into_response()
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::BadRequest(rejection.body_text())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(format!("IO error: {}", err))
    }
}
