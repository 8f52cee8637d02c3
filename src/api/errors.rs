// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP error mapping
//!
//! Every request failure is reported the same way: status 500 with the
//! error description as a plain-text body. Clients distinguish success
//! from failure by status only.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::fmt;

use crate::vision::VisionError;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed or incomplete request body
    InvalidRequest(String),
    /// Failure inside the vision pipeline
    Vision(VisionError),
    /// The blocking inference task died
    TaskFailed(String),
    /// Response could not be encoded
    Serialization(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::Vision(err) => write!(f, "{}", err),
            ApiError::TaskFailed(msg) => write!(f, "Inference task failed: {}", msg),
            ApiError::Serialization(msg) => write!(f, "Failed to encode response: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<VisionError> for ApiError {
    fn from(err: VisionError) -> Self {
        ApiError::Vision(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
