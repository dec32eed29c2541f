// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use simwatch_core::{RejectionKind, RequestRejected};
use thiserror::Error;

/// Body of every watchdog response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Errors returned by the watchdog handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body or one of its fields is malformed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request is valid but not allowed for this watchdog.
    #[error("Request not allowed: {0}")]
    NotAllowed(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl From<RequestRejected> for ApiError {
    fn from(err: RequestRejected) -> Self {
        match err.kind() {
            RejectionKind::BadRequest => ApiError::BadRequest(err.to_string()),
            RejectionKind::NotAllowed => ApiError::NotAllowed(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ApiResponse {
                success: false,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
