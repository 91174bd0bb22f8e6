// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the messaging fabric. Errors are handled
//! where they arise: this type exists to give request- and frame-facing
//! failures a stable HTTP status and machine-readable code.

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::model::OutboundEnvelope;

/// Error codes surfaced to HTTP clients and to the WebSocket `error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubError {
    /// Malformed or missing `user_id` at upgrade time, or a bad payload shape.
    InvalidUserId,
    /// Origin check or auth hook rejected the connection.
    Unauthorized,
    /// `UserValidator::user_exists` returned false.
    UserNotFound,
    /// A collaborator (validator, presence store) returned an error.
    UpstreamError,
    /// Anything else — an invariant break that should never reach a client.
    Internal,
}

impl HubError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidUserId => 400,
            Self::Unauthorized => 401,
            Self::UserNotFound => 404,
            Self::UpstreamError => 500,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUserId => "INVALID_USER_ID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: self.to_error_body(message) }))
    }

    /// Render as a WebSocket `error` envelope.
    pub fn to_envelope(
        &self,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> OutboundEnvelope {
        OutboundEnvelope::error(self.as_str(), message, request_id)
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for HubError {}

/// Top-level HTTP error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
