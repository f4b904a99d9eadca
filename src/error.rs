//! Central error taxonomy and HTTP status mapping.
//!
//! Every component in this crate returns its own typed error (see
//! `credential`, `route_table`, `orchestrator`, `conversation_store`,
//! `eventbus`). The outermost actix handler converts those into an
//! [`ApiError`], which alone decides the HTTP status and the public body.
//! Streaming responses that have already begun emission never change the
//! HTTP status; they encode failures as an `error` SSE event instead (see
//! `sse.rs`).

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// The closed set of error kinds from the specification's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingCredential,
    MalformedCredential,
    ExpiredCredential,
    RevokedCredential,
    InsufficientScope,
    NotFound,
    Conflict,
    PayloadTooLarge,
    TooManyRequests,
    BadGateway,
    UpstreamUnavailable,
    GatewayTimeout,
    ContentRejected,
    ToolFailure,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::MissingCredential
            | ErrorKind::MalformedCredential
            | ErrorKind::ExpiredCredential
            | ErrorKind::RevokedCredential => StatusCode::UNAUTHORIZED,
            ErrorKind::InsufficientScope => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ContentRejected => StatusCode::BAD_REQUEST,
            ErrorKind::ToolFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn type_str(self) -> &'static str {
        match self {
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::MalformedCredential => "malformed_credential",
            ErrorKind::ExpiredCredential => "expired_credential",
            ErrorKind::RevokedCredential => "revoked_credential",
            ErrorKind::InsufficientScope => "insufficient_scope",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PayloadTooLarge => "payload_too_large",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::GatewayTimeout => "gateway_timeout",
            ErrorKind::ContentRejected => "content_rejected",
            ErrorKind::ToolFailure => "tool_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Public API error: `{detail, type, status_code}`, never leaking internals
/// beyond the `X-Request-Id` header already attached by the proxy layer.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub detail: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            retry_after_secs: None,
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self {
            kind: ErrorKind::TooManyRequests,
            detail: "rate limit exceeded".into(),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "detail": self.detail,
            "type": self.kind.type_str(),
            "status_code": self.kind.status_code().as_u16(),
        })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.type_str(), self.detail)
    }
}

impl std::error::Error for ApiError {}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let Some(secs) = self.retry_after_secs {
            builder.insert_header(("Retry-After", secs.to_string()));
        }
        builder.json(self.to_json())
    }
}
