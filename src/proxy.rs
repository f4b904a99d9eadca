//! Reverse Proxy Core (§4.2).
//!
//! Forwards matched, non-chat requests to their backend over a pooled
//! `reqwest::Client`. Grounded on `util::build_http_client_from_env` for
//! client construction and `server.rs`'s `apply_upstream_headers` /
//! `insert_route_headers` for the header-rewrite shape (strip hop-by-hop
//! and credential headers inbound, inject request/principal identity
//! headers outbound).

use crate::error::{ApiError, ErrorKind};
use crate::models::{AuthPolicy, BodyPassthrough, Principal, RouteEntry};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{web, HttpRequest, HttpResponse};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Request headers never forwarded upstream: hop-by-hop headers plus the
/// inbound credential headers (the backend gets identity via the injected
/// `X-Principal-*` headers instead, never the raw credential).
const STRIPPED_INBOUND_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "authorization",
    "x-api-key",
];

/// Per-backend pooled HTTP client cache, grounded on
/// `util::build_http_client_from_env`'s single shared-client idiom,
/// generalized to one client per backend name since each backend may need
/// distinct timeout/proxy settings in the future.
pub struct BackendClients {
    clients: Mutex<HashMap<String, reqwest::Client>>,
    default_timeout: Duration,
}

impl BackendClients {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn client_for(&self, backend: &str) -> reqwest::Client {
        let mut clients = self.clients.lock().expect("backend client map lock poisoned");
        clients
            .entry(backend.to_string())
            .or_insert_with(|| {
                reqwest::Client::builder()
                    .timeout(self.default_timeout)
                    .build()
                    .expect("failed to build backend http client")
            })
            .clone()
    }
}

fn backend_base_url(backend: &str) -> Result<String, ApiError> {
    let env_key = format!("BACKEND_{}_BASE_URL", backend.to_ascii_uppercase());
    std::env::var(&env_key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::BadGateway, format!("no base URL configured for backend '{backend}'")))
}

fn fill_path_template(template: &str, captures: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in captures {
        out = out.replace(&format!(":{name}"), value);
    }
    out
}

fn build_outbound_request(
    client: &reqwest::Client,
    base_url: &str,
    path: &str,
    method: &actix_web::http::Method,
    inbound: &HttpRequest,
    body: Option<Vec<u8>>,
) -> reqwest::RequestBuilder {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut builder = client.request(reqwest_method, url);

    for (name, value) in inbound.headers().iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if STRIPPED_INBOUND_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            builder = builder.header(name.as_str(), v);
        }
    }

    if let Some(bytes) = body {
        builder = builder.body(bytes);
    }
    builder
}

fn insert_identity_headers(
    builder: reqwest::RequestBuilder,
    request_id: Uuid,
    principal: Option<&Principal>,
) -> reqwest::RequestBuilder {
    let mut builder = builder.header("x-request-id", request_id.to_string());
    if let Some(p) = principal {
        builder = builder.header("x-principal-subject", p.subject_id.clone());
        let scopes: Vec<&str> = p.scopes.iter().map(|s| s.as_str()).collect();
        builder = builder.header("x-principal-scopes", scopes.join(","));
    }
    builder
}

fn map_upstream_error(err: &reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::new(ErrorKind::GatewayTimeout, "upstream request timed out")
    } else {
        ApiError::new(ErrorKind::UpstreamUnavailable, format!("upstream request failed: {err}"))
    }
}

fn actix_response_from_reqwest(status: reqwest::StatusCode, headers: &reqwest::header::HeaderMap, body: bytes::Bytes) -> HttpResponse {
    let actix_status = actix_web::http::StatusCode::from_u16(status.as_u16())
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let mut response = HttpResponse::build(actix_status);
    for (name, value) in headers.iter() {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            let lower = n.as_str().to_ascii_lowercase();
            if lower == "connection" || lower == "transfer-encoding" || lower == "content-length" {
                continue;
            }
            response.insert_header((n, v));
        }
    }
    response.body(body)
}

/// Forwards one matched request to its backend. `retry_budget` bounds
/// bounded-jitter retries and must be zero for non-idempotent routes
/// (enforced by the caller via `route.idempotent`).
pub async fn forward(
    clients: &BackendClients,
    route: &RouteEntry,
    captures: &HashMap<String, String>,
    req: &HttpRequest,
    body: Option<Vec<u8>>,
    principal: Option<&Principal>,
    request_id: Uuid,
) -> Result<HttpResponse, ApiError> {
    let base_url = backend_base_url(&route.backend)?;
    let path = fill_path_template(&route.upstream_path_template, captures);
    let client = clients.client_for(&route.backend);

    let max_attempts = if route.idempotent { 3 } else { 1 };
    let mut last_err: Option<ApiError> = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let jitter_ms = rand::thread_rng().gen_range(20..150);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
        }

        let builder = build_outbound_request(&client, &base_url, &path, req.method(), req, body.clone());
        let builder = insert_identity_headers(builder, request_id, principal);

        let send_result = if let Some(timeout_secs) = route.timeout_seconds {
            tokio::time::timeout(Duration::from_secs(timeout_secs), builder.send()).await
        } else {
            Ok(builder.send().await)
        };

        match send_result {
            Ok(Ok(response)) => {
                let status = response.status();
                let headers = response.headers().clone();
                if status.is_server_error() && attempt + 1 < max_attempts {
                    last_err = Some(ApiError::new(ErrorKind::BadGateway, format!("upstream returned {status}")));
                    continue;
                }
                let body_bytes = response
                    .bytes()
                    .await
                    .map_err(|e| map_upstream_error(&e))?;
                return Ok(actix_response_from_reqwest(status, &headers, body_bytes));
            }
            Ok(Err(e)) => {
                let mapped = map_upstream_error(&e);
                if attempt + 1 < max_attempts {
                    last_err = Some(mapped);
                    continue;
                }
                return Err(mapped);
            }
            Err(_) => {
                let timeout_err = ApiError::new(ErrorKind::GatewayTimeout, "upstream request timed out");
                if attempt + 1 < max_attempts {
                    last_err = Some(timeout_err);
                    continue;
                }
                return Err(timeout_err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ApiError::internal("proxy retry loop exhausted without a result")))
}

/// Whether the route's body-passthrough setting requires reading the
/// inbound body at all (`BodyPassthrough::None` skips the read entirely).
pub fn should_read_body(entry: &RouteEntry) -> bool {
    !matches!(entry.body_passthrough, BodyPassthrough::None)
}

pub fn requires_authentication(policy: &AuthPolicy) -> bool {
    !matches!(policy, AuthPolicy::Public)
}

pub async fn read_body_respecting_limit(mut payload: web::Payload, max_bytes: usize) -> Result<Vec<u8>, ApiError> {
    use futures_util::StreamExt;
    let mut bytes = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::new(ErrorKind::BadGateway, format!("failed to read request body: {e}")))?;
        if bytes.len() + chunk.len() > max_bytes {
            return Err(ApiError::new(ErrorKind::PayloadTooLarge, "request body exceeds configured limit"));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BodyPassthrough;

    #[test]
    fn fill_path_template_substitutes_named_captures() {
        let mut captures = HashMap::new();
        captures.insert("id".to_string(), "abc-123".to_string());
        let filled = fill_path_template("/v1/conversations/:id/messages", &captures);
        assert_eq!(filled, "/v1/conversations/abc-123/messages");
    }

    #[test]
    fn body_passthrough_none_skips_body_read() {
        let entry = RouteEntry {
            method: "GET".into(),
            path_pattern: "/health".into(),
            backend: "kb".into(),
            upstream_path_template: "/health".into(),
            auth_policy: AuthPolicy::Public,
            body_passthrough: BodyPassthrough::None,
            idempotent: true,
            timeout_seconds: None,
        };
        assert!(!should_read_body(&entry));
    }

    #[test]
    fn public_policy_does_not_require_authentication() {
        assert!(!requires_authentication(&AuthPolicy::Public));
        assert!(requires_authentication(&AuthPolicy::RequirePrincipal));
        assert!(requires_authentication(&AuthPolicy::RequireScope("chat".into())));
    }

    #[test]
    fn backend_base_url_reads_per_backend_env_var() {
        std::env::set_var("BACKEND_KB_BASE_URL", "http://kb.internal:9000");
        let url = backend_base_url("kb").unwrap();
        assert_eq!(url, "http://kb.internal:9000");
        std::env::remove_var("BACKEND_KB_BASE_URL");
    }

    #[test]
    fn missing_backend_base_url_is_bad_gateway() {
        std::env::remove_var("BACKEND_MISSING_BASE_URL");
        let err = backend_base_url("missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadGateway);
    }
}
