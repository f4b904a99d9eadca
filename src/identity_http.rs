//! HTTP-backed `IdentityClient` and `BearerVerifier` implementations.
//!
//! The identity service and the bearer-token issuer are both out of scope
//! per §1 — this module only needs to call them. Grounded on
//! `kb_client::HttpKbClient`'s shape (constructor-injected `reqwest::Client`
//! plus base URL, one POST per call, typed response deserialization).

use crate::credential::{BearerClaims, BearerVerifier, CredentialError, IdentityClient, OpaqueKeyVerification};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct VerifyKeyResponse {
    key_id: String,
    user_subject_id: String,
    expires_at: Option<u64>,
    #[serde(default)]
    scopes: Vec<String>,
}

pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn verify_opaque_key(&self, raw_key: &str) -> Result<OpaqueKeyVerification, CredentialError> {
        let url = format!("{}/v1/keys/verify", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "key": raw_key }))
            .send()
            .await
            .map_err(|e| CredentialError::UpstreamUnavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: VerifyKeyResponse = response
                    .json()
                    .await
                    .map_err(|e| CredentialError::UpstreamUnavailable(format!("malformed identity response: {e}")))?;
                Ok(OpaqueKeyVerification {
                    key_id: body.key_id,
                    user_subject_id: body.user_subject_id,
                    expires_at: body.expires_at,
                    scopes: body.scopes,
                })
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(CredentialError::Revoked),
            reqwest::StatusCode::GONE => Err(CredentialError::Expired),
            reqwest::StatusCode::BAD_REQUEST => Err(CredentialError::Malformed),
            status => Err(CredentialError::UpstreamUnavailable(format!("identity service returned {status}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyTokenResponse {
    subject_id: String,
    issued_at: u64,
    expires_at: Option<u64>,
    #[serde(default)]
    scopes: Vec<String>,
}

/// Verifies bearer tokens against a JWKS-backed service, caching nothing
/// itself — the `CredentialResolver`'s LRU already covers that. `allow_refetch`
/// is forwarded as a query parameter so the upstream can decide whether to
/// consult a possibly-stale local key-set copy or force a refresh.
pub struct HttpBearerVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBearerVerifier {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl BearerVerifier for HttpBearerVerifier {
    async fn verify(&self, token: &str, allow_refetch: bool) -> Result<BearerClaims, CredentialError> {
        let url = format!(
            "{}/v1/tokens/verify?allow_refetch={}",
            self.base_url.trim_end_matches('/'),
            allow_refetch
        );
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| CredentialError::UpstreamUnavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: VerifyTokenResponse = response
                    .json()
                    .await
                    .map_err(|e| CredentialError::UpstreamUnavailable(format!("malformed identity response: {e}")))?;
                Ok(BearerClaims {
                    subject_id: body.subject_id,
                    issued_at: body.issued_at,
                    expires_at: body.expires_at,
                    scopes: body.scopes,
                })
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(CredentialError::Revoked),
            reqwest::StatusCode::GONE => Err(CredentialError::Expired),
            reqwest::StatusCode::BAD_REQUEST => Err(CredentialError::Malformed),
            status => Err(CredentialError::UpstreamUnavailable(format!("identity service returned {status}"))),
        }
    }
}
