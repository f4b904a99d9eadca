//! HTTP handlers, grouped by the component they front. Each submodule
//! corresponds to one row of SPEC_FULL.md's external-interface table and
//! is registered onto an `actix_web::Scope` by `app::configure`.

pub mod auth_passthrough;
pub mod chat;
pub mod conversations;
pub mod health;
pub mod kb;

use crate::credential::CredentialResolver;
use crate::error::{ApiError, ErrorKind};
use crate::models::Principal;
use actix_web::HttpRequest;

/// Extracts and resolves the caller's credentials from the standard
/// header pair (`X-API-Key`, `Authorization: Bearer ...`), per §4.1.
pub async fn resolve_principal(
    resolver: &CredentialResolver,
    req: &HttpRequest,
) -> Result<Principal, ApiError> {
    let opaque_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    resolver
        .resolve(opaque_key, bearer)
        .await
        .map_err(|e| match e {
            crate::credential::CredentialError::Missing => ApiError::new(ErrorKind::MissingCredential, "no credential provided"),
            crate::credential::CredentialError::Malformed => ApiError::new(ErrorKind::MalformedCredential, "credential is malformed"),
            crate::credential::CredentialError::Expired => ApiError::new(ErrorKind::ExpiredCredential, "credential has expired"),
            crate::credential::CredentialError::Revoked => ApiError::new(ErrorKind::RevokedCredential, "credential has been revoked"),
            crate::credential::CredentialError::UpstreamUnavailable(detail) => {
                ApiError::new(ErrorKind::UpstreamUnavailable, detail)
            }
        })
}

pub fn require_scope(principal: &Principal, scope: &str) -> Result<(), ApiError> {
    if principal.has_scope(scope) {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorKind::InsufficientScope,
            format!("missing required scope '{scope}'"),
        ))
    }
}
