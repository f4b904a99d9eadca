//! Credential Resolver (§4.1).
//!
//! Normalises two credential shapes — a long-lived opaque key (custom
//! header) and a bearer token (`Authorization: Bearer`) — into a single
//! [`Principal`]. Grounded on the teacher's `auth.rs`: the same
//! `sk_<id>.<secret>` token shape, salted-SHA-256 verification, and
//! `RwLock<HashMap<...>>`-guarded cache idiom, extended with a bearer-token
//! path (new — the teacher only had opaque keys) and a bounded-TTL LRU
//! instead of the teacher's unbounded warm cache, per spec.md's "bounded
//! LRU keyed by the raw credential, TTL <= 5 minutes" requirement.

use crate::models::{CredentialKind, Principal};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing credential")]
    Missing,
    #[error("malformed credential")]
    Malformed,
    #[error("expired credential")]
    Expired,
    #[error("revoked credential")]
    Revoked,
    #[error("identity service unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// What the external identity service (out of scope) returns when asked
/// to verify an opaque key. `user_subject_id` is the field downstream
/// tenancy must be read from — *never* `key_id`. This distinction exists
/// because the historical defect named in spec.md §9 collapsed the two.
#[derive(Debug, Clone)]
pub struct OpaqueKeyVerification {
    pub key_id: String,
    pub user_subject_id: String,
    pub expires_at: Option<u64>,
    pub scopes: Vec<String>,
}

/// Claims returned after verifying a bearer token's signature against the
/// published key set.
#[derive(Debug, Clone)]
pub struct BearerClaims {
    pub subject_id: String,
    pub issued_at: u64,
    pub expires_at: Option<u64>,
    pub scopes: Vec<String>,
}

/// Abstract identity service client (out of scope per spec.md §1).
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn verify_opaque_key(
        &self,
        raw_key: &str,
    ) -> Result<OpaqueKeyVerification, CredentialError>;
}

/// Abstract JWKS-backed bearer verifier (out of scope per spec.md §1).
#[async_trait]
pub trait BearerVerifier: Send + Sync {
    /// Verify a bearer token's signature and decode its claims. `allow_refetch`
    /// is false on the second attempt within one request, enforcing
    /// "verification failures never refetch more than once per request".
    async fn verify(
        &self,
        token: &str,
        allow_refetch: bool,
    ) -> Result<BearerClaims, CredentialError>;
}

/// The one place a user subject is ever pulled out of an opaque-key
/// verification response. A regression here (returning `key_id` instead)
/// is the defect spec.md §9 calls out explicitly.
fn subject_from_identity_response(v: &OpaqueKeyVerification) -> &str {
    &v.user_subject_id
}

#[derive(Clone)]
struct CacheEntry {
    principal: Principal,
    inserted_at: Instant,
}

/// A small bounded LRU, strictly in-memory per process, keyed by the raw
/// credential string. Entries older than `ttl` are treated as misses.
struct CredentialCache {
    capacity: usize,
    ttl: Duration,
    order: VecDeque<String>,
    entries: HashMap<String, CacheEntry>,
}

impl CredentialCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<Principal> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }
        let principal = entry.principal.clone();
        self.touch(key);
        Some(principal)
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn put(&mut self, key: String, principal: Principal) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                principal,
                inserted_at: Instant::now(),
            },
        );
        self.touch(&key);
    }
}

/// Translates inbound credentials to a uniform [`Principal`]; caches
/// validations in a bounded, TTL-expiring LRU.
pub struct CredentialResolver {
    identity: Arc<dyn IdentityClient>,
    bearer: Arc<dyn BearerVerifier>,
    cache: Mutex<CredentialCache>,
    cache_enabled: bool,
}

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

impl CredentialResolver {
    pub fn new(identity: Arc<dyn IdentityClient>, bearer: Arc<dyn BearerVerifier>) -> Self {
        Self::with_cache_params(identity, bearer, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache_params(
        identity: Arc<dyn IdentityClient>,
        bearer: Arc<dyn BearerVerifier>,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            identity,
            bearer,
            cache: Mutex::new(CredentialCache::new(capacity, ttl)),
            cache_enabled: crate::config::credential_cache_enabled(),
        }
    }

    /// Resolve a request's credentials. If both an opaque key and a bearer
    /// token are present, the bearer token wins and the key is ignored
    /// (spec.md §4.1 / §8 scenario 3).
    pub async fn resolve(
        &self,
        opaque_key: Option<&str>,
        bearer_header: Option<&str>,
    ) -> Result<Principal, CredentialError> {
        if let Some(raw) = bearer_header {
            return self.resolve_bearer(raw).await;
        }
        if let Some(raw) = opaque_key {
            return self.resolve_opaque(raw).await;
        }
        Err(CredentialError::Missing)
    }

    async fn resolve_opaque(&self, raw_key: &str) -> Result<Principal, CredentialError> {
        if raw_key.trim().is_empty() {
            return Err(CredentialError::Malformed);
        }
        if self.cache_enabled {
            if let Some(p) = self.cache.lock().unwrap().get(raw_key) {
                return Ok(p);
            }
        }

        let verification = self.identity.verify_opaque_key(raw_key).await?;
        let now = crate::models::now_epoch_secs();
        if let Some(exp) = verification.expires_at {
            if now >= exp {
                return Err(CredentialError::Expired);
            }
        }

        let principal = Principal {
            subject_id: subject_from_identity_response(&verification).to_string(),
            credential_kind: CredentialKind::OpaqueKey,
            issued_at: now,
            expires_at: verification.expires_at,
            scopes: verification.scopes.iter().cloned().collect(),
            audit_credential_kind: CredentialKind::OpaqueKey,
        };

        if self.cache_enabled {
            self.cache
                .lock()
                .unwrap()
                .put(raw_key.to_string(), principal.clone());
        }
        Ok(principal)
    }

    async fn resolve_bearer(&self, raw_header: &str) -> Result<Principal, CredentialError> {
        let token = parse_bearer_header(raw_header)?;
        if self.cache_enabled {
            if let Some(p) = self.cache.lock().unwrap().get(token) {
                return Ok(p);
            }
        }

        let claims = match self.bearer.verify(token, true).await {
            Ok(c) => c,
            Err(CredentialError::UpstreamUnavailable(_)) => self.bearer.verify(token, false).await?,
            Err(e) => return Err(e),
        };

        let now = crate::models::now_epoch_secs();
        if let Some(exp) = claims.expires_at {
            if now >= exp {
                return Err(CredentialError::Expired);
            }
        }

        let principal = Principal {
            subject_id: claims.subject_id,
            credential_kind: CredentialKind::BearerToken,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
            scopes: claims.scopes.iter().cloned().collect(),
            audit_credential_kind: CredentialKind::BearerToken,
        };

        if self.cache_enabled {
            self.cache
                .lock()
                .unwrap()
                .put(token.to_string(), principal.clone());
        }
        Ok(principal)
    }
}

fn parse_bearer_header(raw: &str) -> Result<&str, CredentialError> {
    let s = raw.trim();
    if s.len() < 7 {
        return Err(CredentialError::Malformed);
    }
    let (scheme, rest) = s.split_at(6);
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(CredentialError::Malformed);
    }
    let token = rest.trim();
    if token.is_empty() {
        return Err(CredentialError::Malformed);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeIdentity {
        user_subject: String,
        key_id: String,
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn verify_opaque_key(
            &self,
            _raw_key: &str,
        ) -> Result<OpaqueKeyVerification, CredentialError> {
            Ok(OpaqueKeyVerification {
                key_id: self.key_id.clone(),
                user_subject_id: self.user_subject.clone(),
                expires_at: None,
                scopes: vec![],
            })
        }
    }

    struct FakeBearer {
        subject: String,
        fetch_count: AtomicUsize,
    }

    #[async_trait]
    impl BearerVerifier for FakeBearer {
        async fn verify(
            &self,
            _token: &str,
            _allow_refetch: bool,
        ) -> Result<BearerClaims, CredentialError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            Ok(BearerClaims {
                subject_id: self.subject.clone(),
                issued_at: crate::models::now_epoch_secs(),
                expires_at: None,
                scopes: vec!["chat".into()],
            })
        }
    }

    #[tokio::test]
    async fn opaque_key_resolves_to_user_subject_not_key_id() {
        let identity = Arc::new(FakeIdentity {
            user_subject: "user-123".into(),
            key_id: "key-abc".into(),
        });
        let bearer = Arc::new(FakeBearer {
            subject: "unused".into(),
            fetch_count: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(identity, bearer);

        let principal = resolver.resolve(Some("sk_anything"), None).await.unwrap();
        assert_eq!(principal.subject_id, "user-123");
        assert_ne!(principal.subject_id, "key-abc");
    }

    #[tokio::test]
    async fn bearer_token_wins_over_opaque_key() {
        let identity = Arc::new(FakeIdentity {
            user_subject: "subject-a".into(),
            key_id: "key-a".into(),
        });
        let bearer = Arc::new(FakeBearer {
            subject: "subject-b".into(),
            fetch_count: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(identity, bearer);

        let principal = resolver
            .resolve(Some("sk_a"), Some("Bearer token-b"))
            .await
            .unwrap();
        assert_eq!(principal.subject_id, "subject-b");
        assert_eq!(principal.credential_kind, CredentialKind::BearerToken);
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let identity = Arc::new(FakeIdentity {
            user_subject: "x".into(),
            key_id: "y".into(),
        });
        let bearer = Arc::new(FakeBearer {
            subject: "z".into(),
            fetch_count: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(identity, bearer);
        let err = resolver.resolve(None, None).await.unwrap_err();
        assert_eq!(err, CredentialError::Missing);
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_identity_call() {
        struct CountingIdentity {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl IdentityClient for CountingIdentity {
            async fn verify_opaque_key(
                &self,
                _raw_key: &str,
            ) -> Result<OpaqueKeyVerification, CredentialError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(OpaqueKeyVerification {
                    key_id: "k".into(),
                    user_subject_id: "s".into(),
                    expires_at: None,
                    scopes: vec![],
                })
            }
        }
        let identity = Arc::new(CountingIdentity {
            calls: AtomicUsize::new(0),
        });
        let bearer = Arc::new(FakeBearer {
            subject: "unused".into(),
            fetch_count: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(identity.clone(), bearer);

        resolver.resolve(Some("sk_same"), None).await.unwrap();
        resolver.resolve(Some("sk_same"), None).await.unwrap();
        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
    }
}
