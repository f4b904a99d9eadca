//! CORS configuration.
//!
//! Grounded verbatim on the teacher's `util::cors_config_from_env`: same
//! permissive-by-default shape (wildcard methods/headers, allow-any-origin
//! when unset), the one difference being that the allowed-origin list comes
//! from the already-parsed `GatewayConfig` (§6's `CORS_ALLOW_ORIGINS`)
//! instead of re-reading the environment here.

use crate::config::GatewayConfig;

pub fn cors_from_config(config: &GatewayConfig) -> actix_cors::Cors {
    let mut cors = actix_cors::Cors::default();

    if config.cors_allow_origins.is_empty() {
        cors = cors.allow_any_origin();
    } else {
        for origin in &config.cors_allow_origins {
            if origin == "*" {
                cors = cors.allow_any_origin();
            } else {
                cors = cors.allowed_origin(origin);
            }
        }
    }

    cors = cors
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);

    if std::env::var("CORS_ALLOW_CREDENTIALS")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
    {
        cors = cors.supports_credentials();
    }

    cors
}
