//! Environment-driven configuration and tracing bootstrap.
//!
//! Grounded on the teacher's `util::init_tracing`: tolerant `.env`
//! discovery (explicit `ENV_FILE`/`ENVFILE`/`DOTENV_PATH`, then
//! `.envfile`, then `.env`, then a manual fallback parser that never
//! overwrites variables already set), followed by `RUST_LOG`-driven
//! `tracing_subscriber::EnvFilter` initialization.

use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize dotenv discovery and structured tracing. Idempotent enough
/// to call once at process startup; safe to call again in tests.
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "ENVFILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none"
        && std::path::Path::new(".envfile").is_file()
        && dotenvy::from_filename(".envfile").is_ok()
    {
        env_source = ".envfile".into();
    }

    if env_source == "none" && dotenvy::dotenv().is_ok() {
        env_source = ".env".into();
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,actix_web=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("environment loaded from: {}", env_source);
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_truthy(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Recognised environment configuration (§6). Every field corresponds to
/// one of the options the specification names.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub route_table_path: Option<String>,
    pub identity_endpoint: Option<String>,
    pub identity_jwks_cache_ttl: Duration,
    pub eventbus_endpoint: String,
    pub conversation_store_dsn: Option<String>,
    pub ratelimit_anonymous_per_minute: u32,
    pub ratelimit_authenticated_per_minute: u32,
    pub cors_allow_origins: Vec<String>,
    pub streaming_idle_timeout: Duration,
    pub streaming_word_buffer_ceiling_bytes: usize,
    pub streaming_directive_scan_limit_bytes: usize,
    pub orchestrator_tool_iterations_max: u32,
    pub orchestrator_classifier_deadline_ms: u64,
    pub default_request_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let cors_allow_origins = std::env::var("CORS_ALLOW_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            listen_addr: env_string("GATEWAY_LISTEN_ADDR", "0.0.0.0:8080"),
            tls_cert_path: std::env::var("GATEWAY_TLS_CERT_PATH").ok(),
            tls_key_path: std::env::var("GATEWAY_TLS_KEY_PATH").ok(),
            route_table_path: std::env::var("ROUTE_TABLE_PATH").ok(),
            identity_endpoint: std::env::var("IDENTITY_ENDPOINT").ok(),
            identity_jwks_cache_ttl: Duration::from_secs(env_u64("IDENTITY_JWKS_CACHE_TTL", 300)),
            eventbus_endpoint: env_string("EVENTBUS_ENDPOINT", "disabled"),
            conversation_store_dsn: std::env::var("CONVERSATION_STORE_DSN").ok(),
            ratelimit_anonymous_per_minute: env_u64("RATELIMIT_ANONYMOUS_PER_MINUTE", 30) as u32,
            ratelimit_authenticated_per_minute: env_u64(
                "RATELIMIT_AUTHENTICATED_PER_MINUTE",
                120,
            ) as u32,
            cors_allow_origins,
            streaming_idle_timeout: Duration::from_secs(env_u64(
                "STREAMING_IDLE_TIMEOUT_SECONDS",
                120,
            )),
            streaming_word_buffer_ceiling_bytes: env_u64(
                "STREAMING_WORD_BUFFER_CEILING_BYTES",
                256,
            ) as usize,
            streaming_directive_scan_limit_bytes: env_u64(
                "STREAMING_DIRECTIVE_SCAN_LIMIT_BYTES",
                4096,
            ) as usize,
            orchestrator_tool_iterations_max: env_u64("ORCHESTRATOR_TOOL_ITERATIONS_MAX", 4)
                as u32,
            orchestrator_classifier_deadline_ms: env_u64(
                "ORCHESTRATOR_CLASSIFIER_DEADLINE_MS",
                150,
            ),
            default_request_timeout: Duration::from_secs(env_u64(
                "GATEWAY_DEFAULT_TIMEOUT_SECONDS",
                30,
            )),
        }
    }

    pub fn eventbus_disabled(&self) -> bool {
        self.eventbus_endpoint.eq_ignore_ascii_case("disabled")
    }
}

/// Whether the credential-validation cache should be used (test escape
/// hatch), mirroring the teacher's `ROUTIIUM_KEYS_DISABLE_CACHE` flag.
pub fn credential_cache_enabled() -> bool {
    !env_truthy("GATEWAY_DISABLE_CREDENTIAL_CACHE", false)
}
