//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use fittrack_core::TokenPricing;

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. Without one the service runs on the in-memory store.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size.
    pub database_max_connections: u32,

    /// HS256 secret shared with the auth backend that issues user JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT audience; not checked when unset.
    pub auth_audience: Option<String>,

    /// Service API key for cron and service-to-service calls.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// OpenAI API key (optional; AI endpoints answer 502 without it).
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL.
    pub openai_base_url: String,

    /// Model used for audio transcription.
    pub openai_transcription_model: String,

    /// Model used for recipe generation.
    pub openai_chat_model: String,

    /// Wearable provider API base URL (optional).
    pub wearable_api_url: Option<String>,

    /// Secret used to verify wearable webhook signatures (optional).
    pub wearable_webhook_secret: Option<String>,

    /// Session lifetime in hours.
    pub session_ttl_hours: i64,

    /// How often expired sessions are purged, in seconds.
    pub session_purge_interval_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Timeout for outbound calls to OpenAI and wearable providers.
    pub external_timeout_seconds: u64,

    /// Token prices and plan allowances.
    pub pricing: TokenPricing,
}

/// OpenAI secrets file structure.
#[derive(Debug, Deserialize)]
struct OpenAiSecrets {
    api_key: String,
    #[serde(default)]
    base_url: Option<String>,
}

/// Wearable provider secrets file structure.
#[derive(Debug, Deserialize)]
struct WearableSecrets {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    webhook_secret: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (openai_api_key, openai_base_url) = load_openai_secrets();
        let (wearable_api_url, wearable_webhook_secret) = load_wearable_secrets();

        let defaults = TokenPricing::default();
        let pricing = TokenPricing {
            transcription_cost: env_parse("TRANSCRIPTION_TOKEN_COST", defaults.transcription_cost),
            recipe_details_cost: env_parse("RECIPE_TOKEN_COST", defaults.recipe_details_cost),
            free_monthly_tokens: env_parse("FREE_MONTHLY_TOKENS", defaults.free_monthly_tokens),
            premium_monthly_tokens: env_parse(
                "PREMIUM_MONTHLY_TOKENS",
                defaults.premium_monthly_tokens,
            ),
        };

        Self {
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            auth_jwt_secret: env_opt("AUTH_JWT_SECRET"),
            auth_audience: env_opt("AUTH_AUDIENCE"),
            service_api_key: env_opt("SERVICE_API_KEY"),
            admin_api_key: env_opt("ADMIN_API_KEY"),
            openai_api_key,
            openai_base_url,
            openai_transcription_model: env_or("OPENAI_TRANSCRIPTION_MODEL", "whisper-1"),
            openai_chat_model: env_or("OPENAI_CHAT_MODEL", "gpt-4o-mini"),
            wearable_api_url,
            wearable_webhook_secret,
            session_ttl_hours: env_parse("SESSION_TTL_HOURS", 24 * 7),
            session_purge_interval_seconds: env_parse("SESSION_PURGE_INTERVAL_SECONDS", 3600),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 10 * 1024 * 1024), // 10MB, audio uploads
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 60),
            external_timeout_seconds: env_parse("EXTERNAL_TIMEOUT_SECONDS", 45),
            pricing,
        }
    }
}

/// Load OpenAI secrets from file or environment.
fn load_openai_secrets() -> (Option<String>, String) {
    let secret_paths = [".secrets/openai.json", "../.secrets/openai.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<OpenAiSecrets>(path) {
            tracing::info!(path = %path, "Loaded OpenAI secrets from file");
            return (
                Some(secrets.api_key),
                secrets
                    .base_url
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            );
        }
    }

    tracing::debug!("OpenAI secrets file not found, using environment variables");
    (
        env_opt("OPENAI_API_KEY"),
        env_or("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
    )
}

/// Load wearable provider secrets from file or environment.
fn load_wearable_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/wearables.json", "../.secrets/wearables.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<WearableSecrets>(path) {
            tracing::info!(path = %path, "Loaded wearable secrets from file");
            return (secrets.api_url, secrets.webhook_secret);
        }
    }

    tracing::debug!("Wearable secrets file not found, using environment variables");
    (
        env_opt("WEARABLE_API_URL"),
        env_opt("WEARABLE_WEBHOOK_SECRET"),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            auth_jwt_secret: None,
            auth_audience: None,
            service_api_key: None,
            admin_api_key: None,
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.into(),
            openai_transcription_model: "whisper-1".into(),
            openai_chat_model: "gpt-4o-mini".into(),
            wearable_api_url: None,
            wearable_webhook_secret: None,
            session_ttl_hours: 24 * 7,
            session_purge_interval_seconds: 3600,
            cors_origins: vec!["*".into()],
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout_seconds: 60,
            external_timeout_seconds: 45,
            pricing: TokenPricing::default(),
        }
    }
}
