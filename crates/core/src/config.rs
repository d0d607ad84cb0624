use std::env;

use serde::{Deserialize, Serialize};

/// Default number of posts (or rules) processed per task execution.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Default retry budget declared by every engine task.
pub const DEFAULT_MAX_RETRIES: u32 = 9;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub postgres: PostgresConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RULESCOPE_PROFILE`. When set (e.g. `STAGING`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RULESCOPE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:      batch_size={}, max_retries={}",
            self.engine.batch_size,
            self.engine.max_retries
        );
        tracing::info!(
            "  postgres:    host={}, db={}, max_connections={}",
            self.postgres.host,
            self.postgres.database,
            self.postgres.max_connections
        );
    }

    /// A batch size source that re-reads this profile's environment on every call.
    pub fn batch_size_source(&self) -> EnvBatchSize {
        EnvBatchSize::new(&self.profile)
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub batch_size: u64,
    pub max_retries: u32,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            batch_size: sanitize_batch_size(profiled_env_u64(
                p,
                "RULESCOPE_BATCH_SIZE",
                DEFAULT_BATCH_SIZE,
            )),
            max_retries: profiled_env_u32(p, "RULESCOPE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

fn sanitize_batch_size(size: u64) -> u64 {
    if size == 0 { DEFAULT_BATCH_SIZE } else { size }
}

// ── Batch size source ─────────────────────────────────────────

/// Supplies the batch size at the start of every task execution.
///
/// Implementations must be cheap; the value is read once per execution and
/// never cached inside a task message.
pub trait BatchSizeSource: Send + Sync {
    fn batch_size(&self) -> u64;
}

/// Constant batch size.
#[derive(Debug, Clone, Copy)]
pub struct FixedBatchSize(pub u64);

impl BatchSizeSource for FixedBatchSize {
    fn batch_size(&self) -> u64 {
        sanitize_batch_size(self.0)
    }
}

impl BatchSizeSource for EngineConfig {
    fn batch_size(&self) -> u64 {
        sanitize_batch_size(self.batch_size)
    }
}

/// Reads `RULESCOPE_BATCH_SIZE` (profiled) from the environment on every call.
#[derive(Debug, Clone)]
pub struct EnvBatchSize {
    profile: String,
}

impl EnvBatchSize {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_uppercase(),
        }
    }
}

impl BatchSizeSource for EnvBatchSize {
    fn batch_size(&self) -> u64 {
        sanitize_batch_size(profiled_env_u64(
            &self.profile,
            "RULESCOPE_BATCH_SIZE",
            DEFAULT_BATCH_SIZE,
        ))
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "PG_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "rulescope"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}
