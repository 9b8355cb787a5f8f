use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub rate_limit: RateLimitConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin of the web mini-app, used for CORS.
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the collaborator API
    pub api_per_second: u32,
    /// Burst size for the collaborator API
    pub api_burst: u32,
}

pub const MIN_BATCH_SIZE: u32 = 50;
pub const MAX_BATCH_SIZE: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Whether the dispatcher loop is started at all.
    pub enabled: bool,
    /// Global channel send budget shared by broadcasts and queued notices.
    pub rate_per_second: u32,
    /// Rows pulled per broadcast batch. The queue phase uses `min(batch_size, 100)`.
    pub batch_size: u32,
    /// Additional attempts allowed after the first one for transient failures.
    pub retry_ceiling: u32,
    /// Backoff for the first retry; doubled per attempt.
    pub retry_base_ms: u64,
    /// Cap for exponential backoff.
    pub retry_max_backoff_ms: u64,
    /// Sleep between cycles when neither phase found work.
    pub idle_interval_ms: u64,
}

impl DispatchConfig {
    pub fn queue_batch_size(&self) -> u32 {
        self.batch_size.min(100)
    }
}

/// Batch size outside `[MIN_BATCH_SIZE, MAX_BATCH_SIZE]` is clamped rather than rejected.
pub fn clamp_batch_size(value: u32) -> u32 {
    value.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let rate_per_second: u32 = env::var("DISPATCH_RATE_PER_SECOND")
            .unwrap_or_else(|_| "25".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DISPATCH_RATE_PER_SECOND".to_string()))?;
        if rate_per_second == 0 {
            return Err(ConfigError::InvalidValue(
                "DISPATCH_RATE_PER_SECOND".to_string(),
            ));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/taskbot.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            },
            rate_limit: RateLimitConfig {
                api_per_second: env::var("RATE_LIMIT_API_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                api_burst: env::var("RATE_LIMIT_API_BURST")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
            dispatch: DispatchConfig {
                enabled: env::var("DISPATCH_ENABLED")
                    .map(|v| parse_bool(&v, true))
                    .unwrap_or(true),
                rate_per_second,
                batch_size: clamp_batch_size(
                    env::var("DISPATCH_BATCH_SIZE")
                        .unwrap_or_else(|_| "100".to_string())
                        .parse()
                        .unwrap_or(100u32),
                ),
                retry_ceiling: env::var("DISPATCH_RETRY_CEILING")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2u32),
                retry_base_ms: env::var("DISPATCH_RETRY_BASE_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(1000u64),
                retry_max_backoff_ms: env::var("DISPATCH_RETRY_MAX_BACKOFF_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30_000u64),
                idle_interval_ms: env::var("DISPATCH_IDLE_INTERVAL_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500u64),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            enabled: true,
            rate_per_second: 25,
            batch_size: 100,
            retry_ceiling: 2,
            retry_base_ms: 1000,
            retry_max_backoff_ms: 30_000,
            idle_interval_ms: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/taskbot.db".to_string(),
                max_connections: 5,
            },
            telegram: TelegramConfig { bot_token: None },
            rate_limit: RateLimitConfig {
                api_per_second: 10,
                api_burst: 30,
            },
            dispatch: DispatchConfig::default(),
        }
    }
}
