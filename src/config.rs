use crate::error::AppError;
use crate::middleware::auth::AnonymousPolicy;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Per-connection liveness and backpressure settings.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Capacity of each client's outbound queue; deliveries beyond it are dropped
    pub queue_capacity: usize,
    /// How long the read side waits for a pong before declaring the peer dead
    pub pong_wait: Duration,
    /// Deadline for a single flush or ping on the write side
    pub write_wait: Duration,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
    pub anonymous_policy: AnonymousPolicy,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: 512 * 1024,
            anonymous_policy: AnonymousPolicy::Allow,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    /// REST port (health, presence, metrics)
    pub port: u16,
    /// WebSocket listener port
    pub ws_port: u16,
    pub jwt_secret: String,
    pub websocket: WebSocketConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_vars<F>(var: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = WebSocketConfig::default();

        let jwt_secret = var("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&var, "PORT", 8080u16)?;
        let ws_port = parse_or(&var, "WS_PORT", 8081u16)?;

        let anonymous_policy = match var("WS_ALLOW_ANONYMOUS") {
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => AnonymousPolicy::Reject,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => AnonymousPolicy::Allow,
            Some(v) => {
                return Err(AppError::Config(format!(
                    "WS_ALLOW_ANONYMOUS must be true or false, got {v}"
                )))
            }
            None => defaults.anonymous_policy,
        };

        let websocket = WebSocketConfig {
            queue_capacity: parse_or(&var, "WS_QUEUE_CAPACITY", defaults.queue_capacity)?,
            pong_wait: Duration::from_secs(parse_or(
                &var,
                "WS_PONG_WAIT_SECS",
                defaults.pong_wait.as_secs(),
            )?),
            write_wait: Duration::from_secs(parse_or(
                &var,
                "WS_WRITE_WAIT_SECS",
                defaults.write_wait.as_secs(),
            )?),
            max_message_size: parse_or(&var, "WS_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            anonymous_policy,
        };

        let config = Self {
            host,
            port,
            ws_port,
            jwt_secret,
            websocket,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        let ws = &self.websocket;
        if ws.queue_capacity == 0 {
            return Err(AppError::Config("WS_QUEUE_CAPACITY must be > 0".into()));
        }
        if ws.pong_wait.is_zero() {
            return Err(AppError::Config("WS_PONG_WAIT_SECS must be > 0".into()));
        }
        if ws.write_wait.is_zero() {
            return Err(AppError::Config("WS_WRITE_WAIT_SECS must be > 0".into()));
        }
        if ws.max_message_size == 0 {
            return Err(AppError::Config("WS_MAX_MESSAGE_SIZE must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} is not a valid value: {raw}"))),
        None => Ok(default),
    }
}
