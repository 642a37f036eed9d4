use std::env;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;
use crate::store::StoreConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub session_ttl_seconds: u64,
    pub join_rate_limit: u32,
    pub join_rate_window_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("LIFELINE_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            session_ttl_seconds: env::var("LIFELINE_SESSION_TTL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(30 * 60),
            join_rate_limit: env::var("LIFELINE_JOIN_RATE_LIMIT")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(10),
            join_rate_window_seconds: env::var("LIFELINE_JOIN_RATE_WINDOW")
                .ok()
                .and_then(|n| n.parse().ok())
                .unwrap_or(60),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            session_ttl: Duration::from_secs(self.session_ttl_seconds),
            rate_limit: RateLimitConfig {
                max_attempts: self.join_rate_limit,
                window: Duration::from_secs(self.join_rate_window_seconds),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            session_ttl_seconds: 30 * 60,
            join_rate_limit: 10,
            join_rate_window_seconds: 60,
        }
    }
}
