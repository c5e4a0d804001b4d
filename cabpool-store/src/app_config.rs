use cabpool_core::MatchRules;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub origin: OriginConfig,
    pub matching: MatchRules,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub routing: RoutingConfig,
}

/// The single origin every route is anchored at.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct OriginConfig {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoutingConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_routing_timeout")]
    pub timeout_seconds: u64,
}

fn default_routing_timeout() -> u64 {
    5
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overlay, optional.
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // `CABPOOL_MATCHING__MAX_PASSENGERS=4` style environment keys.
            .add_source(config::Environment::with_prefix("CABPOOL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
