use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub openweather_api_key: String,
    pub openweather_base_url: String,
    pub openweather_current_path: String,
    pub openweather_onecall_path: String,
    pub openweather_geocode_direct_path: String,
    pub openweather_max_retries: u32,
    pub database_url: String,
    pub bind_addr: String,
    pub weather_ttl_minutes: i64,
    pub provider_timeout_secs: u64,
    pub single_flight_capacity: u64,
    pub seed_locations_path: Option<String>,
    /// Serve generated weather instead of calling OpenWeather.
    pub use_mock_provider: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let use_mock_provider = match env::var("WEATHER_PROVIDER") {
            Ok(kind) if kind.eq_ignore_ascii_case("mock") => true,
            Ok(kind) if kind.eq_ignore_ascii_case("openweather") => false,
            Ok(kind) => anyhow::bail!("WEATHER_PROVIDER must be 'openweather' or 'mock', got '{}'", kind),
            Err(_) => false,
        };

        let openweather_api_key = match env::var("OPENWEATHER_API_KEY") {
            Ok(key) => key,
            Err(_) if use_mock_provider => String::new(),
            Err(_) => anyhow::bail!("OPENWEATHER_API_KEY not set"),
        };

        Ok(Config {
            openweather_api_key,
            openweather_base_url: env::var("OPENWEATHER_BASE_URL")
                .unwrap_or_else(|_| "https://api.openweathermap.org".to_string()),
            openweather_current_path: env::var("OPENWEATHER_CURRENT_PATH")
                .unwrap_or_else(|_| "/data/2.5/weather".to_string()),
            openweather_onecall_path: env::var("OPENWEATHER_ONECALL_PATH")
                .unwrap_or_else(|_| "/data/3.0/onecall".to_string()),
            openweather_geocode_direct_path: env::var("OPENWEATHER_GEOCODE_DIRECT_PATH")
                .unwrap_or_else(|_| "/geo/1.0/direct".to_string()),
            openweather_max_retries: parse_var("OPENWEATHER_MAX_RETRIES", 2)?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./weather_locator.db?mode=rwc".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            weather_ttl_minutes: parse_var("WEATHER_TTL_MINUTES", 30)?,
            provider_timeout_secs: parse_var("PROVIDER_TIMEOUT_SECS", 10)?,
            single_flight_capacity: parse_var("SINGLE_FLIGHT_CAPACITY", 1000)?,
            seed_locations_path: env::var("SEED_LOCATIONS_PATH").ok(),
            use_mock_provider,
        })
    }

    /// Settings for talking to a local stub instead of the real API.
    #[cfg(test)]
    pub fn with_base_url(base_url: &str) -> Self {
        Config {
            openweather_api_key: "test-key".to_string(),
            openweather_base_url: base_url.to_string(),
            openweather_current_path: "/data/2.5/weather".to_string(),
            openweather_onecall_path: "/data/3.0/onecall".to_string(),
            openweather_geocode_direct_path: "/geo/1.0/direct".to_string(),
            openweather_max_retries: 0,
            database_url: "sqlite::memory:".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            weather_ttl_minutes: 30,
            provider_timeout_secs: 10,
            single_flight_capacity: 1000,
            seed_locations_path: None,
            use_mock_provider: false,
        }
    }

    pub fn weather_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.weather_ttl_minutes)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}
