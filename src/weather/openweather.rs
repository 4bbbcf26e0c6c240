use super::types::*;
use super::{CurrentConditions, DailyOutlook, GeocodedPlace, ProviderError, WeatherProvider};
use crate::config::Config;
use crate::database::Location;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum OpenWeatherError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),
    #[error("Rate limited, retry after: {0}s")]
    RateLimited(u64),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Invalid coordinates")]
    InvalidCoordinates,
}

impl From<OpenWeatherError> for ProviderError {
    fn from(err: OpenWeatherError) -> Self {
        match err {
            OpenWeatherError::RequestFailed(e) => ProviderError::Request(e.to_string()),
            OpenWeatherError::JsonParsing(e) => ProviderError::Decode(e.to_string()),
            OpenWeatherError::RateLimited(_) => ProviderError::RateLimited,
            OpenWeatherError::ApiError(message) => ProviderError::Api(message),
            OpenWeatherError::InvalidCoordinates => {
                ProviderError::Api("invalid coordinates".to_string())
            }
        }
    }
}

pub struct OpenWeatherClient {
    client: Client,
    config: Config,
}

impl OpenWeatherClient {
    pub fn new(config: Config) -> Result<Self, OpenWeatherError> {
        let client = Client::builder()
            .user_agent("WeatherLocator/1.0")
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    pub async fn get_current(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<CurrentWeatherResponse, OpenWeatherError> {
        if !self.is_valid_coordinates(lat, lon) {
            return Err(OpenWeatherError::InvalidCoordinates);
        }

        let url = format!(
            "{}{}",
            self.config.openweather_base_url, self.config.openweather_current_path
        );

        let response = self
            .make_request_with_retry(&url, &[
                ("lat", &lat.to_string()),
                ("lon", &lon.to_string()),
                ("units", "metric"),
                ("appid", &self.config.openweather_api_key),
            ])
            .await?;

        let current: CurrentWeatherResponse = serde_json::from_value(response)?;
        Ok(current)
    }

    pub async fn get_onecall(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<OneCallResponse, OpenWeatherError> {
        if !self.is_valid_coordinates(lat, lon) {
            return Err(OpenWeatherError::InvalidCoordinates);
        }

        let url = format!(
            "{}{}",
            self.config.openweather_base_url, self.config.openweather_onecall_path
        );

        let response = self
            .make_request_with_retry(&url, &[
                ("lat", &lat.to_string()),
                ("lon", &lon.to_string()),
                ("units", "metric"),
                ("exclude", "current,minutely,hourly,alerts"),
                ("appid", &self.config.openweather_api_key),
            ])
            .await?;

        let onecall: OneCallResponse = serde_json::from_value(response)?;
        Ok(onecall)
    }

    pub async fn geocode_direct(&self, query: &str) -> Result<Vec<GeocodeResponse>, OpenWeatherError> {
        let url = format!(
            "{}{}",
            self.config.openweather_base_url, self.config.openweather_geocode_direct_path
        );

        let response = self
            .make_request_with_retry(&url, &[
                ("q", query),
                ("limit", "5"),
                ("appid", &self.config.openweather_api_key),
            ])
            .await?;

        let geocode: Vec<GeocodeResponse> = serde_json::from_value(response)?;
        Ok(geocode)
    }

    async fn make_request_with_retry(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, OpenWeatherError> {
        let mut retry_count = 0;
        let max_retries = self.config.openweather_max_retries;
        let mut delay = Duration::from_millis(1000);

        loop {
            let response = self.client.get(url).query(params).send().await?;

            match response.status() {
                reqwest::StatusCode::OK => {
                    let json: Value = response.json().await?;
                    return Ok(json);
                }
                reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    if retry_count >= max_retries {
                        return Err(OpenWeatherError::RateLimited(delay.as_secs()));
                    }

                    tracing::warn!(
                        "Rate limited by OpenWeather API, retrying in {}ms",
                        delay.as_millis()
                    );

                    sleep(delay).await;
                    delay = delay.mul_f32(2.0 + fastrand::f32() * 0.5); // Exponential backoff with jitter
                    retry_count += 1;
                }
                status => {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(OpenWeatherError::ApiError(format!(
                        "HTTP {}: {}",
                        status, error_text
                    )));
                }
            }
        }
    }

    fn is_valid_coordinates(&self, lat: f64, lon: f64) -> bool {
        (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn fetch_current(&self, location: &Location) -> Result<CurrentConditions, ProviderError> {
        let current = self.get_current(location.latitude, location.longitude).await?;
        Ok(CurrentConditions::from(&current))
    }

    async fn fetch_daily(&self, lat: f64, lng: f64) -> Result<Vec<DailyOutlook>, ProviderError> {
        let onecall = self.get_onecall(lat, lng).await?;
        Ok(onecall
            .daily
            .iter()
            .map(|day| DailyOutlook::from_onecall_daily(day, onecall.timezone_offset))
            .collect())
    }

    async fn geocode(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<GeocodedPlace>, ProviderError> {
        let query = match country {
            Some(country) => format!("{},{}", name, country),
            None => name.to_string(),
        };

        let places = self.geocode_direct(&query).await?;
        Ok(places
            .into_iter()
            .map(|place| GeocodedPlace {
                name: place.name,
                country: place.country,
                latitude: place.lat,
                longitude: place.lon,
            })
            .collect())
    }
}

fn unix_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

// Convert OpenWeather data to internal format
impl From<&CurrentWeatherResponse> for CurrentConditions {
    fn from(current: &CurrentWeatherResponse) -> Self {
        let condition = current
            .weather
            .first()
            .map(|w| w.main.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            temperature: current.main.temp,
            feels_like: current.main.feels_like,
            pressure: current.main.pressure,
            humidity: current.main.humidity,
            wind_speed: current.wind.speed,
            wind_direction_degrees: current.wind.deg,
            sunrise: unix_to_utc(current.sys.sunrise),
            sunset: unix_to_utc(current.sys.sunset),
            condition,
        }
    }
}

impl DailyOutlook {
    pub fn from_onecall_daily(daily: &OneCallDaily, timezone_offset: i32) -> Self {
        // Calendar day as seen at the location, not in UTC.
        let date = unix_to_utc(daily.dt + i64::from(timezone_offset)).date_naive();

        Self {
            date,
            min_temperature: daily.temp.min,
            max_temperature: daily.temp.max,
            precipitation_probability: daily.pop.clamp(0.0, 1.0),
        }
    }
}
