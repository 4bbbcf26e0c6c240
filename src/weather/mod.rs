pub mod mock;
pub mod openweather;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::database::Location;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Weather provider request failed: {0}")]
    Request(String),
    #[error("Weather provider returned an error: {0}")]
    Api(String),
    #[error("Weather provider rate limited the request")]
    RateLimited,
    #[error("Weather provider response could not be decoded: {0}")]
    Decode(String),
    #[error("Weather provider did not answer within {0:?}")]
    Timeout(Duration),
}

/// Current conditions at a location, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature: f64,
    pub feels_like: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_direction_degrees: f64,
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    pub condition: String,
}

/// One day of the provider's daily outlook. `precipitation_probability`
/// is a fraction in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyOutlook {
    pub date: NaiveDate,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub precipitation_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedPlace {
    pub name: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Third-party weather source, queried by coordinates.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch_current(&self, location: &Location) -> Result<CurrentConditions, ProviderError>;

    /// Daily outlook starting with the current day in the location's
    /// local calendar.
    async fn fetch_daily(&self, lat: f64, lng: f64) -> Result<Vec<DailyOutlook>, ProviderError>;

    async fn geocode(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<GeocodedPlace>, ProviderError>;
}

/// Bounds a provider call; running out of time is a provider failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ProviderError::Timeout(limit))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(result, Ok(7));

        let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            Err(ProviderError::RateLimited)
        })
        .await;
        assert_eq!(result, Err(ProviderError::RateLimited));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let limit = Duration::from_millis(50);
        let result = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProviderError>(())
        })
        .await;

        assert_eq!(result, Err(ProviderError::Timeout(limit)));
    }
}
