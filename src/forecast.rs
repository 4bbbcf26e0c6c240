use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::utils::{round_to_decimals, validate_coordinates, ValidationError};
use crate::weather::{with_timeout, DailyOutlook, ProviderError, WeatherProvider};

pub const FORECAST_DAYS: usize = 7;

/// Above this precipitation chance a day is no longer sunny.
const SUNNY_MAX_PRECIPITATION_PERCENT: f64 = 50.0;
/// Open interval of temperatures in which precipitation falls as sleet.
const SLEET_RANGE: (f64, f64) = (-1.0, 3.0);

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Weather provider returned {0} days after today, a full week is needed")]
    Incomplete(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastCategory {
    Sunny,
    Sleet,
    Snow,
    Rain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub calendar_date: NaiveDate,
    pub min_temperature: f64,
    pub max_temperature: f64,
    /// Chance of precipitation, 0 to 100.
    pub precipitation_percent: f64,
    pub category: ForecastCategory,
}

impl ForecastDay {
    pub fn from_outlook(outlook: &DailyOutlook) -> Self {
        let precipitation_percent = round_to_decimals(outlook.precipitation_probability * 100.0, 1);
        Self {
            calendar_date: outlook.date,
            min_temperature: outlook.min_temperature,
            max_temperature: outlook.max_temperature,
            precipitation_percent,
            category: categorize(
                precipitation_percent,
                outlook.min_temperature,
                outlook.max_temperature,
            ),
        }
    }
}

/// Classifies one day. Dry enough days are sunny; otherwise the
/// temperatures decide between sleet, snow and rain.
pub fn categorize(precipitation_percent: f64, min: f64, max: f64) -> ForecastCategory {
    let in_sleet_range = |t: f64| t > SLEET_RANGE.0 && t < SLEET_RANGE.1;

    if precipitation_percent <= SUNNY_MAX_PRECIPITATION_PERCENT {
        ForecastCategory::Sunny
    } else if in_sleet_range(max) || in_sleet_range(min) {
        ForecastCategory::Sleet
    } else if max <= SLEET_RANGE.0 && min <= SLEET_RANGE.0 {
        ForecastCategory::Snow
    } else {
        ForecastCategory::Rain
    }
}

/// Seven-day outlook for arbitrary coordinates, fetched live on every call.
pub struct ForecastService {
    provider: Arc<dyn WeatherProvider>,
    provider_timeout: Duration,
}

impl ForecastService {
    pub fn new(provider: Arc<dyn WeatherProvider>, provider_timeout: Duration) -> Self {
        Self {
            provider,
            provider_timeout,
        }
    }

    pub async fn weekly_forecast(
        &self,
        lat: f64,
        lng: f64,
    ) -> Result<[ForecastDay; FORECAST_DAYS], ForecastError> {
        validate_coordinates(lat, lng)?;

        let daily = with_timeout(self.provider_timeout, self.provider.fetch_daily(lat, lng)).await?;

        // The provider starts with the current day; the week begins tomorrow.
        let days: Vec<ForecastDay> = daily
            .iter()
            .skip(1)
            .take(FORECAST_DAYS)
            .map(ForecastDay::from_outlook)
            .collect();

        let available = days.len();
        let week: [ForecastDay; FORECAST_DAYS] = days
            .try_into()
            .map_err(|_| ForecastError::Incomplete(available))?;

        tracing::debug!(
            "Built forecast for ({}, {}) from {} to {}",
            lat,
            lng,
            week[0].calendar_date,
            week[FORECAST_DAYS - 1].calendar_date
        );

        Ok(week)
    }
}
