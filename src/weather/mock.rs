use super::{CurrentConditions, DailyOutlook, GeocodedPlace, ProviderError, WeatherProvider};
use crate::database::Location;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic in-process provider that counts its calls.
///
/// Each `fetch_current` reports a temperature of `10 + n`, where `n` is the
/// number of earlier calls, so refreshes are distinguishable.
pub struct MockWeatherProvider {
    current_calls: AtomicUsize,
    daily_calls: AtomicUsize,
    geocode_calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
    daily: Mutex<Vec<DailyOutlook>>,
    places: Vec<GeocodedPlace>,
}

impl Default for MockWeatherProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWeatherProvider {
    pub fn new() -> Self {
        Self {
            current_calls: AtomicUsize::new(0),
            daily_calls: AtomicUsize::new(0),
            geocode_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
            daily: Mutex::new(generate_mock_daily(8)),
            places: Vec::new(),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_daily(self, daily: Vec<DailyOutlook>) -> Self {
        if let Ok(mut current) = self.daily.lock() {
            *current = daily;
        }
        self
    }

    pub fn with_places(mut self, places: Vec<GeocodedPlace>) -> Self {
        self.places = places;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::SeqCst)
    }

    pub fn daily_calls(&self) -> usize {
        self.daily_calls.load(Ordering::SeqCst)
    }

    pub fn geocode_calls(&self) -> usize {
        self.geocode_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Result<(), ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Api("HTTP 503 Service Unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for MockWeatherProvider {
    async fn fetch_current(&self, _location: &Location) -> Result<CurrentConditions, ProviderError> {
        let n = self.current_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;

        let now = Utc::now();
        let temperature = 10.0 + n as f64;

        Ok(CurrentConditions {
            temperature,
            feels_like: temperature - 1.5,
            pressure: 1013.0,
            humidity: 65.0,
            wind_speed: 2.0 + 3.0 * fastrand::f64(),
            wind_direction_degrees: f64::from(fastrand::u16(0..360)),
            sunrise: now - ChronoDuration::hours(3),
            sunset: now + ChronoDuration::hours(7),
            condition: "Clear".to_string(),
        })
    }

    async fn fetch_daily(&self, _lat: f64, _lng: f64) -> Result<Vec<DailyOutlook>, ProviderError> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;

        self.daily
            .lock()
            .map(|daily| daily.clone())
            .map_err(|_| ProviderError::Api("mock daily outlook poisoned".to_string()))
    }

    async fn geocode(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<GeocodedPlace>, ProviderError> {
        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;

        let name = name.to_lowercase();
        let country = country.map(str::to_lowercase);
        Ok(self
            .places
            .iter()
            .filter(|p| p.name.to_lowercase() == name)
            .filter(|p| country.as_ref().map_or(true, |c| &p.country.to_lowercase() == c))
            .cloned()
            .collect())
    }
}

/// Daily outlook starting today, alternating dry and wet days.
pub fn generate_mock_daily(days: usize) -> Vec<DailyOutlook> {
    let today = Utc::now().date_naive();

    (0..days)
        .map(|day| {
            let base_temp = 8.0 + 4.0 * (day as f64 * 0.9).sin();
            DailyOutlook {
                date: today + ChronoDuration::days(day as i64),
                min_temperature: base_temp - 5.0,
                max_temperature: base_temp + 3.0,
                precipitation_probability: if day % 2 == 0 { 0.2 } else { 0.7 },
            }
        })
        .collect()
}
