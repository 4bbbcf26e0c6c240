use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::database::{DatabaseError, LocationId, LocationStore, WeatherSnapshot};
use crate::weather::{with_timeout, CurrentConditions, ProviderError, WeatherProvider};

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Location {0} does not exist")]
    UnknownLocation(LocationId),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Weather store failed: {0}")]
    Store(Arc<DatabaseError>),
}

impl From<DatabaseError> for CacheError {
    fn from(err: DatabaseError) -> Self {
        CacheError::Store(Arc::new(err))
    }
}

/// A snapshot as served to clients. `stale` is set when a refresh failed
/// and an older snapshot was returned instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedWeather {
    #[serde(flatten)]
    pub snapshot: WeatherSnapshot,
    pub stale: bool,
}

/// Read-through cache over the stored weather snapshots.
///
/// A snapshot younger than the TTL is served as is. An older or missing one
/// is refreshed from the provider, with at most one refresh in flight per
/// location: concurrent callers wait for that flight and share its outcome.
pub struct WeatherCache {
    store: Arc<dyn LocationStore>,
    provider: Arc<dyn WeatherProvider>,
    ttl: chrono::Duration,
    provider_timeout: Duration,
    flights: Cache<LocationId, WeatherSnapshot>,
}

impl WeatherCache {
    pub fn new(
        store: Arc<dyn LocationStore>,
        provider: Arc<dyn WeatherProvider>,
        ttl: chrono::Duration,
        provider_timeout: Duration,
        max_flights: u64,
    ) -> Self {
        let flights = Cache::builder()
            .max_capacity(max_flights)
            .time_to_live(provider_timeout)
            .build();

        Self {
            store,
            provider,
            ttl,
            provider_timeout,
            flights,
        }
    }

    pub fn is_fresh(&self, snapshot: &WeatherSnapshot, now: DateTime<Utc>) -> bool {
        now - snapshot.observed_at < self.ttl
    }

    pub async fn get_or_refresh(&self, location_id: LocationId) -> Result<CachedWeather, CacheError> {
        let prior = self.store.get_snapshot(location_id).await?;

        if let Some(snapshot) = &prior {
            if self.is_fresh(snapshot, Utc::now()) {
                tracing::debug!("Weather cache hit for location {}", location_id);
                return Ok(CachedWeather {
                    snapshot: snapshot.clone(),
                    stale: false,
                });
            }
        }

        let refreshed = self
            .flights
            .try_get_with(location_id, self.refresh(location_id))
            .await;
        // The entry only exists to coalesce this flight.
        self.flights.invalidate(&location_id).await;

        match refreshed {
            Ok(snapshot) => Ok(CachedWeather {
                snapshot,
                stale: false,
            }),
            Err(err) => match (prior, err.as_ref()) {
                (_, CacheError::UnknownLocation(_)) | (None, _) => Err(err.as_ref().clone()),
                (Some(snapshot), _) => {
                    tracing::warn!(
                        "Serving stale weather for location {} observed at {}: {}",
                        location_id,
                        snapshot.observed_at,
                        err
                    );
                    Ok(CachedWeather {
                        snapshot,
                        stale: true,
                    })
                }
            },
        }
    }

    async fn refresh(&self, location_id: LocationId) -> Result<WeatherSnapshot, CacheError> {
        // An earlier flight may have finished since the caller looked.
        if let Some(snapshot) = self.store.get_snapshot(location_id).await? {
            if self.is_fresh(&snapshot, Utc::now()) {
                return Ok(snapshot);
            }
        }

        let location = self
            .store
            .get_location(location_id)
            .await?
            .ok_or(CacheError::UnknownLocation(location_id))?;

        let conditions = with_timeout(self.provider_timeout, self.provider.fetch_current(&location)).await?;
        let snapshot = snapshot_from_conditions(location_id, Utc::now(), conditions);

        self.store.upsert_snapshot(&snapshot).await?;

        tracing::info!(
            "Refreshed weather for {}, {} ({}): {:.1}°C {}",
            location.name,
            location.country,
            location_id,
            snapshot.temperature,
            snapshot.condition
        );

        Ok(snapshot)
    }
}

fn snapshot_from_conditions(
    location_id: LocationId,
    observed_at: DateTime<Utc>,
    conditions: CurrentConditions,
) -> WeatherSnapshot {
    WeatherSnapshot {
        location_id,
        observed_at,
        temperature: conditions.temperature,
        feels_like: conditions.feels_like,
        pressure: conditions.pressure,
        humidity: conditions.humidity,
        wind_speed: conditions.wind_speed,
        wind_direction_degrees: conditions.wind_direction_degrees,
        sunrise: conditions.sunrise,
        sunset: conditions.sunset,
        condition: conditions.condition,
    }
}
