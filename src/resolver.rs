//! Turns a user query into one canonical location, a list of candidates to
//! choose from, or nothing.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::database::{DatabaseError, Location, LocationStore, NewLocation};
use crate::utils::{
    haversine_distance, parse_coordinate, round_to_decimals, validate_coordinates, ValidationError,
};
use crate::weather::{with_timeout, ProviderError, WeatherProvider};

/// Coordinate matches at least this far away carry a confirmation message.
pub const NEARBY_THRESHOLD_KM: f64 = 10.0;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Location store failed: {0}")]
    Store(#[from] DatabaseError),
    #[error("Location discovery failed: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    Text { name: String, country: Option<String> },
    Coordinates { lat: f64, lng: f64 },
}

impl LocationQuery {
    /// Builds a query from raw request parameters: either `q` alone or
    /// both `lat` and `lng`.
    pub fn parse(
        q: Option<&str>,
        lat: Option<&str>,
        lng: Option<&str>,
    ) -> Result<Self, ValidationError> {
        match (q, lat, lng) {
            (Some(text), None, None) => Self::parse_text(text),
            (None, Some(lat), Some(lng)) => Self::parse_coordinates(lat, lng),
            (None, None, None) => Err(ValidationError::new(
                "Provide a place name as 'q' or coordinates as 'lat' and 'lng'",
            )),
            (Some(_), _, _) => Err(ValidationError::new(
                "Provide either a place name or coordinates, not both",
            )),
            _ => Err(ValidationError::new(
                "Both 'lat' and 'lng' are required for a coordinate lookup",
            )),
        }
    }

    /// `name[, country]`, where both parts are letter runs joined by single
    /// hyphens or spaces.
    pub fn parse_text(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        let (name, country) = match raw.split_once(',') {
            Some((name, country)) => (name.trim_end(), Some(country.trim_start())),
            None => (raw, None),
        };

        if !is_place_name(name) || !country.map_or(true, is_place_name) {
            return Err(ValidationError(format!(
                "'{}' is not a place name. Use letters separated by single hyphens or spaces, \
                 optionally followed by a comma and a country: <city>, <country>",
                raw
            )));
        }

        Ok(LocationQuery::Text {
            name: name.to_string(),
            country: country.map(str::to_string),
        })
    }

    pub fn parse_coordinates(lat: &str, lng: &str) -> Result<Self, ValidationError> {
        let lat = parse_coordinate(lat, "latitude")?;
        let lng = parse_coordinate(lng, "longitude")?;
        validate_coordinates(lat, lng)?;
        Ok(LocationQuery::Coordinates { lat, lng })
    }
}

fn is_place_name(s: &str) -> bool {
    let mut after_separator = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            after_separator = false;
        } else if (c == '-' || c == ' ') && !after_separator {
            after_separator = true;
        } else {
            return false;
        }
    }
    !after_separator
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLocation {
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<Location> for ResolvedLocation {
    fn from(location: Location) -> Self {
        Self {
            location,
            distance_km: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedLocation),
    /// Candidates share the queried name, in persistence order.
    Ambiguous { name: String, candidates: Vec<Location> },
    NotFound { message: String },
}

impl Resolution {
    /// Applies a 1-based choice to an ambiguous result. Without a choice the
    /// result is returned unchanged; an out-of-range choice is rejected.
    pub fn select(self, choice: Option<usize>) -> Result<Resolution, ValidationError> {
        match (self, choice) {
            (Resolution::Ambiguous { candidates, .. }, Some(choice)) => {
                let count = candidates.len();
                choice
                    .checked_sub(1)
                    .and_then(|index| candidates.into_iter().nth(index))
                    .map(|location| Resolution::Resolved(location.into()))
                    .ok_or_else(|| {
                        ValidationError(format!(
                            "Choice {} is out of range, pick a number from 1 to {}",
                            choice, count
                        ))
                    })
            }
            (resolution, _) => Ok(resolution),
        }
    }
}

/// Result of a discovery attempt; `created` is set when the location was
/// new to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub resolution: Resolution,
    pub created: bool,
}

pub struct LocationResolver {
    store: Arc<dyn LocationStore>,
    provider: Arc<dyn WeatherProvider>,
    provider_timeout: Duration,
}

impl LocationResolver {
    pub fn new(
        store: Arc<dyn LocationStore>,
        provider: Arc<dyn WeatherProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            provider_timeout,
        }
    }

    pub async fn resolve(&self, query: &LocationQuery) -> Result<Resolution, ResolveError> {
        match query {
            LocationQuery::Text { name, country } => {
                self.resolve_text(name, country.as_deref()).await
            }
            LocationQuery::Coordinates { lat, lng } => self.resolve_coordinates(*lat, *lng).await,
        }
    }

    async fn resolve_text(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let (resolution, _) = self.lookup_text(name, country).await?;
        Ok(resolution)
    }

    /// Text lookup that also reports whether the result matched the query
    /// exactly, country included.
    ///
    /// A country that matches nothing never resolves to another country on
    /// its own: same-name locations elsewhere come back as candidates for
    /// the caller to confirm, even when there is only one.
    async fn lookup_text(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<(Resolution, bool), ResolveError> {
        let mut found = self.store.find_by_name(name, country).await?;
        let mut exact = !found.is_empty();

        if found.is_empty() && country.is_some() {
            found = self.store.find_by_name(name, None).await?;
            exact = false;
        }

        tracing::debug!(
            "Resolved '{}' ({:?}) to {} candidates, exact: {}",
            name,
            country,
            found.len(),
            exact
        );

        let resolution = match found.len() {
            0 => Resolution::NotFound {
                message: match country {
                    Some(country) => format!("Location '{}, {}' was not found", name, country),
                    None => format!("Location '{}' was not found", name),
                },
            },
            1 if exact => Resolution::Resolved(found.remove(0).into()),
            _ => Resolution::Ambiguous {
                name: name.to_string(),
                candidates: found,
            },
        };

        Ok((resolution, exact))
    }

    async fn resolve_coordinates(&self, lat: f64, lng: f64) -> Result<Resolution, ResolveError> {
        let locations = self.store.list_locations().await?;

        let nearest = locations
            .into_iter()
            .map(|l| {
                let distance = haversine_distance(lat, lng, l.latitude, l.longitude);
                (l, distance)
            })
            .min_by(|(_, a), (_, b)| a.total_cmp(b));

        let Some((location, distance)) = nearest else {
            return Ok(Resolution::NotFound {
                message: format!("No known location near ({}, {})", lat, lng),
            });
        };

        let message = (distance >= NEARBY_THRESHOLD_KM).then(|| {
            format!(
                "Nearest location {}, {} is {:.1} km from the given coordinates",
                location.name, location.country, distance
            )
        });

        Ok(Resolution::Resolved(ResolvedLocation {
            location,
            distance_km: Some(round_to_decimals(distance, 3)),
            message,
        }))
    }

    /// Resolves a place name, asking the provider to geocode it when the
    /// store has no exact match for the name and country. A geocoded place
    /// is stored before it is returned.
    pub async fn discover(&self, query: &LocationQuery) -> Result<Discovery, ResolveError> {
        let LocationQuery::Text { name, country } = query else {
            return Err(ValidationError::new("Discovery needs a place name, not coordinates").into());
        };

        let (resolution, exact) = self.lookup_text(name, country.as_deref()).await?;
        if exact {
            return Ok(Discovery {
                resolution,
                created: false,
            });
        }

        let places = with_timeout(
            self.provider_timeout,
            self.provider.geocode(name, country.as_deref()),
        )
        .await?;

        let Some(place) = places.into_iter().next() else {
            return Ok(Discovery {
                resolution,
                created: false,
            });
        };

        validate_coordinates(place.latitude, place.longitude)?;
        let (location, created) = self
            .store
            .insert_location(NewLocation {
                name: place.name,
                country: place.country,
                latitude: place.latitude,
                longitude: place.longitude,
            })
            .await?;

        if created {
            tracing::info!(
                "Discovered location {}, {} (id {}) for '{}'",
                location.name,
                location.country,
                location.id,
                name
            );
        }

        Ok(Discovery {
            resolution: Resolution::Resolved(location.into()),
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use crate::weather::mock::MockWeatherProvider;
    use crate::weather::GeocodedPlace;

    fn place(name: &str, country: &str, latitude: f64, longitude: f64) -> NewLocation {
        NewLocation {
            name: name.to_string(),
            country: country.to_string(),
            latitude,
            longitude,
        }
    }

    async fn seeded_store() -> Arc<MockDatabase> {
        let store = Arc::new(MockDatabase::new());
        for location in [
            place("Brest", "Belarus", 52.0976, 23.7341),
            place("Brest", "France", 48.3904, -4.4861),
            place("Minsk", "Belarus", 53.9006, 27.5590),
            place("Rostov-on-Don", "Russia", 47.2357, 39.7015),
        ] {
            store.insert_location(location).await.unwrap();
        }
        store
    }

    fn resolver_with(store: Arc<MockDatabase>, provider: Arc<MockWeatherProvider>) -> LocationResolver {
        LocationResolver::new(store, provider, Duration::from_secs(1))
    }

    async fn resolver() -> LocationResolver {
        resolver_with(seeded_store().await, Arc::new(MockWeatherProvider::new()))
    }

    fn text(name: &str, country: Option<&str>) -> LocationQuery {
        LocationQuery::Text {
            name: name.to_string(),
            country: country.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_text_queries() {
        assert_eq!(LocationQuery::parse_text("Minsk"), Ok(text("Minsk", None)));
        assert_eq!(
            LocationQuery::parse_text("  Brest ,  France "),
            Ok(text("Brest", Some("France")))
        );
        assert_eq!(
            LocationQuery::parse_text("Rostov-on-Don, Russia"),
            Ok(text("Rostov-on-Don", Some("Russia")))
        );
        assert_eq!(
            LocationQuery::parse_text("New York, United States"),
            Ok(text("New York", Some("United States")))
        );
        assert_eq!(LocationQuery::parse_text("Zürich"), Ok(text("Zürich", None)));
    }

    #[test]
    fn test_parse_text_rejects_malformed_names() {
        for raw in [
            "",
            "   ",
            "Brest2",
            "-Brest",
            "Brest-",
            "New  York",
            "Rostov--on-Don",
            "Brest,",
            ", France",
            "Brest, France, Europe",
            "Brest; France",
        ] {
            assert!(LocationQuery::parse_text(raw).is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_parse_coordinates() {
        assert_eq!(
            LocationQuery::parse_coordinates("52.1", "-23.7"),
            Ok(LocationQuery::Coordinates { lat: 52.1, lng: -23.7 })
        );
        assert!(LocationQuery::parse_coordinates("95", "10").is_err());
        assert!(LocationQuery::parse_coordinates("45", "180.5").is_err());
        assert!(LocationQuery::parse_coordinates("north", "10").is_err());
    }

    #[test]
    fn test_parse_requires_exactly_one_query_form() {
        assert!(LocationQuery::parse(None, None, None).is_err());
        assert!(LocationQuery::parse(Some("Brest"), Some("1"), Some("2")).is_err());
        assert!(LocationQuery::parse(None, Some("1"), None).is_err());
        assert!(LocationQuery::parse(Some("Brest"), None, None).is_ok());
        assert!(LocationQuery::parse(None, Some("1"), Some("2")).is_ok());
    }

    #[tokio::test]
    async fn test_name_shared_by_two_countries_is_ambiguous() {
        let resolution = resolver().await.resolve(&text("Brest", None)).await.unwrap();

        match resolution {
            Resolution::Ambiguous { name, candidates } => {
                assert_eq!(name, "Brest");
                let countries: Vec<_> = candidates.iter().map(|c| c.country.as_str()).collect();
                assert_eq!(countries, vec!["Belarus", "France"]);
            }
            other => panic!("expected ambiguous result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_city_with_country_resolves_directly() {
        let resolution = resolver()
            .await
            .resolve(&text("brest", Some("FRANCE")))
            .await
            .unwrap();

        match resolution {
            Resolution::Resolved(resolved) => {
                assert_eq!(resolved.location.country, "France");
                assert_eq!(resolved.distance_km, None);
                assert_eq!(resolved.message, None);
            }
            other => panic!("expected resolved location, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_country_needs_confirmation() {
        let resolver = resolver().await;

        let resolution = resolver
            .resolve(&text("Minsk", Some("Belarusia")))
            .await
            .unwrap();
        match &resolution {
            Resolution::Ambiguous { candidates, .. } => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].country, "Belarus");
            }
            other => panic!("expected candidates to confirm, got {:?}", other),
        }

        let confirmed = resolution.select(Some(1)).unwrap();
        assert!(matches!(
            confirmed,
            Resolution::Resolved(ResolvedLocation { ref location, .. }) if location.name == "Minsk"
        ));

        let resolution = resolver
            .resolve(&text("Brest", Some("Germany")))
            .await
            .unwrap();
        assert!(matches!(
            resolution,
            Resolution::Ambiguous { ref candidates, .. } if candidates.len() == 2
        ));

        let resolution = resolver
            .resolve(&text("Atlantis", Some("Greece")))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_other_country_is_never_resolved_silently() {
        let store = Arc::new(MockDatabase::new());
        store
            .insert_location(place("Brest", "Belarus", 52.0976, 23.7341))
            .await
            .unwrap();
        let resolver = resolver_with(store, Arc::new(MockWeatherProvider::new()));

        let resolution = resolver
            .resolve(&text("Brest", Some("France")))
            .await
            .unwrap();

        assert!(!matches!(resolution, Resolution::Resolved(_)));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let resolution = resolver().await.resolve(&text("Atlantis", None)).await.unwrap();

        match resolution {
            Resolution::NotFound { message } => assert!(message.contains("Atlantis")),
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_coordinates_resolve_to_nearest_location() {
        let resolver = resolver().await;

        let close = resolver
            .resolve(&LocationQuery::Coordinates { lat: 52.10, lng: 23.70 })
            .await
            .unwrap();
        match close {
            Resolution::Resolved(resolved) => {
                assert_eq!(resolved.location.country, "Belarus");
                assert_eq!(resolved.location.name, "Brest");
                assert!(resolved.distance_km.unwrap() < NEARBY_THRESHOLD_KM);
                assert_eq!(resolved.message, None);
            }
            other => panic!("expected resolved location, got {:?}", other),
        }

        let far = resolver
            .resolve(&LocationQuery::Coordinates { lat: 50.0, lng: 0.0 })
            .await
            .unwrap();
        match far {
            Resolution::Resolved(resolved) => {
                assert_eq!(resolved.location.country, "France");
                assert!(resolved.distance_km.unwrap() > NEARBY_THRESHOLD_KM);
                assert!(resolved.message.unwrap().contains("Brest, France"));
            }
            other => panic!("expected resolved location, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_coordinates_against_empty_store_are_not_found() {
        let resolver = resolver_with(Arc::new(MockDatabase::new()), Arc::new(MockWeatherProvider::new()));
        let resolution = resolver
            .resolve(&LocationQuery::Coordinates { lat: 1.0, lng: 1.0 })
            .await
            .unwrap();

        assert!(matches!(resolution, Resolution::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_select_candidate_by_one_based_index() {
        let resolution = resolver().await.resolve(&text("Brest", None)).await.unwrap();

        let picked = resolution.clone().select(Some(2)).unwrap();
        assert!(matches!(
            picked,
            Resolution::Resolved(ResolvedLocation { ref location, .. }) if location.country == "France"
        ));

        assert!(resolution.clone().select(Some(0)).is_err());
        assert!(resolution.clone().select(Some(3)).is_err());
        assert_eq!(resolution.clone().select(None), Ok(resolution));
    }

    #[tokio::test]
    async fn test_discover_stores_geocoded_place_once() {
        let store = seeded_store().await;
        let provider = Arc::new(MockWeatherProvider::new().with_places(vec![GeocodedPlace {
            name: "Grodno".to_string(),
            country: "BY".to_string(),
            latitude: 53.6884,
            longitude: 23.8258,
        }]));
        let resolver = resolver_with(store.clone(), provider.clone());

        let first = resolver.discover(&text("Grodno", None)).await.unwrap();
        assert!(first.created);
        assert!(matches!(first.resolution, Resolution::Resolved(_)));

        let second = resolver.discover(&text("grodno", None)).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.resolution, second.resolution);

        // The second call is answered from the store.
        assert_eq!(provider.geocode_calls(), 1);
        assert_eq!(store.list_locations().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_discover_known_location_skips_provider() {
        let provider = Arc::new(MockWeatherProvider::new());
        let resolver = resolver_with(seeded_store().await, provider.clone());

        let discovery = resolver.discover(&text("Minsk", None)).await.unwrap();

        assert!(!discovery.created);
        assert_eq!(provider.geocode_calls(), 0);
    }

    #[tokio::test]
    async fn test_discover_adds_same_name_in_new_country() {
        let store = Arc::new(MockDatabase::new());
        store
            .insert_location(place("Brest", "Belarus", 52.0976, 23.7341))
            .await
            .unwrap();
        let provider = Arc::new(MockWeatherProvider::new().with_places(vec![GeocodedPlace {
            name: "Brest".to_string(),
            country: "France".to_string(),
            latitude: 48.3904,
            longitude: -4.4861,
        }]));
        let resolver = resolver_with(store.clone(), provider.clone());

        let discovery = resolver.discover(&text("Brest", Some("France"))).await.unwrap();

        assert!(discovery.created);
        assert!(matches!(
            discovery.resolution,
            Resolution::Resolved(ResolvedLocation { ref location, .. }) if location.country == "France"
        ));
        assert_eq!(provider.geocode_calls(), 1);
        assert_eq!(store.find_by_name("Brest", None).await.unwrap().len(), 2);

        // Now an exact match, so the provider is left alone.
        let again = resolver.discover(&text("brest", Some("france"))).await.unwrap();
        assert!(!again.created);
        assert_eq!(provider.geocode_calls(), 1);
    }

    #[tokio::test]
    async fn test_discover_unknown_to_provider_is_not_found() {
        let resolver = resolver().await;
        let discovery = resolver.discover(&text("Atlantis", None)).await.unwrap();

        assert!(!discovery.created);
        assert!(matches!(discovery.resolution, Resolution::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_discover_rejects_coordinates() {
        let err = resolver()
            .await
            .discover(&LocationQuery::Coordinates { lat: 1.0, lng: 1.0 })
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::Validation(_)));
    }
}
