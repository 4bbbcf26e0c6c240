use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    bans::{BanError, BanList},
    cache::{CacheError, CachedWeather, WeatherCache},
    config::Config,
    database::{BanRecord, DatabaseError, Location, LocationId, LocationStore},
    forecast::{ForecastDay, ForecastError, ForecastService, FORECAST_DAYS},
    resolver::{LocationQuery, LocationResolver, Resolution, ResolveError},
    utils::{parse_coordinate, ErrorResponse, ValidationError},
    weather::{ProviderError, WeatherProvider},
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LocationStore>,
    pub resolver: Arc<LocationResolver>,
    pub cache: Arc<WeatherCache>,
    pub forecast: Arc<ForecastService>,
    pub bans: Arc<BanList>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn LocationStore>,
        provider: Arc<dyn WeatherProvider>,
    ) -> Self {
        let timeout = config.provider_timeout();

        Self {
            resolver: Arc::new(LocationResolver::new(store.clone(), provider.clone(), timeout)),
            cache: Arc::new(WeatherCache::new(
                store.clone(),
                provider.clone(),
                config.weather_ttl(),
                timeout,
                config.single_flight_capacity,
            )),
            forecast: Arc::new(ForecastService::new(provider, timeout)),
            bans: Arc::new(BanList::new(store.clone())),
            store,
        }
    }
}

/// Failure of a request, rendered as an `ErrorResponse` body.
#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    NotFound(String),
    Provider(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, code) = match self {
            ApiError::Validation(err) => (err.0, "VALIDATION_ERROR"),
            ApiError::NotFound(message) => (message, "NOT_FOUND"),
            ApiError::Provider(message) => (message, "PROVIDER_ERROR"),
            ApiError::Internal(message) => (message, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!("Request failed with {}: {}", status, message);
        }

        (status, Json(ErrorResponse::new(status.as_u16(), &message, code))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Validation(err) => err.into(),
            ResolveError::Store(err) => err.into(),
            ResolveError::Provider(err) => err.into(),
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::UnknownLocation(_) => ApiError::NotFound(err.to_string()),
            CacheError::Provider(err) => err.into(),
            CacheError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::Validation(err) => err.into(),
            ForecastError::Provider(err) => err.into(),
            ForecastError::Incomplete(_) => ApiError::Provider(err.to_string()),
        }
    }
}

impl From<BanError> for ApiError {
    fn from(err: BanError) -> Self {
        match err {
            BanError::Validation(err) => err.into(),
            BanError::NotFound(_) => ApiError::NotFound(err.to_string()),
            BanError::Store(err) => err.into(),
        }
    }
}

// Request/Response types
#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    pub q: Option<String>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub choice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    pub lat: Option<String>,
    pub lng: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBanRequest {
    pub login: String,
    pub expires_on: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Body of a resolution. Which fields are present depends on the outcome:
/// a location, a list of candidates, or just a message.
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Location>>,
}

impl ResolveResponse {
    fn new(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            location: None,
            distance_km: None,
            message: None,
            candidates: None,
        }
    }

    pub fn from_resolution(resolution: Resolution) -> (StatusCode, Self) {
        match resolution {
            Resolution::Resolved(resolved) => {
                let status = StatusCode::OK;
                let response = Self {
                    location: Some(resolved.location),
                    distance_km: resolved.distance_km,
                    message: resolved.message,
                    ..Self::new(status)
                };
                (status, response)
            }
            Resolution::Ambiguous { name, candidates } => {
                let status = StatusCode::ACCEPTED;
                let response = Self {
                    message: Some(format!(
                        "Found {} location(s) named '{}'. Repeat the request with choice=1..{} to confirm one",
                        candidates.len(),
                        name,
                        candidates.len()
                    )),
                    candidates: Some(candidates),
                    ..Self::new(status)
                };
                (status, response)
            }
            Resolution::NotFound { message } => {
                let status = StatusCode::NOT_FOUND;
                let response = Self {
                    message: Some(message),
                    ..Self::new(status)
                };
                (status, response)
            }
        }
    }
}

fn parse_choice(raw: Option<&str>) -> Result<Option<usize>, ValidationError> {
    raw.map(|raw| {
        raw.trim().parse::<usize>().map_err(|_| {
            ValidationError(format!("Invalid choice: '{}'. Use a candidate number", raw))
        })
    })
    .transpose()
}

// Route handlers
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.store.health_check().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

pub async fn resolve_location(
    State(state): State<AppState>,
    Query(params): Query<ResolveQuery>,
) -> Result<(StatusCode, Json<ResolveResponse>), ApiError> {
    let query = LocationQuery::parse(
        params.q.as_deref(),
        params.lat.as_deref(),
        params.lng.as_deref(),
    )?;
    let choice = parse_choice(params.choice.as_deref())?;

    let resolution = state.resolver.resolve(&query).await?.select(choice)?;
    let (status, response) = ResolveResponse::from_resolution(resolution);

    Ok((status, Json(response)))
}

pub async fn discover_location(
    State(state): State<AppState>,
    Query(params): Query<DiscoverQuery>,
) -> Result<(StatusCode, Json<ResolveResponse>), ApiError> {
    let raw = params
        .q
        .ok_or_else(|| ValidationError::new("Provide a place name as 'q'"))?;
    let query = LocationQuery::parse_text(&raw)?;

    let discovery = state.resolver.discover(&query).await?;
    let (status, mut response) = ResolveResponse::from_resolution(discovery.resolution);

    if discovery.created {
        response.status = StatusCode::CREATED.as_u16();
        return Ok((StatusCode::CREATED, Json(response)));
    }

    Ok((status, Json(response)))
}

pub async fn list_locations(State(state): State<AppState>) -> Result<Json<Vec<Location>>, ApiError> {
    Ok(Json(state.store.list_locations().await?))
}

pub async fn get_location(
    State(state): State<AppState>,
    Path(location_id): Path<LocationId>,
) -> Result<Json<Location>, ApiError> {
    match state.store.get_location(location_id).await? {
        Some(location) => Ok(Json(location)),
        None => Err(ApiError::NotFound(format!(
            "Location {} does not exist",
            location_id
        ))),
    }
}

pub async fn get_weather(
    State(state): State<AppState>,
    Path(location_id): Path<LocationId>,
) -> Result<Json<CachedWeather>, ApiError> {
    Ok(Json(state.cache.get_or_refresh(location_id).await?))
}

pub async fn get_forecast(
    State(state): State<AppState>,
    Query(params): Query<ForecastQuery>,
) -> Result<Json<[ForecastDay; FORECAST_DAYS]>, ApiError> {
    let (Some(lat), Some(lng)) = (params.lat.as_deref(), params.lng.as_deref()) else {
        return Err(ValidationError::new("Both 'lat' and 'lng' are required").into());
    };
    let lat = parse_coordinate(lat, "latitude")?;
    let lng = parse_coordinate(lng, "longitude")?;

    Ok(Json(state.forecast.weekly_forecast(lat, lng).await?))
}

pub async fn list_bans(State(state): State<AppState>) -> Result<Json<Vec<BanRecord>>, ApiError> {
    let today = Utc::now().date_naive();
    Ok(Json(state.bans.list_live(today).await?))
}

pub async fn create_ban(
    State(state): State<AppState>,
    Json(request): Json<CreateBanRequest>,
) -> Result<(StatusCode, Json<BanRecord>), ApiError> {
    let today = Utc::now().date_naive();
    let record = state.bans.ban(&request.login, request.expires_on, today).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn lift_ban(
    State(state): State<AppState>,
    Path(ban_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.bans.lift(ban_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/resolve", get(resolve_location))
        .route("/locations", get(list_locations))
        .route("/locations/discover", post(discover_location))
        .route("/locations/:location_id", get(get_location))
        .route("/weather/:location_id", get(get_weather))
        .route("/forecast", get(get_forecast))
        .route("/bans", get(list_bans).post(create_ban))
        .route("/bans/:ban_id", delete(lift_ban))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MockDatabase, NewLocation};
    use crate::forecast::ForecastCategory;
    use crate::weather::mock::MockWeatherProvider;
    use crate::weather::GeocodedPlace;
    use chrono::Duration as ChronoDuration;

    struct TestApp {
        state: AppState,
        provider: Arc<MockWeatherProvider>,
    }

    async fn test_app(provider: MockWeatherProvider) -> TestApp {
        let store = Arc::new(MockDatabase::new());
        for (name, country, latitude, longitude) in [
            ("Brest", "Belarus", 52.0976, 23.7341),
            ("Brest", "France", 48.3904, -4.4861),
            ("Minsk", "Belarus", 53.9006, 27.5590),
        ] {
            store
                .insert_location(NewLocation {
                    name: name.to_string(),
                    country: country.to_string(),
                    latitude,
                    longitude,
                })
                .await
                .unwrap();
        }

        let provider = Arc::new(provider);
        let state = AppState::new(
            &Config::with_base_url("http://127.0.0.1:9"),
            store,
            provider.clone(),
        );
        TestApp { state, provider }
    }

    fn text_query(q: &str) -> ResolveQuery {
        ResolveQuery {
            q: Some(q.to_string()),
            ..Default::default()
        }
    }

    fn coordinate_query(lat: &str, lng: &str) -> ResolveQuery {
        ResolveQuery {
            lat: Some(lat.to_string()),
            lng: Some(lng.to_string()),
            ..Default::default()
        }
    }

    fn error_status<T>(result: Result<T, ApiError>) -> StatusCode {
        match result {
            Ok(_) => panic!("expected an error response"),
            Err(err) => err.into_response().status(),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(MockWeatherProvider::new()).await;
        let Json(health) = health(State(app.state)).await.unwrap();
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_then_select() {
        let app = test_app(MockWeatherProvider::new()).await;

        let (status, Json(body)) = resolve_location(State(app.state.clone()), Query(text_query("Brest")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.status, 202);
        assert_eq!(body.candidates.as_ref().map(Vec::len), Some(2));
        assert!(body.location.is_none());

        let query = ResolveQuery {
            choice: Some("2".to_string()),
            ..text_query("Brest")
        };
        let (status, Json(body)) = resolve_location(State(app.state), Query(query)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.location.unwrap().country, "France");
    }

    #[tokio::test]
    async fn test_resolve_other_country_asks_for_confirmation() {
        let app = test_app(MockWeatherProvider::new()).await;

        let (status, Json(body)) =
            resolve_location(State(app.state.clone()), Query(text_query("Minsk, Belarusia")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.location.is_none());
        assert_eq!(body.candidates.unwrap()[0].country, "Belarus");

        let query = ResolveQuery {
            choice: Some("1".to_string()),
            ..text_query("Minsk, Belarusia")
        };
        let (status, Json(body)) = resolve_location(State(app.state), Query(query)).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.location.unwrap().name, "Minsk");
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_input() {
        let app = test_app(MockWeatherProvider::new()).await;

        for query in [
            coordinate_query("95", "10"),
            text_query("Brest2"),
            ResolveQuery::default(),
            ResolveQuery {
                choice: Some("7".to_string()),
                ..text_query("Brest")
            },
            ResolveQuery {
                choice: Some("first".to_string()),
                ..text_query("Brest")
            },
        ] {
            let result = resolve_location(State(app.state.clone()), Query(query)).await;
            assert_eq!(error_status(result), StatusCode::BAD_REQUEST);
        }

        assert_eq!(app.provider.current_calls(), 0);
        assert_eq!(app.provider.geocode_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_not_found_and_coordinates() {
        let app = test_app(MockWeatherProvider::new()).await;

        let (status, Json(body)) =
            resolve_location(State(app.state.clone()), Query(text_query("Atlantis")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.status, 404);
        assert!(body.message.is_some());

        let (status, Json(body)) =
            resolve_location(State(app.state), Query(coordinate_query("53.9", "27.56")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.location.unwrap().name, "Minsk");
        assert!(body.distance_km.is_some());
        assert!(body.message.is_none());
    }

    #[tokio::test]
    async fn test_discover_creates_then_finds() {
        let provider = MockWeatherProvider::new().with_places(vec![GeocodedPlace {
            name: "Vilnius".to_string(),
            country: "LT".to_string(),
            latitude: 54.6872,
            longitude: 25.2797,
        }]);
        let app = test_app(provider).await;
        let query = || DiscoverQuery {
            q: Some("Vilnius".to_string()),
        };

        let (status, Json(body)) = discover_location(State(app.state.clone()), Query(query()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.status, 201);
        let created = body.location.unwrap();

        let (status, _) = discover_location(State(app.state.clone()), Query(query()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let Json(location) = get_location(State(app.state), Path(created.id)).await.unwrap();
        assert_eq!(location, created);
    }

    #[tokio::test]
    async fn test_weather_endpoint() {
        let app = test_app(MockWeatherProvider::new()).await;

        let Json(weather) = get_weather(State(app.state.clone()), Path(1)).await.unwrap();
        assert_eq!(weather.snapshot.location_id, 1);
        assert!(!weather.stale);

        assert_eq!(
            error_status(get_weather(State(app.state.clone()), Path(404)).await),
            StatusCode::NOT_FOUND
        );

        app.provider.set_failing(true);
        assert_eq!(
            error_status(get_weather(State(app.state), Path(2)).await),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_forecast_endpoint() {
        let app = test_app(MockWeatherProvider::new()).await;
        let query = |lat: &str, lng: &str| ForecastQuery {
            lat: Some(lat.to_string()),
            lng: Some(lng.to_string()),
        };

        let Json(week) = get_forecast(State(app.state.clone()), Query(query("52.1", "23.7")))
            .await
            .unwrap();
        assert_eq!(week.len(), 7);
        assert!(week.windows(2).all(|pair| pair[1].calendar_date == pair[0].calendar_date + ChronoDuration::days(1)));
        assert!(week.iter().any(|day| day.category == ForecastCategory::Sunny));

        assert_eq!(
            error_status(get_forecast(State(app.state.clone()), Query(query("95", "10"))).await),
            StatusCode::BAD_REQUEST
        );

        app.provider.set_failing(true);
        assert_eq!(
            error_status(get_forecast(State(app.state), Query(query("52.1", "23.7"))).await),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_ban_lifecycle() {
        let app = test_app(MockWeatherProvider::new()).await;
        let tomorrow = Utc::now().date_naive() + ChronoDuration::days(1);

        let (status, Json(record)) = create_ban(
            State(app.state.clone()),
            Json(CreateBanRequest {
                login: "mallory".to_string(),
                expires_on: tomorrow,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(live) = list_bans(State(app.state.clone())).await.unwrap();
        assert_eq!(live, vec![record.clone()]);

        let status = lift_ban(State(app.state.clone()), Path(record.id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            error_status(lift_ban(State(app.state.clone()), Path(record.id)).await),
            StatusCode::NOT_FOUND
        );

        let past = create_ban(
            State(app.state),
            Json(CreateBanRequest {
                login: "mallory".to_string(),
                expires_on: tomorrow - ChronoDuration::days(2),
            }),
        )
        .await;
        assert_eq!(error_status(past), StatusCode::BAD_REQUEST);
    }
}
