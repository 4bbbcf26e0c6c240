use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bans;
mod cache;
mod config;
mod database;
mod forecast;
mod resolver;
mod routes;
mod utils;
mod weather;

use config::Config;
use database::{seed_locations, Database, LocationStore};
use routes::{create_router, AppState};
use weather::{mock::MockWeatherProvider, openweather::OpenWeatherClient, WeatherProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_locator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database
    let pool = sqlx::SqlitePool::connect(&config.database_url).await?;
    let database = Database::new(pool);
    database.init_tables().await?;
    let store: Arc<dyn LocationStore> = Arc::new(database);

    if let Some(path) = &config.seed_locations_path {
        let created = seed_locations(store.as_ref(), path).await?;
        tracing::info!("Seeded {} new locations from {}", created, path);
    }

    // Initialize weather provider
    let provider: Arc<dyn WeatherProvider> = if config.use_mock_provider {
        tracing::warn!("Using generated weather data instead of OpenWeather");
        Arc::new(MockWeatherProvider::new())
    } else {
        Arc::new(OpenWeatherClient::new(config.clone())?)
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(&config, store, provider);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
