use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;

pub type LocationId = i64;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] sqlx::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub name: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// The single live weather row of a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeatherSnapshot {
    pub location_id: LocationId,
    pub observed_at: DateTime<Utc>,
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BanRecord {
    pub id: Uuid,
    pub login: String,
    pub expires_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Repository for locations, their weather snapshots and the ban list.
///
/// Name and country comparisons are case-insensitive. Lists come back in
/// persistence order.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn list_locations(&self) -> Result<Vec<Location>, DatabaseError>;

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, DatabaseError>;

    async fn find_by_name(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<Location>, DatabaseError>;

    /// Inserts a location unless one with the same name and country exists.
    /// Returns the stored record and whether it was created by this call.
    async fn insert_location(
        &self,
        location: NewLocation,
    ) -> Result<(Location, bool), DatabaseError>;

    async fn get_snapshot(
        &self,
        location_id: LocationId,
    ) -> Result<Option<WeatherSnapshot>, DatabaseError>;

    /// Insert-or-replace keyed by `location_id`. A snapshot older than the
    /// stored one is ignored.
    async fn upsert_snapshot(&self, snapshot: &WeatherSnapshot) -> Result<(), DatabaseError>;

    async fn list_bans(&self) -> Result<Vec<BanRecord>, DatabaseError>;

    async fn insert_ban(&self, login: &str, expires_on: NaiveDate)
        -> Result<BanRecord, DatabaseError>;

    async fn delete_bans(&self, ids: &[Uuid]) -> Result<u64, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL COLLATE NOCASE,
                country TEXT NOT NULL COLLATE NOCASE,
                latitude REAL NOT NULL CHECK (latitude >= -90 AND latitude <= 90),
                longitude REAL NOT NULL CHECK (longitude >= -180 AND longitude <= 180),
                UNIQUE (name, country)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS weather_snapshots (
                location_id INTEGER PRIMARY KEY REFERENCES locations(id),
                observed_at TEXT NOT NULL,
                temperature REAL NOT NULL,
                feels_like REAL NOT NULL,
                pressure REAL NOT NULL,
                humidity REAL NOT NULL,
                wind_speed REAL NOT NULL,
                wind_direction_degrees REAL NOT NULL,
                sunrise TEXT NOT NULL,
                sunset TEXT NOT NULL,
                condition TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bans (
                id TEXT PRIMARY KEY,
                login TEXT NOT NULL,
                expires_on TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_name ON locations(name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl LocationStore for Database {
    async fn list_locations(&self) -> Result<Vec<Location>, DatabaseError> {
        let results = sqlx::query_as::<_, Location>("SELECT * FROM locations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(results)
    }

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, DatabaseError> {
        let result = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result)
    }

    async fn find_by_name(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<Location>, DatabaseError> {
        let results = match country {
            Some(country) => {
                sqlx::query_as::<_, Location>(
                    "SELECT * FROM locations WHERE name = $1 AND country = $2 ORDER BY id",
                )
                .bind(name)
                .bind(country)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE name = $1 ORDER BY id")
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(results)
    }

    async fn insert_location(
        &self,
        location: NewLocation,
    ) -> Result<(Location, bool), DatabaseError> {
        let inserted = sqlx::query_as::<_, Location>(
            r#"
            INSERT INTO locations (name, country, latitude, longitude)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name, country) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&location.name)
        .bind(&location.country)
        .bind(location.latitude)
        .bind(location.longitude)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(created) = inserted {
            return Ok((created, true));
        }

        let existing = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE name = $1 AND country = $2",
        )
        .bind(&location.name)
        .bind(&location.country)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DatabaseError::InvalidData(format!(
                "location {}, {} conflicted but could not be read back",
                location.name, location.country
            ))
        })?;

        Ok((existing, false))
    }

    async fn get_snapshot(
        &self,
        location_id: LocationId,
    ) -> Result<Option<WeatherSnapshot>, DatabaseError> {
        let result = sqlx::query_as::<_, WeatherSnapshot>(
            "SELECT * FROM weather_snapshots WHERE location_id = $1",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn upsert_snapshot(&self, snapshot: &WeatherSnapshot) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO weather_snapshots (
                location_id, observed_at, temperature, feels_like, pressure,
                humidity, wind_speed, wind_direction_degrees, sunrise, sunset, condition
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (location_id) DO UPDATE SET
                observed_at = excluded.observed_at,
                temperature = excluded.temperature,
                feels_like = excluded.feels_like,
                pressure = excluded.pressure,
                humidity = excluded.humidity,
                wind_speed = excluded.wind_speed,
                wind_direction_degrees = excluded.wind_direction_degrees,
                sunrise = excluded.sunrise,
                sunset = excluded.sunset,
                condition = excluded.condition
            WHERE excluded.observed_at > weather_snapshots.observed_at
            "#,
        )
        .bind(snapshot.location_id)
        .bind(snapshot.observed_at)
        .bind(snapshot.temperature)
        .bind(snapshot.feels_like)
        .bind(snapshot.pressure)
        .bind(snapshot.humidity)
        .bind(snapshot.wind_speed)
        .bind(snapshot.wind_direction_degrees)
        .bind(snapshot.sunrise)
        .bind(snapshot.sunset)
        .bind(&snapshot.condition)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_bans(&self) -> Result<Vec<BanRecord>, DatabaseError> {
        let results = sqlx::query_as::<_, BanRecord>("SELECT * FROM bans ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        Ok(results)
    }

    async fn insert_ban(
        &self,
        login: &str,
        expires_on: NaiveDate,
    ) -> Result<BanRecord, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query_as::<_, BanRecord>(
            r#"
            INSERT INTO bans (id, login, expires_on, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(login)
        .bind(expires_on)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn delete_bans(&self, ids: &[Uuid]) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;

        for id in ids {
            deleted += sqlx::query("DELETE FROM bans WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

/// Inserts every location listed in a JSON file, skipping known ones.
/// Returns how many records were new.
pub async fn seed_locations(store: &dyn LocationStore, path: &str) -> anyhow::Result<usize> {
    let raw = tokio::fs::read_to_string(path).await?;
    let locations: Vec<NewLocation> = serde_json::from_str(&raw)?;

    let mut created = 0;
    for location in locations {
        crate::utils::validate_coordinates(location.latitude, location.longitude)?;
        let (_, was_created) = store.insert_location(location).await?;
        if was_created {
            created += 1;
        }
    }

    Ok(created)
}

// Mock database for testing
pub struct MockDatabase {
    locations: tokio::sync::RwLock<Vec<Location>>,
    snapshots: tokio::sync::RwLock<HashMap<LocationId, WeatherSnapshot>>,
    bans: tokio::sync::RwLock<Vec<BanRecord>>,
    fail_writes: AtomicBool,
}

impl Default for MockDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDatabase {
    pub fn new() -> Self {
        Self {
            locations: tokio::sync::RwLock::new(Vec::new()),
            snapshots: tokio::sync::RwLock::new(HashMap::new()),
            bans: tokio::sync::RwLock::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent write fail as if the store were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    fn check_writable(&self) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl LocationStore for MockDatabase {
    async fn list_locations(&self) -> Result<Vec<Location>, DatabaseError> {
        Ok(self.locations.read().await.clone())
    }

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, DatabaseError> {
        Ok(self
            .locations
            .read()
            .await
            .iter()
            .find(|l| l.id == id)
            .cloned())
    }

    async fn find_by_name(
        &self,
        name: &str,
        country: Option<&str>,
    ) -> Result<Vec<Location>, DatabaseError> {
        Ok(self
            .locations
            .read()
            .await
            .iter()
            .filter(|l| same_text(&l.name, name))
            .filter(|l| country.map_or(true, |c| same_text(&l.country, c)))
            .cloned()
            .collect())
    }

    async fn insert_location(
        &self,
        location: NewLocation,
    ) -> Result<(Location, bool), DatabaseError> {
        self.check_writable()?;
        let mut locations = self.locations.write().await;

        if let Some(existing) = locations
            .iter()
            .find(|l| same_text(&l.name, &location.name) && same_text(&l.country, &location.country))
        {
            return Ok((existing.clone(), false));
        }

        let id = locations.last().map_or(1, |l| l.id + 1);
        let created = Location {
            id,
            name: location.name,
            country: location.country,
            latitude: location.latitude,
            longitude: location.longitude,
        };
        locations.push(created.clone());
        Ok((created, true))
    }

    async fn get_snapshot(
        &self,
        location_id: LocationId,
    ) -> Result<Option<WeatherSnapshot>, DatabaseError> {
        Ok(self.snapshots.read().await.get(&location_id).cloned())
    }

    async fn upsert_snapshot(&self, snapshot: &WeatherSnapshot) -> Result<(), DatabaseError> {
        self.check_writable()?;
        let mut snapshots = self.snapshots.write().await;

        let newer = snapshots
            .get(&snapshot.location_id)
            .map_or(true, |current| snapshot.observed_at > current.observed_at);
        if newer {
            snapshots.insert(snapshot.location_id, snapshot.clone());
        }
        Ok(())
    }

    async fn list_bans(&self) -> Result<Vec<BanRecord>, DatabaseError> {
        Ok(self.bans.read().await.clone())
    }

    async fn insert_ban(
        &self,
        login: &str,
        expires_on: NaiveDate,
    ) -> Result<BanRecord, DatabaseError> {
        self.check_writable()?;
        let record = BanRecord {
            id: Uuid::new_v4(),
            login: login.to_string(),
            expires_on,
            created_at: Utc::now(),
        };
        self.bans.write().await.push(record.clone());
        Ok(record)
    }

    async fn delete_bans(&self, ids: &[Uuid]) -> Result<u64, DatabaseError> {
        self.check_writable()?;
        let mut bans = self.bans.write().await;
        let before = bans.len();
        bans.retain(|b| !ids.contains(&b.id));
        Ok((before - bans.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
