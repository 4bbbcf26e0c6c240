use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Malformed input, rejected before any store or provider access.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Validate latitude and longitude coordinates
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError(format!(
            "Invalid latitude: {}. Must be between -90 and 90",
            lat
        )));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(ValidationError(format!(
            "Invalid longitude: {}. Must be between -180 and 180",
            lon
        )));
    }
    Ok(())
}

/// Parse a coordinate typed by a user: optional minus, digits, optional
/// fractional part. Exponents, `inf` and `NaN` are refused.
pub fn parse_coordinate(raw: &str, label: &str) -> Result<f64, ValidationError> {
    let raw = raw.trim();
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };

    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !is_digits(whole) || fraction.map_or(false, |f| !is_digits(f)) {
        return Err(ValidationError(format!(
            "Invalid {}: '{}'. Coordinates are decimal degrees",
            label, raw
        )));
    }

    raw.parse::<f64>()
        .map_err(|_| ValidationError(format!("Invalid {}: '{}'", label, raw)))
}

/// Calculate distance between two coordinates using Haversine formula
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Round to specified decimal places
pub fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let multiplier = 10_f64.powi(decimals as i32);
    (value * multiplier).round() / multiplier
}

/// Error response helper
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(status: u16, message: &str, code: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            code: code.to_string(),
            timestamp: Utc::now(),
        }
    }
}
