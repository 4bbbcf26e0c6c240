use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWeatherResponse {
    pub main: CurrentMain,
    pub wind: CurrentWind,
    #[serde(default)]
    pub weather: Vec<CurrentWeatherKind>,
    pub sys: CurrentSys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentMain {
    pub temp: f64,
    pub feels_like: f64,
    pub pressure: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWind {
    pub speed: f64,
    #[serde(default)]
    pub deg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWeatherKind {
    pub main: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSys {
    pub sunrise: i64,
    pub sunset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneCallResponse {
    #[serde(default)]
    pub timezone_offset: i32,
    #[serde(default)]
    pub daily: Vec<OneCallDaily>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneCallDaily {
    pub dt: i64,
    pub temp: OneCallDailyTemp,
    #[serde(default)]
    pub pop: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneCallDailyTemp {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResponse {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
}
