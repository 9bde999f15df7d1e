use std::env;

use crate::error::AppError;
use crate::models::GeoPoint;
use crate::state::Venue;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub venue_name: String,
    pub venue_lat: f64,
    pub venue_lng: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            venue_name: env::var("VENUE_NAME").unwrap_or_else(|_| "Community Hall".to_string()),
            venue_lat: parse_or_default("VENUE_LAT", 42.3601)?,
            venue_lng: parse_or_default("VENUE_LNG", -71.0589)?,
        })
    }

    pub fn venue(&self) -> Venue {
        Venue {
            name: self.venue_name.clone(),
            location: GeoPoint {
                lat: self.venue_lat,
                lng: self.venue_lng,
            },
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
