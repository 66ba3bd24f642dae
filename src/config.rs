use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub notification_queue_size: usize,
    pub cors_origins: Vec<String>,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Knobs for planning, pricing and store access.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_order_litres: f64,
    pub surcharge_per_litre: f64,
    pub speed_charge_ratio: f64,
    pub station_candidate_limit: usize,
    pub radius_km: Option<f64>,
    pub store_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_order_litres: 10.0,
            surcharge_per_litre: 20.0,
            speed_charge_ratio: 0.2,
            station_candidate_limit: 10,
            radius_km: None,
            store_timeout: Duration::from_millis(2_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            max_order_litres: parse_or_default("MAX_ORDER_LITRES", defaults.max_order_litres)?,
            surcharge_per_litre: parse_or_default(
                "SURCHARGE_PER_LITRE",
                defaults.surcharge_per_litre,
            )?,
            speed_charge_ratio: parse_or_default(
                "SPEED_CHARGE_RATIO",
                defaults.speed_charge_ratio,
            )?,
            station_candidate_limit: parse_or_default(
                "STATION_CANDIDATE_LIMIT",
                defaults.station_candidate_limit,
            )?,
            radius_km: parse_optional("DISPATCH_RADIUS_KM")?,
            store_timeout: Duration::from_millis(parse_or_default("STORE_TIMEOUT_MS", 2_000u64)?),
        };
        dispatch.validate()?;

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            notification_queue_size: parse_or_default("NOTIFICATION_QUEUE_SIZE", 1024)?,
            cors_origins: env::var("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            dispatch,
        })
    }
}

impl DispatchConfig {
    fn validate(&self) -> Result<(), AppError> {
        if !(self.max_order_litres.is_finite() && self.max_order_litres > 0.0) {
            return Err(AppError::Internal("MAX_ORDER_LITRES must be > 0".to_string()));
        }
        if !(self.surcharge_per_litre.is_finite() && self.surcharge_per_litre >= 0.0) {
            return Err(AppError::Internal("SURCHARGE_PER_LITRE must be >= 0".to_string()));
        }
        if self.station_candidate_limit == 0 {
            return Err(AppError::Internal(
                "STATION_CANDIDATE_LIMIT must be > 0".to_string(),
            ));
        }
        if let Some(radius) = self.radius_km {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(AppError::Internal("DISPATCH_RADIUS_KM must be > 0".to_string()));
            }
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(key)?.unwrap_or(default))
}

fn parse_optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}
