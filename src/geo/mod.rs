use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const EARTH_RADIUS_KM: f64 = 6_371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), GeoError> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(GeoError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }

    /// Google Maps link used in courier notifications.
    pub fn maps_link(&self) -> String {
        format!("https://www.google.com/maps?q={},{}", self.lat, self.lng)
    }
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * 1_000.0
}

/// Anything with a stable identity and a position on the globe.
pub trait Located {
    fn id(&self) -> Uuid;
    fn location(&self) -> &GeoPoint;
}

#[derive(Debug, Clone, Serialize)]
pub struct Nearby<T> {
    #[serde(flatten)]
    pub entity: T,
    pub distance_m: f64,
}

impl<T> Nearby<T> {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1_000.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NearestQuery {
    pub limit: Option<usize>,
    pub max_distance_m: Option<f64>,
}

impl NearestQuery {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            max_distance_m: None,
        }
    }

    pub fn within_km(mut self, radius_km: Option<f64>) -> Self {
        self.max_distance_m = radius_km.map(|km| km * 1_000.0);
        self
    }
}

/// Candidates matching `filter`, ascending by great-circle distance from
/// `origin`. Equal distances fall back to identity order so results are
/// reproducible. An empty result is not an error.
pub fn nearest<T, I, F>(
    origin: &GeoPoint,
    candidates: I,
    filter: F,
    query: NearestQuery,
) -> Result<Vec<Nearby<T>>, GeoError>
where
    T: Located,
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> bool,
{
    origin.validate()?;

    let mut matches: Vec<Nearby<T>> = candidates
        .into_iter()
        .filter(|candidate| filter(candidate) && candidate.location().validate().is_ok())
        .map(|candidate| {
            let distance_m = haversine_m(origin, candidate.location());
            Nearby {
                entity: candidate,
                distance_m,
            }
        })
        .filter(|hit| {
            query
                .max_distance_m
                .is_none_or(|max_distance| hit.distance_m <= max_distance)
        })
        .collect();

    matches.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.entity.id().cmp(&b.entity.id()))
    });

    if let Some(limit) = query.limit {
        matches.truncate(limit);
    }

    Ok(matches)
}
