use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::station::FuelType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub location: GeoPoint,
    pub fuel_type: FuelType,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub rate: f64,
    pub surcharge_per_litre: f64,
    pub quantity: f64,
    pub total_amount: f64,
    /// Informational only, never part of `total_amount`.
    pub speed_charges: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPlan {
    pub station_id: Uuid,
    pub delivery_person_id: Uuid,
    pub fuel_type: FuelType,
    pub quantity: f64,
    pub requester_location: GeoPoint,
    pub distance_to_station_km: f64,
    pub station_to_delivery_km: f64,
    pub routing_cost_km: f64,
    pub pricing: PricingBreakdown,
    pub planned_at: DateTime<Utc>,
}
