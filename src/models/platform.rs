use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::station::FuelType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuelReserve {
    pub litres: f64,
    pub rate: f64,
}

/// Platform-wide wholesale stock and the admin's approval queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSnapshot {
    pub admin_id: Uuid,
    pub petrol: FuelReserve,
    pub diesel: FuelReserve,
    pub station_requests: Vec<Uuid>,
    pub delivery_requests: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl PlatformSnapshot {
    pub fn reserve(&self, fuel: FuelType) -> &FuelReserve {
        match fuel {
            FuelType::Petrol => &self.petrol,
            FuelType::Diesel => &self.diesel,
        }
    }

    pub fn reserve_mut(&mut self, fuel: FuelType) -> &mut FuelReserve {
        match fuel {
            FuelType::Petrol => &mut self.petrol,
            FuelType::Diesel => &mut self.diesel,
        }
    }
}
