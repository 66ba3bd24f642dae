use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{GeoPoint, Located};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Petrol,
    Diesel,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Petrol => "petrol",
            FuelType::Diesel => "diesel",
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuelStock {
    pub litres: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationProfile {
    pub name: String,
    pub contact: String,
    pub address: String,
    pub area: Option<String>,
    pub city: String,
    pub pincode: Option<String>,
    pub open_time: String,
    pub close_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(flatten)]
    pub profile: StationProfile,
    pub location: GeoPoint,
    pub status: StationStatus,
    pub petrol: FuelStock,
    pub diesel: FuelStock,
    /// Standard bookings waiting for a delivery person.
    pub pending_orders: u32,
    pub pending_speed_orders: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Station {
    pub fn stock(&self, fuel: FuelType) -> &FuelStock {
        match fuel {
            FuelType::Petrol => &self.petrol,
            FuelType::Diesel => &self.diesel,
        }
    }

    pub fn stock_mut(&mut self, fuel: FuelType) -> &mut FuelStock {
        match fuel {
            FuelType::Petrol => &mut self.petrol,
            FuelType::Diesel => &mut self.diesel,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == StationStatus::Approved
    }

    /// Approved, priced, and holding at least `litres` of `fuel`.
    pub fn can_supply(&self, fuel: FuelType, litres: f64) -> bool {
        let stock = self.stock(fuel);
        self.is_approved() && stock.rate > 0.0 && stock.litres >= litres
    }

    pub fn matches_name(&self, needle: &str) -> bool {
        let needle = needle.trim();
        needle.is_empty()
            || self
                .profile
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase())
    }
}

impl Located for Station {
    fn id(&self) -> Uuid {
        self.id
    }

    fn location(&self) -> &GeoPoint {
        &self.location
    }
}
