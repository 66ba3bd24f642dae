use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{GeoPoint, Located};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Available,
    Assigned,
    OutForDelivery,
    Busy,
    Offline,
}

impl DeliveryStatus {
    /// Statuses owned by an order; only the dispatcher may leave them.
    pub fn is_engaged(&self) -> bool {
        matches!(self, DeliveryStatus::Assigned | DeliveryStatus::OutForDelivery)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryProfile {
    pub name: String,
    pub contact: String,
    pub city: String,
    pub address: String,
    pub pincode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPerson {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(flatten)]
    pub profile: DeliveryProfile,
    pub location: GeoPoint,
    pub is_verified: bool,
    pub status: DeliveryStatus,
    pub current_order: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryPerson {
    pub fn is_dispatchable(&self) -> bool {
        self.is_verified && self.status == DeliveryStatus::Available
    }
}

impl Located for DeliveryPerson {
    fn id(&self) -> Uuid {
        self.id
    }

    fn location(&self) -> &GeoPoint {
        &self.location
    }
}
