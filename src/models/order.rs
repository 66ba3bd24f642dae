use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::station::FuelType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// User picked the station; the station assigns a delivery person later.
    Standard,
    /// Dispatched to the cheapest station/person pair at placement.
    Speed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Confirmed,
    Processing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Confirmed => 0,
            OrderStatus::Processing => 1,
            OrderStatus::OutForDelivery => 2,
            OrderStatus::Delivered => 3,
            OrderStatus::Cancelled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Forward-only; cancellation from any non-terminal status.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            OrderStatus::Cancelled => true,
            _ => next.rank() > self.rank(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Pre-paid through the payment gateway.
    Online,
    /// Cash collected by the delivery person.
    OnDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub location: GeoPoint,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub kind: OrderKind,
    pub requester_id: Uuid,
    pub requester_name: String,
    pub station_id: Uuid,
    pub delivery_person_id: Option<Uuid>,
    pub fuel_type: FuelType,
    pub quantity: f64,
    pub rate: f64,
    pub surcharge_per_litre: f64,
    pub total_amount: f64,
    pub speed_charges: Option<f64>,
    pub delivery: DeliveryAddress,
    pub status: OrderStatus,
    pub payment_mode: PaymentMode,
    pub payment_status: Option<PaymentStatus>,
    pub provider_ref: Option<String>,
    pub stock_reserved: bool,
    pub courier_claimed: bool,
    pub refund_due: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status == Some(PaymentStatus::Paid)
    }

    /// Status order plus the payment gate: a pre-paid order stays
    /// `confirmed` until the gateway reports it paid.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        let awaiting_payment = self.payment_mode == PaymentMode::Online && !self.is_paid();
        !(awaiting_payment && next != OrderStatus::Cancelled)
    }
}

/// Broadcast on every order state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: Uuid,
    pub kind: OrderKind,
    pub station_id: Uuid,
    pub delivery_person_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_status: Option<PaymentStatus>,
    pub at: DateTime<Utc>,
}

impl From<&Order> for OrderEvent {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            kind: order.kind,
            station_id: order.station_id,
            delivery_person_id: order.delivery_person_id,
            status: order.status,
            payment_status: order.payment_status,
            at: order.updated_at,
        }
    }
}
