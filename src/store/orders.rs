use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderKind, OrderStatus, PaymentMode, PaymentStatus};

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("order {order_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {0} is not a pre-paid order")]
    NotPrepaid(Uuid),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => AppError::NotFound(err.to_string()),
            LedgerError::InvalidTransition { .. } | LedgerError::NotPrepaid(_) => {
                AppError::InvalidTransition(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum PaymentMark {
    /// This call moved the order from pending to paid.
    Marked(Order),
    AlreadyPaid(Order),
}

#[derive(Default)]
pub struct OrderLedger {
    orders: DashMap<Uuid, Order>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub async fn insert(&self, order: Order) -> Order {
        self.orders.insert(order.id, order.clone());
        order
    }

    pub async fn get(&self, id: Uuid) -> Result<Order, LedgerError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(LedgerError::NotFound(id))
    }

    /// Moves to `next` if the lifecycle allows it. `also` runs under the
    /// same entry lock and still sees the previous status.
    pub async fn transition<F>(
        &self,
        id: Uuid,
        next: OrderStatus,
        also: F,
    ) -> Result<Order, LedgerError>
    where
        F: FnOnce(&mut Order),
    {
        self.modify(id, |order| {
            if !order.can_transition_to(next) {
                return Err(LedgerError::InvalidTransition {
                    order_id: order.id,
                    from: order.status,
                    to: next,
                });
            }
            also(order);
            order.status = next;
            Ok(())
        })
    }

    /// Conditional `pending -> paid`; a repeat reports `AlreadyPaid`
    /// without touching the order.
    pub async fn mark_paid(&self, id: Uuid, provider_ref: &str) -> Result<PaymentMark, LedgerError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;

        if order.payment_mode != PaymentMode::Online {
            return Err(LedgerError::NotPrepaid(id));
        }
        if order.is_paid() {
            return Ok(PaymentMark::AlreadyPaid(order.clone()));
        }
        if order.status != OrderStatus::Confirmed {
            return Err(LedgerError::InvalidTransition {
                order_id: id,
                from: order.status,
                to: OrderStatus::Processing,
            });
        }

        order.payment_status = Some(PaymentStatus::Paid);
        order.provider_ref = Some(provider_ref.to_string());
        order.updated_at = Utc::now();
        Ok(PaymentMark::Marked(order.clone()))
    }

    /// Field updates that do not change status.
    pub async fn update<F>(&self, id: Uuid, apply: F) -> Result<Order, LedgerError>
    where
        F: FnOnce(&mut Order),
    {
        self.modify(id, |order| {
            apply(order);
            Ok(())
        })
    }

    pub async fn for_requester(&self, requester_id: Uuid) -> Vec<Order> {
        self.collect_sorted(|order| order.requester_id == requester_id)
    }

    /// Confirmed or paid orders of a station with nobody out delivering yet.
    pub async fn awaiting_assignment(&self, station_id: Uuid, kind: OrderKind) -> Vec<Order> {
        self.collect_sorted(|order| {
            order.station_id == station_id
                && order.kind == kind
                && matches!(order.status, OrderStatus::Confirmed | OrderStatus::Processing)
        })
    }

    fn collect_sorted<F>(&self, keep: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        orders
    }

    fn modify<F>(&self, id: Uuid, apply: F) -> Result<Order, LedgerError>
    where
        F: FnOnce(&mut Order) -> Result<(), LedgerError>,
    {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or(LedgerError::NotFound(id))?;
        apply(order.value_mut())?;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}
