use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::delivery_person::DeliveryPerson;
use crate::models::order::{Order, OrderKind, PaymentMode};
use crate::models::station::{FuelType, Station};
use crate::state::AppState;

/// What a delivery person needs to pick up and drop off an order.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentNotice {
    pub order_id: Uuid,
    pub kind: OrderKind,
    pub delivery_person_id: Uuid,
    pub delivery_contact: String,
    pub station_name: String,
    pub station_contact: String,
    pub station_location: GeoPoint,
    pub customer_name: String,
    pub customer_location: GeoPoint,
    pub fuel_type: FuelType,
    pub quantity: f64,
    pub total_amount: f64,
    pub collect_on_delivery: bool,
}

impl AssignmentNotice {
    pub fn for_order(order: &Order, courier: &DeliveryPerson, station: &Station) -> Self {
        Self {
            order_id: order.id,
            kind: order.kind,
            delivery_person_id: courier.id,
            delivery_contact: courier.profile.contact.clone(),
            station_name: station.profile.name.clone(),
            station_contact: station.profile.contact.clone(),
            station_location: station.location,
            customer_name: order.requester_name.clone(),
            customer_location: order.delivery.location,
            fuel_type: order.fuel_type,
            quantity: order.quantity,
            total_amount: order.total_amount,
            collect_on_delivery: order.payment_mode == PaymentMode::OnDelivery,
        }
    }

    pub fn message(&self) -> String {
        let heading = match self.kind {
            OrderKind::Speed => "NEW SPEED FUEL DELIVERY ASSIGNED",
            OrderKind::Standard => "New Fuel Delivery Assigned",
        };
        let mut text = format!(
            "*{heading}*\n\n*Station*\nName: {}\nContact: {}\nLocation: {}\n\n*Order*\nFuel: {}\nQuantity: {} L\nTotal: Rs {:.2}\n\n*Customer*\nName: {}\nLocation: {}\n",
            self.station_name,
            self.station_contact,
            self.station_location.maps_link(),
            self.fuel_type,
            self.quantity,
            self.total_amount,
            self.customer_name,
            self.customer_location.maps_link(),
        );
        if self.collect_on_delivery {
            let _ = write!(
                text,
                "\nCollect Rs {:.2} from the customer after delivery.",
                self.total_amount
            );
        }
        text
    }

    pub fn whatsapp_link(&self) -> String {
        format!(
            "https://wa.me/{}?text={}",
            self.delivery_contact,
            percent_encode(&self.message())
        )
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Outbound messaging collaborator.
pub trait Notifier: Send + Sync + 'static {
    fn notify_assignment(
        &self,
        notice: &AssignmentNotice,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Logs the message and deep link instead of sending anything.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify_assignment(&self, notice: &AssignmentNotice) -> Result<(), NotifyError> {
        info!(
            order_id = %notice.order_id,
            delivery_person_id = %notice.delivery_person_id,
            link = %notice.whatsapp_link(),
            "assignment notification"
        );
        Ok(())
    }
}

/// Fire-and-forget: a full or closed queue is logged, never surfaced.
pub fn enqueue_notice(state: &AppState, notice: AssignmentNotice) {
    let order_id = notice.order_id;
    match state.notice_tx.try_send(notice) {
        Ok(()) => state.metrics.notifications_in_queue.inc(),
        Err(err) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&["dropped"])
                .inc();
            warn!(order_id = %order_id, error = %err, "assignment notification dropped");
        }
    }
}

pub async fn run_notification_worker<N: Notifier>(
    state: Arc<AppState>,
    notifier: N,
    mut notice_rx: mpsc::Receiver<AssignmentNotice>,
) {
    info!("notification worker started");

    while let Some(notice) = notice_rx.recv().await {
        state.metrics.notifications_in_queue.dec();

        match notifier.notify_assignment(&notice).await {
            Ok(()) => {
                state
                    .metrics
                    .notifications_total
                    .with_label_values(&["sent"])
                    .inc();
            }
            Err(err) => {
                state
                    .metrics
                    .notifications_total
                    .with_label_values(&["failed"])
                    .inc();
                error!(order_id = %notice.order_id, error = %err, "failed to notify delivery person");
            }
        }
    }

    warn!("notification worker stopped: queue channel closed");
}

fn percent_encode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len() * 3);
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{percent_encode, AssignmentNotice};
    use crate::geo::GeoPoint;
    use crate::models::order::OrderKind;
    use crate::models::station::FuelType;

    fn notice(collect_on_delivery: bool) -> AssignmentNotice {
        AssignmentNotice {
            order_id: Uuid::new_v4(),
            kind: OrderKind::Speed,
            delivery_person_id: Uuid::new_v4(),
            delivery_contact: "919800000002".to_string(),
            station_name: "Koramangala Fuels".to_string(),
            station_contact: "919800000001".to_string(),
            station_location: GeoPoint {
                lat: 12.93,
                lng: 77.62,
            },
            customer_name: "Meera".to_string(),
            customer_location: GeoPoint {
                lat: 12.90,
                lng: 77.58,
            },
            fuel_type: FuelType::Diesel,
            quantity: 4.0,
            total_amount: 440.0,
            collect_on_delivery,
        }
    }

    #[test]
    fn message_mentions_cash_only_for_pay_on_delivery() {
        assert!(notice(true).message().contains("Collect Rs 440.00"));
        assert!(!notice(false).message().contains("Collect"));
    }

    #[test]
    fn whatsapp_link_targets_contact_with_encoded_text() {
        let link = notice(true).whatsapp_link();

        assert!(link.starts_with("https://wa.me/919800000002?text="));
        assert!(!link.contains(' '));
        assert!(link.contains("Koramangala%20Fuels"));
    }

    #[test]
    fn percent_encode_keeps_unreserved_bytes() {
        assert_eq!(percent_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode("a b\n*"), "a%20b%0A%2A");
    }
}
