use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::order::OrderEvent;
use crate::state::AppState;

/// Narrows the feed; no filter means every order event.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct EventFilter {
    pub station_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub delivery_person_id: Option<Uuid>,
}

impl EventFilter {
    pub fn admits(&self, event: &OrderEvent) -> bool {
        self.station_id.is_none_or(|id| id == event.station_id)
            && self.order_id.is_none_or(|id| id == event.order_id)
            && self
                .delivery_person_id
                .is_none_or(|id| event.delivery_person_id == Some(id))
    }
}

/// Live feed of order status changes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_order_events(socket, state, filter))
}

async fn stream_order_events(socket: WebSocket, state: Arc<AppState>, filter: EventFilter) {
    let (mut sink, mut inbound) = socket.split();
    let events = BroadcastStream::new(state.order_events_tx.subscribe());

    info!(?filter, "order feed subscriber connected");

    let forward = tokio::spawn(async move {
        let mut events = events.filter_map(|event| async move {
            match event {
                Ok(event) => filter.admits(&event).then_some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "order feed subscriber lagging, events dropped");
                    None
                }
            }
        });
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(order_id = %event.order_id, error = %err, "order event not serializable");
                    continue;
                }
            };
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are ignored; a close or error ends the session.
    let drain = tokio::spawn(async move {
        while let Some(Ok(frame)) = inbound.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
            debug!("ignoring inbound order feed frame");
        }
    });

    tokio::select! {
        _ = forward => {},
        _ = drain => {},
    }

    info!("order feed subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::EventFilter;
    use crate::models::order::{OrderEvent, OrderKind, OrderStatus};

    fn event(station_id: Uuid, delivery_person_id: Option<Uuid>) -> OrderEvent {
        OrderEvent {
            order_id: Uuid::new_v4(),
            kind: OrderKind::Speed,
            station_id,
            delivery_person_id,
            status: OrderStatus::OutForDelivery,
            payment_status: None,
            at: Utc::now(),
        }
    }

    #[test]
    fn empty_filter_admits_everything() {
        assert!(EventFilter::default().admits(&event(Uuid::new_v4(), None)));
    }

    #[test]
    fn station_and_rider_filters_combine() {
        let station = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let filter = EventFilter {
            station_id: Some(station),
            delivery_person_id: Some(rider),
            ..EventFilter::default()
        };

        assert!(filter.admits(&event(station, Some(rider))));
        assert!(!filter.admits(&event(station, None)));
        assert!(!filter.admits(&event(Uuid::new_v4(), Some(rider))));
    }
}
