use tokio::sync::{broadcast, mpsc};

use crate::config::DispatchConfig;
use crate::engine::notify::AssignmentNotice;
use crate::engine::planner::DispatchPlanner;
use crate::models::order::OrderEvent;
use crate::observability::metrics::Metrics;
use crate::store::{DeliveryPersonRegistry, OrderLedger, PlatformSettings, StationInventory};

pub struct AppState {
    pub dispatch: DispatchConfig,
    pub stations: StationInventory,
    pub couriers: DeliveryPersonRegistry,
    pub orders: OrderLedger,
    pub platform: PlatformSettings,
    pub notice_tx: mpsc::Sender<AssignmentNotice>,
    pub order_events_tx: broadcast::Sender<OrderEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        dispatch: DispatchConfig,
        notification_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<AssignmentNotice>) {
        let (notice_tx, notice_rx) = mpsc::channel(notification_queue_size);
        let (order_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                dispatch,
                stations: StationInventory::new(),
                couriers: DeliveryPersonRegistry::new(),
                orders: OrderLedger::new(),
                platform: PlatformSettings::new(),
                notice_tx,
                order_events_tx,
                metrics: Metrics::new(),
            },
            notice_rx,
        )
    }

    pub fn planner(&self) -> DispatchPlanner<'_> {
        DispatchPlanner::new(&self.stations, &self.couriers, &self.dispatch)
    }
}
