use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::models::station::FuelType;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_plans_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub reservations_total: IntCounterVec,
    pub claims_total: IntCounterVec,
    pub payments_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub notifications_in_queue: IntGauge,
    pub station_stock_litres: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_plans_total = IntCounterVec::new(
            Opts::new("dispatch_plans_total", "Dispatch planning attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_plans_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch planning in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let reservations_total = IntCounterVec::new(
            Opts::new("reservations_total", "Stock reservations by outcome"),
            &["outcome"],
        )
        .expect("valid reservations_total metric");

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Delivery person claims by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let payments_total = IntCounterVec::new(
            Opts::new("payments_total", "Payment confirmations by outcome"),
            &["outcome"],
        )
        .expect("valid payments_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Assignment notifications by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let notifications_in_queue = IntGauge::new(
            "notifications_in_queue",
            "Assignment notifications waiting to be sent",
        )
        .expect("valid notifications_in_queue metric");

        let station_stock_litres = GaugeVec::new(
            Opts::new("station_stock_litres", "Fuel stock per station after the last change"),
            &["station_id", "fuel"],
        )
        .expect("valid station_stock_litres metric");

        registry
            .register(Box::new(dispatch_plans_total.clone()))
            .expect("register dispatch_plans_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(reservations_total.clone()))
            .expect("register reservations_total");
        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(payments_total.clone()))
            .expect("register payments_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(notifications_in_queue.clone()))
            .expect("register notifications_in_queue");
        registry
            .register(Box::new(station_stock_litres.clone()))
            .expect("register station_stock_litres");

        Self {
            registry,
            dispatch_plans_total,
            dispatch_latency_seconds,
            reservations_total,
            claims_total,
            payments_total,
            notifications_total,
            notifications_in_queue,
            station_stock_litres,
        }
    }

    pub fn record_stock(&self, station_id: &str, fuel: FuelType, litres: f64) {
        self.station_stock_litres
            .with_label_values(&[station_id, fuel.as_str()])
            .set(litres);
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
