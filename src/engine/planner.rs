use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::deadline;
use crate::engine::pricing::{round2, PricingPolicy};
use crate::error::AppError;
use crate::geo::{Nearby, NearestQuery};
use crate::models::delivery_person::DeliveryPerson;
use crate::models::dispatch::{DispatchPlan, DispatchRequest};
use crate::models::station::Station;
use crate::store::{DeliveryPersonRegistry, StationInventory};

/// Read-only: picks the cheapest feasible (station, delivery person) pair
/// and quotes it. Nothing is reserved or claimed here.
pub struct DispatchPlanner<'a> {
    stations: &'a StationInventory,
    couriers: &'a DeliveryPersonRegistry,
    config: &'a DispatchConfig,
    pricing: PricingPolicy,
}

struct Candidate {
    station: Nearby<Station>,
    courier: Nearby<DeliveryPerson>,
    to_station_km: f64,
    to_courier_km: f64,
    cost_km: f64,
}

impl<'a> DispatchPlanner<'a> {
    pub fn new(
        stations: &'a StationInventory,
        couriers: &'a DeliveryPersonRegistry,
        config: &'a DispatchConfig,
    ) -> Self {
        Self {
            stations,
            couriers,
            config,
            pricing: PricingPolicy::from_config(config),
        }
    }

    pub async fn plan(&self, request: &DispatchRequest) -> Result<DispatchPlan, AppError> {
        validate_request(request, self.config)?;

        let fuel = request.fuel_type;
        let quantity = request.quantity;
        let station_query = NearestQuery::limit(self.config.station_candidate_limit)
            .within_km(self.config.radius_km);

        let stations = deadline(
            self.config.store_timeout,
            "station lookup",
            self.stations.nearest(&request.location, station_query, |station| {
                station.can_supply(fuel, quantity)
            }),
        )
        .await?;

        let mut best: Option<Candidate> = None;
        for station in stations {
            let Some(courier) = self.nearest_courier(&station.entity).await? else {
                debug!(station_id = %station.entity.id, "no available delivery person near station");
                continue;
            };

            let to_station_km = round2(station.distance_km());
            let to_courier_km = round2(courier.distance_km());
            let cost_km = round2(to_station_km + to_courier_km);

            // Strict comparison keeps the first-found pair on equal cost.
            if best.as_ref().is_none_or(|current| cost_km < current.cost_km) {
                best = Some(Candidate {
                    station,
                    courier,
                    to_station_km,
                    to_courier_km,
                    cost_km,
                });
            }
        }

        let chosen = best.ok_or(AppError::NoFeasibleAssignment)?;
        let rate = chosen.station.entity.stock(fuel).rate;

        debug!(
            station_id = %chosen.station.entity.id,
            delivery_person_id = %chosen.courier.entity.id,
            cost_km = chosen.cost_km,
            "dispatch planned"
        );

        Ok(DispatchPlan {
            station_id: chosen.station.entity.id,
            delivery_person_id: chosen.courier.entity.id,
            fuel_type: fuel,
            quantity,
            requester_location: request.location,
            distance_to_station_km: chosen.to_station_km,
            station_to_delivery_km: chosen.to_courier_km,
            routing_cost_km: chosen.cost_km,
            pricing: self.pricing.speed_quote(rate, quantity),
            planned_at: Utc::now(),
        })
    }

    /// Nearest verified, available person around `station`.
    pub async fn nearest_courier(
        &self,
        station: &Station,
    ) -> Result<Option<Nearby<DeliveryPerson>>, AppError> {
        self.nearest_courier_excluding(station, None).await
    }

    pub async fn nearest_courier_excluding(
        &self,
        station: &Station,
        excluded: Option<Uuid>,
    ) -> Result<Option<Nearby<DeliveryPerson>>, AppError> {
        let query = NearestQuery::limit(1).within_km(self.config.radius_km);
        let found = deadline(
            self.config.store_timeout,
            "delivery person lookup",
            self.couriers.nearest(&station.location, query, |person| {
                person.is_dispatchable() && Some(person.id) != excluded
            }),
        )
        .await?;
        Ok(found.into_iter().next())
    }
}

pub fn validate_request(request: &DispatchRequest, config: &DispatchConfig) -> Result<(), AppError> {
    request.location.validate()?;
    validate_quantity(request.quantity, config)
}

pub fn validate_quantity(quantity: f64, config: &DispatchConfig) -> Result<(), AppError> {
    if !(quantity.is_finite() && quantity > 0.0) {
        return Err(AppError::InvalidInput(format!(
            "quantity must be a positive number of litres, got {quantity}"
        )));
    }
    if quantity > config.max_order_litres {
        return Err(AppError::InvalidInput(format!(
            "at most {} litres per order",
            config.max_order_litres
        )));
    }
    Ok(())
}
