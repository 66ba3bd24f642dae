use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::notify::{enqueue_notice, AssignmentNotice};
use crate::engine::planner::validate_quantity;
use crate::engine::pricing::PricingPolicy;
use crate::engine::{deadline, deadline_value};
use crate::error::AppError;
use crate::geo::{GeoPoint, Nearby, NearestQuery};
use crate::models::delivery_person::DeliveryPerson;
use crate::models::dispatch::{DispatchPlan, DispatchRequest};
use crate::models::order::{
    DeliveryAddress, Order, OrderEvent, OrderKind, OrderStatus, PaymentMode, PaymentStatus,
};
use crate::models::role::{Identity, Role};
use crate::models::station::{FuelType, Station};
use crate::state::AppState;
use crate::store::orders::PaymentMark;
use crate::store::stations::Reservation;

/// A speed order built from a plan the requester accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeedOrderDraft {
    pub station_id: Uuid,
    pub delivery_person_id: Uuid,
    pub fuel_type: FuelType,
    pub quantity: f64,
    pub location: GeoPoint,
    #[serde(default)]
    pub address: Option<String>,
    pub payment_mode: PaymentMode,
    /// Total the requester saw. A replan that changes it expires the order.
    #[serde(default)]
    pub accepted_total: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingDraft {
    pub station_id: Uuid,
    pub fuel_type: FuelType,
    pub quantity: f64,
    pub location: GeoPoint,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "order", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Processed(Order),
    AlreadyProcessed(Order),
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub order: Order,
    pub whatsapp_link: String,
}

/// Request-scoped orchestration over the shared stores.
pub struct Dispatcher<'a> {
    state: &'a AppState,
    pricing: PricingPolicy,
}

impl<'a> Dispatcher<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            pricing: PricingPolicy::from_config(&state.dispatch),
        }
    }

    pub async fn plan(&self, request: &DispatchRequest) -> Result<DispatchPlan, AppError> {
        let start = Instant::now();
        let result = self.state.planner().plan(request).await;

        let outcome = match &result {
            Ok(_) => "planned",
            Err(AppError::NoFeasibleAssignment) => "no_feasible",
            Err(AppError::InvalidInput(_)) => "invalid",
            Err(_) => "error",
        };
        self.state
            .metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.state
            .metrics
            .dispatch_plans_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    /// Places a speed order. Pay-on-delivery reserves and claims now,
    /// replanning once if the accepted pair was taken in the meantime.
    /// Pre-paid orders wait for the gateway.
    pub async fn confirm_speed_order(
        &self,
        identity: &Identity,
        draft: SpeedOrderDraft,
    ) -> Result<Order, AppError> {
        identity.require(Role::User)?;
        draft.location.validate()?;
        validate_quantity(draft.quantity, &self.state.dispatch)?;

        let order_id = Uuid::new_v4();
        let mut station = self.station(draft.station_id).await?;
        let mut person_id = draft.delivery_person_id;
        let mut reserved = false;

        if draft.payment_mode == PaymentMode::OnDelivery {
            match self
                .reserve_and_claim(&station, person_id, draft.fuel_type, draft.quantity, order_id)
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_race_lost() => {
                    warn!(order_id = %order_id, error = %err, "accepted plan went stale, replanning");
                    let replanned = self
                        .plan(&DispatchRequest {
                            location: draft.location,
                            fuel_type: draft.fuel_type,
                            quantity: draft.quantity,
                        })
                        .await?;
                    let accepted = draft.accepted_total.unwrap_or_else(|| {
                        self.pricing
                            .speed_quote(station.stock(draft.fuel_type).rate, draft.quantity)
                            .total_amount
                    });
                    station = self
                        .claim_replanned(&replanned, &draft, accepted, order_id)
                        .await?;
                    person_id = replanned.delivery_person_id;
                }
                Err(err) => return Err(err),
            }
            reserved = true;
        } else {
            self.person(person_id).await?;
        }

        let quote = self
            .pricing
            .speed_quote(station.stock(draft.fuel_type).rate, draft.quantity);
        let now = Utc::now();
        let order = Order {
            id: order_id,
            kind: OrderKind::Speed,
            requester_id: identity.id,
            requester_name: identity.name.clone(),
            station_id: station.id,
            delivery_person_id: Some(person_id),
            fuel_type: draft.fuel_type,
            quantity: draft.quantity,
            rate: quote.rate,
            surcharge_per_litre: quote.surcharge_per_litre,
            total_amount: quote.total_amount,
            speed_charges: Some(quote.speed_charges),
            delivery: DeliveryAddress {
                location: draft.location,
                address: draft.address,
            },
            status: OrderStatus::Confirmed,
            payment_mode: draft.payment_mode,
            payment_status: Some(PaymentStatus::Pending),
            provider_ref: None,
            stock_reserved: reserved,
            courier_claimed: reserved,
            refund_due: false,
            created_at: now,
            updated_at: now,
        };

        let order = match deadline_value(
            self.timeout(),
            "order insert",
            self.state.orders.insert(order),
        )
        .await
        {
            Ok(order) => order,
            Err(err) => {
                if reserved {
                    self.release_person(person_id, order_id).await;
                    self.release_stock(&station, order_id, draft.fuel_type, draft.quantity)
                        .await;
                }
                return Err(err);
            }
        };
        self.track_pending(&order, 1).await;
        self.publish(&order);

        info!(
            order_id = %order.id,
            station_id = %order.station_id,
            payment_mode = ?order.payment_mode,
            total_amount = order.total_amount,
            "speed order confirmed"
        );
        Ok(order)
    }

    /// Gateway callback. A repeat for an already paid order changes nothing.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        provider_ref: &str,
        signature_valid: bool,
    ) -> Result<PaymentOutcome, AppError> {
        deadline(self.timeout(), "order lookup", self.state.orders.get(order_id)).await?;

        if !signature_valid {
            self.count_payment("rejected");
            warn!(order_id = %order_id, "payment signature rejected");
            return Err(AppError::PaymentVerificationFailed(order_id.to_string()));
        }
        if provider_ref.trim().is_empty() {
            return Err(AppError::InvalidInput("provider_ref is required".to_string()));
        }

        let marked = deadline(
            self.timeout(),
            "payment mark",
            self.state.orders.mark_paid(order_id, provider_ref),
        )
        .await?;

        let order = match marked {
            PaymentMark::AlreadyPaid(order) => {
                self.count_payment("duplicate");
                info!(order_id = %order_id, "payment already processed");
                return Ok(PaymentOutcome::AlreadyProcessed(order));
            }
            PaymentMark::Marked(order) => order,
        };
        self.count_payment("processed");

        let secured = match self.station(order.station_id).await {
            Ok(station) => self
                .secure_paid_order(&order, &station)
                .await
                .map(|person| (station, person)),
            Err(err) => Err(err),
        };
        // Paid from here on: anything but a timeout cancels with a refund.
        let (station, person) = match secured {
            Ok(secured) => secured,
            Err(err @ AppError::Timeout(_)) => return Err(err),
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "paid order cannot be fulfilled");
                self.expire(&order).await?;
                return Err(AppError::AssignmentExpired(format!(
                    "order {order_id} could not be fulfilled and will be refunded"
                )));
            }
        };

        let person_id = person.id;
        let processing = deadline(
            self.timeout(),
            "order transition",
            self.state
                .orders
                .transition(order_id, OrderStatus::Processing, |order| {
                    order.delivery_person_id = Some(person_id);
                    order.stock_reserved = true;
                    order.courier_claimed = true;
                }),
        )
        .await;

        let order = match processing {
            Ok(order) => order,
            Err(err) => {
                self.release_person(person_id, order_id).await;
                self.release_stock(&station, order_id, order.fuel_type, order.quantity)
                    .await;
                return Err(err);
            }
        };

        self.publish(&order);
        info!(order_id = %order.id, delivery_person_id = %person_id, "pre-paid order processing");
        Ok(PaymentOutcome::Processed(order))
    }

    /// Station-chosen booking: stock is held now, a delivery person is
    /// assigned later.
    pub async fn book_standard(
        &self,
        identity: &Identity,
        draft: BookingDraft,
    ) -> Result<Order, AppError> {
        identity.require(Role::User)?;
        draft.location.validate()?;
        validate_quantity(draft.quantity, &self.state.dispatch)?;

        let station = self.station(draft.station_id).await?;
        let reservation = self
            .reserve(&station, draft.fuel_type, draft.quantity)
            .await?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            kind: OrderKind::Standard,
            requester_id: identity.id,
            requester_name: identity.name.clone(),
            station_id: station.id,
            delivery_person_id: None,
            fuel_type: draft.fuel_type,
            quantity: draft.quantity,
            rate: reservation.rate,
            surcharge_per_litre: 0.0,
            total_amount: self.pricing.standard_total(reservation.rate, draft.quantity),
            speed_charges: None,
            delivery: DeliveryAddress {
                location: draft.location,
                address: draft.address,
            },
            status: OrderStatus::Confirmed,
            payment_mode: PaymentMode::OnDelivery,
            payment_status: None,
            provider_ref: None,
            stock_reserved: true,
            courier_claimed: false,
            refund_due: false,
            created_at: now,
            updated_at: now,
        };

        let order = deadline_value(self.timeout(), "order insert", self.state.orders.insert(order))
            .await?;
        self.track_pending(&order, 1).await;
        self.publish(&order);

        info!(order_id = %order.id, station_id = %order.station_id, "booking confirmed");
        Ok(order)
    }

    /// Station hands an order to a delivery person. Speed orders keep the
    /// person claimed at placement.
    pub async fn assign(
        &self,
        identity: &Identity,
        order_id: Uuid,
        person_id: Option<Uuid>,
    ) -> Result<Assignment, AppError> {
        identity.require(Role::FuelStation)?;

        let order = deadline(self.timeout(), "order lookup", self.state.orders.get(order_id)).await?;
        let station = self.station(order.station_id).await?;
        if station.owner_id != identity.id {
            return Err(AppError::Forbidden(format!(
                "station {} belongs to another account",
                station.id
            )));
        }
        if !order.can_transition_to(OrderStatus::OutForDelivery) {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is {:?} and cannot go out for delivery",
                order.status
            )));
        }

        let (person_id, claimed_here) = match (order.courier_claimed, order.delivery_person_id) {
            (true, Some(claimed)) => {
                if person_id.is_some_and(|requested| requested != claimed) {
                    return Err(AppError::Conflict(format!(
                        "order {order_id} is already claimed by delivery person {claimed}"
                    )));
                }
                (claimed, false)
            }
            _ => {
                let person_id = person_id.ok_or_else(|| {
                    AppError::InvalidInput("delivery_person_id is required".to_string())
                })?;
                self.claim(person_id, order_id).await?;
                (person_id, true)
            }
        };

        let outcome = self.dispatch_out(order_id, person_id).await;
        let (order, person) = match outcome {
            Ok(done) => done,
            Err(err) => {
                if claimed_here {
                    self.release_person(person_id, order_id).await;
                }
                return Err(err);
            }
        };

        self.track_pending(&order, -1).await;
        self.publish(&order);

        let notice = AssignmentNotice::for_order(&order, &person, &station);
        let whatsapp_link = notice.whatsapp_link();
        enqueue_notice(self.state, notice);

        info!(order_id = %order.id, delivery_person_id = %person_id, "order out for delivery");
        Ok(Assignment {
            order,
            whatsapp_link,
        })
    }

    /// Completion by the assigned delivery person.
    pub async fn deliver(&self, identity: &Identity, order_id: Uuid) -> Result<Order, AppError> {
        identity.require(Role::DeliveryPerson)?;

        let person = deadline(
            self.timeout(),
            "delivery person lookup",
            self.state.couriers.by_owner(identity.id),
        )
        .await?;
        let order = deadline(self.timeout(), "order lookup", self.state.orders.get(order_id)).await?;
        if order.delivery_person_id != Some(person.id) {
            return Err(AppError::Forbidden(format!(
                "order {order_id} is assigned to someone else"
            )));
        }
        if order.status != OrderStatus::OutForDelivery {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is {:?}, not out for delivery",
                order.status
            )));
        }

        let order = deadline(
            self.timeout(),
            "order transition",
            self.state
                .orders
                .transition(order_id, OrderStatus::Delivered, |order| {
                    if order.kind == OrderKind::Speed
                        && order.payment_mode == PaymentMode::OnDelivery
                    {
                        order.payment_status = Some(PaymentStatus::Paid);
                    }
                }),
        )
        .await?;

        self.release_person(person.id, order_id).await;
        self.publish(&order);

        info!(order_id = %order.id, delivery_person_id = %person.id, "order delivered");
        Ok(order)
    }

    /// Cancels a non-terminal order and undoes whatever it still holds.
    pub async fn cancel(&self, identity: &Identity, order_id: Uuid) -> Result<Order, AppError> {
        let order = deadline(self.timeout(), "order lookup", self.state.orders.get(order_id)).await?;
        match identity.role {
            Role::User if order.requester_id == identity.id => {}
            Role::FuelStation => {
                let station = self.station(order.station_id).await?;
                if station.owner_id != identity.id {
                    return Err(AppError::Forbidden(format!(
                        "order {order_id} belongs to another station"
                    )));
                }
            }
            Role::Admin => {}
            _ => {
                return Err(AppError::Forbidden(format!(
                    "{} cannot cancel order {order_id}",
                    identity.role
                )));
            }
        }

        let (order, previous) = self.close_as_cancelled(order_id, false).await?;
        self.undo_holds(&previous).await;

        info!(order_id = %order.id, by = %identity.role, "order cancelled");
        Ok(order)
    }

    /// Delivery persons around the order's station who could take it.
    pub async fn candidates(
        &self,
        identity: &Identity,
        order_id: Uuid,
    ) -> Result<Vec<Nearby<DeliveryPerson>>, AppError> {
        identity.require(Role::FuelStation)?;

        let order = deadline(self.timeout(), "order lookup", self.state.orders.get(order_id)).await?;
        let station = self.station(order.station_id).await?;
        if station.owner_id != identity.id {
            return Err(AppError::Forbidden(format!(
                "order {order_id} belongs to another station"
            )));
        }

        let query = NearestQuery::limit(self.state.dispatch.station_candidate_limit)
            .within_km(self.state.dispatch.radius_km);
        deadline(
            self.timeout(),
            "delivery person lookup",
            self.state
                .couriers
                .nearest(&station.location, query, DeliveryPerson::is_dispatchable),
        )
        .await
    }

    async fn secure_paid_order(
        &self,
        order: &Order,
        station: &Station,
    ) -> Result<DeliveryPerson, AppError> {
        self.reserve(station, order.fuel_type, order.quantity).await?;

        let first_choice = match order.delivery_person_id {
            Some(person_id) => Some(person_id),
            None => match self.state.planner().nearest_courier(station).await {
                Ok(nearby) => nearby.map(|nearby| nearby.entity.id),
                Err(err) => {
                    self.release_stock(station, order.id, order.fuel_type, order.quantity)
                        .await;
                    return Err(err);
                }
            },
        };

        let mut last_err = AppError::AlreadyClaimed(format!(
            "no delivery person available near station {}",
            station.id
        ));
        if let Some(person_id) = first_choice {
            match self.claim(person_id, order.id).await {
                Ok(person) => return Ok(person),
                Err(err) if err.is_race_lost() => last_err = err,
                Err(err) => {
                    self.release_stock(station, order.id, order.fuel_type, order.quantity)
                        .await;
                    return Err(err);
                }
            }

            let fallback = self
                .state
                .planner()
                .nearest_courier_excluding(station, Some(person_id))
                .await;
            if let Ok(Some(nearby)) = fallback {
                match self.claim(nearby.entity.id, order.id).await {
                    Ok(person) => return Ok(person),
                    Err(err) => last_err = err,
                }
            }
        }

        self.release_stock(station, order.id, order.fuel_type, order.quantity)
            .await;
        Err(last_err)
    }

    async fn reserve_and_claim(
        &self,
        station: &Station,
        person_id: Uuid,
        fuel: FuelType,
        quantity: f64,
        order_id: Uuid,
    ) -> Result<(Reservation, DeliveryPerson), AppError> {
        let reservation = self.reserve(station, fuel, quantity).await?;
        match self.claim(person_id, order_id).await {
            Ok(person) => Ok((reservation, person)),
            Err(err) => {
                self.release_stock(station, order_id, fuel, quantity).await;
                Err(err)
            }
        }
    }

    /// Second and last attempt after a stale plan. Losing again, or a price
    /// the requester never saw, expires the order instead of retrying.
    async fn claim_replanned(
        &self,
        plan: &DispatchPlan,
        draft: &SpeedOrderDraft,
        accepted_total: f64,
        order_id: Uuid,
    ) -> Result<Station, AppError> {
        let replanned_total = plan.pricing.total_amount;
        if draft.accepted_total.is_some() && (replanned_total - accepted_total).abs() > 0.005 {
            info!(order_id = %order_id, accepted_total, replanned_total, "replanned price not accepted");
            return Err(AppError::AssignmentExpired(format!(
                "price changed from {accepted_total} to {replanned_total}, please replan"
            )));
        }

        let station = self.station(plan.station_id).await?;
        self.reserve_and_claim(
            &station,
            plan.delivery_person_id,
            draft.fuel_type,
            draft.quantity,
            order_id,
        )
        .await
        .map_err(|err| {
            if err.is_race_lost() {
                AppError::AssignmentExpired(
                    "stations or delivery persons changed twice, please replan".to_string(),
                )
            } else {
                err
            }
        })?;

        if (replanned_total - accepted_total).abs() > 0.005 {
            info!(
                order_id = %order_id,
                station_id = %station.id,
                accepted_total,
                replanned_total,
                "replanned order re-priced"
            );
        }
        Ok(station)
    }

    async fn reserve(
        &self,
        station: &Station,
        fuel: FuelType,
        quantity: f64,
    ) -> Result<Reservation, AppError> {
        let result = deadline(
            self.timeout(),
            "stock reservation",
            self.state.stations.reserve(station.id, fuel, quantity),
        )
        .await;

        let outcome = match &result {
            Ok(reservation) => {
                self.state
                    .metrics
                    .record_stock(&station.id.to_string(), fuel, reservation.new_stock);
                "reserved"
            }
            Err(AppError::InsufficientStock(_)) => "insufficient",
            Err(_) => "error",
        };
        self.state
            .metrics
            .reservations_total
            .with_label_values(&[outcome])
            .inc();
        result
    }

    async fn claim(&self, person_id: Uuid, order_id: Uuid) -> Result<DeliveryPerson, AppError> {
        let result = deadline(
            self.timeout(),
            "delivery person claim",
            self.state.couriers.try_claim(person_id, order_id),
        )
        .await;

        let outcome = match &result {
            Ok(_) => "claimed",
            Err(AppError::AlreadyClaimed(_)) => "lost",
            Err(_) => "error",
        };
        self.state
            .metrics
            .claims_total
            .with_label_values(&[outcome])
            .inc();
        result
    }

    async fn dispatch_out(
        &self,
        order_id: Uuid,
        person_id: Uuid,
    ) -> Result<(Order, DeliveryPerson), AppError> {
        let person = deadline(
            self.timeout(),
            "delivery person update",
            self.state.couriers.mark_out_for_delivery(person_id, order_id),
        )
        .await?;
        let order = deadline(
            self.timeout(),
            "order transition",
            self.state
                .orders
                .transition(order_id, OrderStatus::OutForDelivery, |order| {
                    order.delivery_person_id = Some(person_id);
                    order.courier_claimed = true;
                }),
        )
        .await?;
        Ok((order, person))
    }

    /// Cancels a paid order that lost every race and flags it for refund.
    async fn expire(&self, order: &Order) -> Result<(), AppError> {
        let (cancelled, _) = self.close_as_cancelled(order.id, true).await?;
        warn!(order_id = %cancelled.id, "pre-paid order expired, refund due");
        Ok(())
    }

    /// Returns the cancelled order plus a copy taken just before the
    /// transition, which records what still needs releasing.
    async fn close_as_cancelled(
        &self,
        order_id: Uuid,
        refund_due: bool,
    ) -> Result<(Order, Order), AppError> {
        let mut previous = None;
        let order = deadline(
            self.timeout(),
            "order transition",
            self.state
                .orders
                .transition(order_id, OrderStatus::Cancelled, |order| {
                    previous = Some(order.clone());
                    order.refund_due = refund_due || order.is_paid();
                    order.stock_reserved = false;
                    order.courier_claimed = false;
                }),
        )
        .await?;
        let previous = previous.unwrap_or_else(|| order.clone());

        if matches!(previous.status, OrderStatus::Confirmed | OrderStatus::Processing) {
            self.track_pending(&order, -1).await;
        }
        self.publish(&order);
        Ok((order, previous))
    }

    async fn undo_holds(&self, previous: &Order) {
        if previous.stock_reserved {
            match self.station(previous.station_id).await {
                Ok(station) => {
                    self.release_stock(&station, previous.id, previous.fuel_type, previous.quantity)
                        .await
                }
                Err(err) => {
                    error!(order_id = %previous.id, error = %err, "station gone, reserved stock not returned")
                }
            }
        }
        if previous.courier_claimed {
            if let Some(person_id) = previous.delivery_person_id {
                self.release_person(person_id, previous.id).await;
            }
        }
    }

    async fn release_stock(&self, station: &Station, order_id: Uuid, fuel: FuelType, quantity: f64) {
        if quantity <= 0.0 {
            return;
        }
        match deadline(
            self.timeout(),
            "stock release",
            self.state.stations.release(station.id, fuel, quantity),
        )
        .await
        {
            Ok(new_stock) => {
                self.state
                    .metrics
                    .record_stock(&station.id.to_string(), fuel, new_stock);
            }
            Err(err) => {
                error!(order_id = %order_id, station_id = %station.id, error = %err, "failed to release reserved stock")
            }
        }
    }

    async fn release_person(&self, person_id: Uuid, order_id: Uuid) {
        if let Err(err) = deadline(
            self.timeout(),
            "delivery person release",
            self.state.couriers.release(person_id, order_id),
        )
        .await
        {
            error!(order_id = %order_id, delivery_person_id = %person_id, error = %err, "failed to release delivery person");
        }
    }

    async fn track_pending(&self, order: &Order, delta: i32) {
        if let Err(err) = deadline(
            self.timeout(),
            "pending counter",
            self.state.stations.track_pending(order.station_id, order.kind, delta),
        )
        .await
        {
            warn!(order_id = %order.id, error = %err, "pending counter not updated");
        }
    }

    async fn station(&self, id: Uuid) -> Result<Station, AppError> {
        deadline(self.timeout(), "station lookup", self.state.stations.get(id)).await
    }

    async fn person(&self, id: Uuid) -> Result<DeliveryPerson, AppError> {
        deadline(self.timeout(), "delivery person lookup", self.state.couriers.get(id)).await
    }

    fn publish(&self, order: &Order) {
        // No subscribers is fine.
        let _ = self.state.order_events_tx.send(OrderEvent::from(order));
    }

    fn count_payment(&self, outcome: &str) {
        self.state
            .metrics
            .payments_total
            .with_label_values(&[outcome])
            .inc();
    }

    fn timeout(&self) -> Duration {
        self.state.dispatch.store_timeout
    }
}
