use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::{
    Assignment, BookingDraft, Dispatcher, PaymentOutcome, SpeedOrderDraft,
};
use crate::engine::{deadline, deadline_value};
use crate::error::AppError;
use crate::geo::Nearby;
use crate::models::delivery_person::DeliveryPerson;
use crate::models::dispatch::{DispatchPlan, DispatchRequest};
use crate::models::order::Order;
use crate::models::role::{Identity, Role};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dispatch/plan", post(plan_dispatch))
        .route("/orders/speed", post(confirm_speed_order))
        .route("/bookings", post(book_standard))
        .route("/orders", get(list_my_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/payment", post(confirm_payment))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/candidates", get(list_candidates))
        .route("/orders/:id/deliver", post(deliver_order))
        .route("/orders/:id/cancel", post(cancel_order))
}

async fn plan_dispatch(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<DispatchRequest>,
) -> Result<Json<DispatchPlan>, AppError> {
    identity.require(Role::User)?;
    let plan = Dispatcher::new(&state).plan(&payload).await?;
    Ok(Json(plan))
}

async fn confirm_speed_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<SpeedOrderDraft>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = Dispatcher::new(&state)
        .confirm_speed_order(&identity, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn book_standard(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<BookingDraft>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = Dispatcher::new(&state).book_standard(&identity, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Deserialize)]
pub struct PaymentConfirmation {
    pub provider_ref: String,
    /// Result of the gateway signature check done at the edge.
    pub signature_valid: bool,
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentConfirmation>,
) -> Result<Json<PaymentOutcome>, AppError> {
    let outcome = Dispatcher::new(&state)
        .confirm_payment(id, &payload.provider_ref, payload.signature_valid)
        .await?;
    Ok(Json(outcome))
}

async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Order>>, AppError> {
    identity.require(Role::User)?;
    let orders = deadline_value(
        state.dispatch.store_timeout,
        "order listing",
        state.orders.for_requester(identity.id),
    )
    .await?;
    Ok(Json(orders))
}

/// Visible to the requester, the station owner, the assigned person and admins.
async fn get_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let limit = state.dispatch.store_timeout;
    let order = deadline(limit, "order lookup", state.orders.get(id)).await?;

    let visible = match identity.role {
        Role::Admin => true,
        Role::User => order.requester_id == identity.id,
        Role::FuelStation => {
            let station = deadline(limit, "station lookup", state.stations.get(order.station_id))
                .await?;
            station.owner_id == identity.id
        }
        Role::DeliveryPerson => {
            let person = deadline(limit, "delivery person lookup", state.couriers.by_owner(identity.id))
                .await?;
            order.delivery_person_id == Some(person.id)
        }
    };

    if !visible {
        return Err(AppError::NotFound(format!("order {id} not found")));
    }
    Ok(Json(order))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(default)]
    pub delivery_person_id: Option<Uuid>,
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = Dispatcher::new(&state)
        .assign(&identity, id, payload.delivery_person_id)
        .await?;
    Ok(Json(assignment))
}

async fn list_candidates(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Nearby<DeliveryPerson>>>, AppError> {
    let candidates = Dispatcher::new(&state).candidates(&identity, id).await?;
    Ok(Json(candidates))
}

async fn deliver_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = Dispatcher::new(&state).deliver(&identity, id).await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = Dispatcher::new(&state).cancel(&identity, id).await?;
    Ok(Json(order))
}
