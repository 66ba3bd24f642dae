use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::info;

use crate::engine::{deadline, deadline_value};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::delivery_person::{DeliveryPerson, DeliveryProfile, DeliveryStatus};
use crate::models::role::{Identity, Role};
use crate::state::AppState;
use crate::store::delivery::NewDeliveryPerson;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/delivery-persons",
            post(register_profile).get(list_verified),
        )
        .route("/delivery-persons/me", get(get_profile).patch(update_profile))
        .route("/delivery-persons/me/location", patch(update_location))
        .route("/delivery-persons/me/availability", patch(update_availability))
        .route("/delivery-persons/me/approval-request", post(request_approval))
}

#[derive(Deserialize)]
pub struct RegisterProfileRequest {
    #[serde(flatten)]
    pub profile: DeliveryProfile,
    pub location: GeoPoint,
}

async fn register_profile(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<RegisterProfileRequest>,
) -> Result<(StatusCode, Json<DeliveryPerson>), AppError> {
    identity.require(Role::DeliveryPerson)?;
    payload.location.validate()?;

    let person = deadline(
        state.dispatch.store_timeout,
        "delivery person register",
        state.couriers.register(NewDeliveryPerson {
            owner_id: identity.id,
            profile: payload.profile,
            location: payload.location,
        }),
    )
    .await?;

    info!(delivery_person_id = %person.id, "delivery person registered");
    Ok((StatusCode::CREATED, Json(person)))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<DeliveryPerson>, AppError> {
    Ok(Json(me(&state, &identity).await?))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(profile): Json<DeliveryProfile>,
) -> Result<Json<DeliveryPerson>, AppError> {
    let person = me(&state, &identity).await?;
    let person = deadline(
        state.dispatch.store_timeout,
        "delivery person update",
        state.couriers.update_profile(person.id, profile),
    )
    .await?;
    Ok(Json(person))
}

#[derive(Deserialize)]
pub struct LocationUpdate {
    pub location: GeoPoint,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<LocationUpdate>,
) -> Result<Json<DeliveryPerson>, AppError> {
    payload.location.validate()?;
    let person = me(&state, &identity).await?;
    let person = deadline(
        state.dispatch.store_timeout,
        "delivery person update",
        state.couriers.update_location(person.id, payload.location),
    )
    .await?;
    Ok(Json(person))
}

#[derive(Deserialize)]
pub struct AvailabilityUpdate {
    pub status: DeliveryStatus,
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<AvailabilityUpdate>,
) -> Result<Json<DeliveryPerson>, AppError> {
    let person = me(&state, &identity).await?;
    let person = deadline(
        state.dispatch.store_timeout,
        "delivery person update",
        state.couriers.set_availability(person.id, payload.status),
    )
    .await?;
    Ok(Json(person))
}

async fn request_approval(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<StatusCode, AppError> {
    let person = me(&state, &identity).await?;
    if person.is_verified {
        return Err(AppError::Conflict(format!(
            "delivery person {} is already verified",
            person.id
        )));
    }
    deadline(
        state.dispatch.store_timeout,
        "approval request",
        state.platform.request_delivery_approval(person.id),
    )
    .await?;
    info!(delivery_person_id = %person.id, "verification requested");
    Ok(StatusCode::ACCEPTED)
}

async fn list_verified(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<DeliveryPerson>>, AppError> {
    if !matches!(identity.role, Role::FuelStation | Role::Admin) {
        return Err(AppError::Forbidden(format!(
            "{} cannot list delivery persons",
            identity.role
        )));
    }
    let persons = deadline_value(
        state.dispatch.store_timeout,
        "delivery person listing",
        state.couriers.verified(),
    )
    .await?;
    Ok(Json(persons))
}

async fn me(state: &AppState, identity: &Identity) -> Result<DeliveryPerson, AppError> {
    identity.require(Role::DeliveryPerson)?;
    deadline(
        state.dispatch.store_timeout,
        "delivery person lookup",
        state.couriers.by_owner(identity.id),
    )
    .await
}
