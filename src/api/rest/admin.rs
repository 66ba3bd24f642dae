use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::deadline;
use crate::engine::onboarding::{approve_station, reject_station, review_delivery_person};
use crate::error::AppError;
use crate::models::delivery_person::DeliveryPerson;
use crate::models::platform::PlatformSnapshot;
use crate::models::role::{Identity, Role};
use crate::models::station::Station;
use crate::state::AppState;
use crate::store::platform::FuelAmounts;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/settings", post(initialize_settings).get(get_settings))
        .route("/admin/restock", post(restock_platform))
        .route("/admin/station-requests", get(list_station_requests))
        .route("/admin/delivery-requests", get(list_delivery_requests))
        .route("/admin/stations/:id/approve", post(approve))
        .route("/admin/stations/:id/reject", post(reject))
        .route("/admin/delivery-persons/:id/approve", post(verify))
        .route("/admin/delivery-persons/:id/reject", post(unverify))
}

#[derive(Deserialize)]
pub struct SettingsRequest {
    pub stock: FuelAmounts,
    pub rates: FuelAmounts,
}

async fn initialize_settings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<SettingsRequest>,
) -> Result<(StatusCode, Json<PlatformSnapshot>), AppError> {
    identity.require(Role::Admin)?;
    let snapshot = deadline(
        state.dispatch.store_timeout,
        "platform settings",
        state
            .platform
            .initialize(identity.id, payload.stock, payload.rates),
    )
    .await?;
    info!(admin_id = %identity.id, "platform settings initialised");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<PlatformSnapshot>, AppError> {
    identity.require(Role::Admin)?;
    Ok(Json(snapshot(&state).await?))
}

#[derive(Deserialize)]
pub struct PlatformRestockRequest {
    pub added: FuelAmounts,
    pub rates: FuelAmounts,
}

async fn restock_platform(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<PlatformRestockRequest>,
) -> Result<Json<PlatformSnapshot>, AppError> {
    identity.require(Role::Admin)?;
    let snapshot = deadline(
        state.dispatch.store_timeout,
        "platform restock",
        state.platform.restock(payload.added, payload.rates),
    )
    .await?;
    Ok(Json(snapshot))
}

async fn list_station_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Station>>, AppError> {
    identity.require(Role::Admin)?;
    let queued = snapshot(&state).await?.station_requests;

    let mut stations = Vec::with_capacity(queued.len());
    for id in queued {
        match deadline(state.dispatch.store_timeout, "station lookup", state.stations.get(id)).await {
            Ok(station) => stations.push(station),
            Err(AppError::NotFound(_)) => warn!(station_id = %id, "queued station no longer exists"),
            Err(err) => return Err(err),
        }
    }
    Ok(Json(stations))
}

async fn list_delivery_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<DeliveryPerson>>, AppError> {
    identity.require(Role::Admin)?;
    let queued = snapshot(&state).await?.delivery_requests;

    let mut persons = Vec::with_capacity(queued.len());
    for id in queued {
        match deadline(
            state.dispatch.store_timeout,
            "delivery person lookup",
            state.couriers.get(id),
        )
        .await
        {
            Ok(person) => persons.push(person),
            Err(AppError::NotFound(_)) => {
                warn!(delivery_person_id = %id, "queued delivery person no longer exists")
            }
            Err(err) => return Err(err),
        }
    }
    Ok(Json(persons))
}

#[derive(Deserialize)]
pub struct ApproveStationRequest {
    /// Opening stock drawn from the platform reserve.
    #[serde(default)]
    pub supply: FuelAmounts,
}

async fn approve(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    payload: Option<Json<ApproveStationRequest>>,
) -> Result<Json<Station>, AppError> {
    let supply = payload
        .map(|Json(body)| body.supply)
        .unwrap_or_default();
    let station = approve_station(&state, &identity, id, supply).await?;
    Ok(Json(station))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Station>, AppError> {
    Ok(Json(reject_station(&state, &identity, id).await?))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryPerson>, AppError> {
    Ok(Json(review_delivery_person(&state, &identity, id, true).await?))
}

async fn unverify(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryPerson>, AppError> {
    Ok(Json(review_delivery_person(&state, &identity, id, false).await?))
}

async fn snapshot(state: &AppState) -> Result<PlatformSnapshot, AppError> {
    deadline(
        state.dispatch.store_timeout,
        "platform settings",
        state.platform.snapshot(),
    )
    .await
}
