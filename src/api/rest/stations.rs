use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::{deadline, deadline_value};
use crate::error::AppError;
use crate::geo::{GeoPoint, Nearby, NearestQuery};
use crate::models::order::{Order, OrderKind};
use crate::models::role::{Identity, Role};
use crate::models::station::{FuelStock, FuelType, Station, StationProfile};
use crate::state::AppState;
use crate::store::stations::{NewStation, StationUpdate};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stations", post(register_station))
        .route("/stations/mine", get(list_mine))
        .route("/stations/search", get(search_mine))
        .route("/stations/nearby", get(list_nearby))
        .route(
            "/stations/:id",
            get(get_station).patch(update_station).delete(remove_station),
        )
        .route("/stations/:id/restock", post(restock_station))
        .route("/stations/:id/orders", get(list_awaiting_orders))
        .route("/stations/:id/approval-request", post(request_approval))
}

#[derive(Deserialize)]
pub struct RegisterStationRequest {
    #[serde(flatten)]
    pub profile: StationProfile,
    pub location: GeoPoint,
    pub petrol: FuelStock,
    pub diesel: FuelStock,
}

async fn register_station(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<RegisterStationRequest>,
) -> Result<(StatusCode, Json<Station>), AppError> {
    identity.require(Role::FuelStation)?;
    payload.location.validate()?;

    let station = deadline(
        state.dispatch.store_timeout,
        "station register",
        state.stations.register(NewStation {
            owner_id: identity.id,
            profile: payload.profile,
            location: payload.location,
            petrol: payload.petrol,
            diesel: payload.diesel,
        }),
    )
    .await?;

    info!(station_id = %station.id, owner_id = %identity.id, "station registered");
    Ok((StatusCode::CREATED, Json(station)))
}

#[derive(Deserialize)]
pub struct NameFilter {
    #[serde(default)]
    pub name: String,
}

async fn list_mine(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(filter): Query<NameFilter>,
) -> Result<Json<Vec<Station>>, AppError> {
    identity.require(Role::FuelStation)?;
    owned(&state, &identity, &filter.name).await
}

async fn search_mine(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(filter): Query<NameFilter>,
) -> Result<Json<Vec<Station>>, AppError> {
    identity.require(Role::FuelStation)?;
    if filter.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name is required".to_string()));
    }
    owned(&state, &identity, &filter.name).await
}

async fn owned(
    state: &AppState,
    identity: &Identity,
    name: &str,
) -> Result<Json<Vec<Station>>, AppError> {
    let stations = deadline_value(
        state.dispatch.store_timeout,
        "station listing",
        state.stations.owned_by(identity.id, name),
    )
    .await?;
    Ok(Json(stations))
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub name: String,
    pub limit: Option<usize>,
}

async fn list_nearby(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<Nearby<Station>>>, AppError> {
    identity.require(Role::User)?;

    let origin = GeoPoint::new(query.lat, query.lng)?;
    let limit = query
        .limit
        .unwrap_or(state.dispatch.station_candidate_limit);
    let nearest = NearestQuery::limit(limit).within_km(state.dispatch.radius_km);
    let name = query.name;

    let stations = deadline(
        state.dispatch.store_timeout,
        "station lookup",
        state.stations.nearest(&origin, nearest, |station| {
            station.is_approved() && station.matches_name(&name)
        }),
    )
    .await?;
    Ok(Json(stations))
}

async fn get_station(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Station>, AppError> {
    let station = owned_station(&state, &identity, id).await?;
    Ok(Json(station))
}

#[derive(Deserialize)]
pub struct UpdateStationRequest {
    pub profile: Option<StationProfile>,
    pub location: Option<GeoPoint>,
    pub petrol_rate: Option<f64>,
    pub diesel_rate: Option<f64>,
}

async fn update_station(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStationRequest>,
) -> Result<Json<Station>, AppError> {
    owned_station(&state, &identity, id).await?;
    if let Some(location) = &payload.location {
        location.validate()?;
    }

    let station = deadline(
        state.dispatch.store_timeout,
        "station update",
        state.stations.update(
            id,
            StationUpdate {
                profile: payload.profile,
                location: payload.location,
                petrol_rate: payload.petrol_rate,
                diesel_rate: payload.diesel_rate,
            },
        ),
    )
    .await?;
    Ok(Json(station))
}

async fn remove_station(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let station = owned_station(&state, &identity, id).await?;
    if station.pending_orders > 0 || station.pending_speed_orders > 0 {
        return Err(AppError::Conflict(format!(
            "station {id} still has orders awaiting assignment"
        )));
    }

    deadline(
        state.dispatch.store_timeout,
        "station removal",
        state.stations.remove(id),
    )
    .await?;
    info!(station_id = %id, "station removed");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct RestockRequest {
    pub fuel_type: FuelType,
    pub litres: f64,
}

async fn restock_station(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<RestockRequest>,
) -> Result<Json<Station>, AppError> {
    owned_station(&state, &identity, id).await?;

    let limit = state.dispatch.store_timeout;
    let litres = deadline(
        limit,
        "station restock",
        state.stations.restock(id, payload.fuel_type, payload.litres),
    )
    .await?;
    state
        .metrics
        .record_stock(&id.to_string(), payload.fuel_type, litres);

    let station = deadline(limit, "station lookup", state.stations.get(id)).await?;
    Ok(Json(station))
}

#[derive(Serialize)]
pub struct AwaitingOrders {
    pub standard: Vec<Order>,
    pub speed: Vec<Order>,
}

async fn list_awaiting_orders(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<AwaitingOrders>, AppError> {
    owned_station(&state, &identity, id).await?;

    let limit = state.dispatch.store_timeout;
    let standard = deadline_value(
        limit,
        "order listing",
        state.orders.awaiting_assignment(id, OrderKind::Standard),
    )
    .await?;
    let speed = deadline_value(
        limit,
        "order listing",
        state.orders.awaiting_assignment(id, OrderKind::Speed),
    )
    .await?;
    Ok(Json(AwaitingOrders { standard, speed }))
}

async fn request_approval(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    owned_station(&state, &identity, id).await?;
    deadline(
        state.dispatch.store_timeout,
        "approval request",
        state.platform.request_station_approval(id),
    )
    .await?;
    info!(station_id = %id, "station approval requested");
    Ok(StatusCode::ACCEPTED)
}

/// Owners see their own stations; admins see any.
async fn owned_station(
    state: &AppState,
    identity: &Identity,
    id: Uuid,
) -> Result<Station, AppError> {
    let station = deadline(
        state.dispatch.store_timeout,
        "station lookup",
        state.stations.get(id),
    )
    .await?;

    match identity.role {
        Role::Admin => Ok(station),
        Role::FuelStation if station.owner_id == identity.id => Ok(station),
        Role::FuelStation => Err(AppError::Forbidden(format!(
            "station {id} belongs to another account"
        ))),
        _ => Err(AppError::Forbidden(format!(
            "{} cannot manage stations",
            identity.role
        ))),
    }
}
