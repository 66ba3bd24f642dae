use tracing::{error, info};
use uuid::Uuid;

use crate::engine::deadline;
use crate::error::AppError;
use crate::models::delivery_person::DeliveryPerson;
use crate::models::role::{Identity, Role};
use crate::models::station::{FuelType, Station, StationStatus};
use crate::state::AppState;
use crate::store::platform::FuelAmounts;

/// Approves a station and moves its opening supply out of the platform
/// reserve. The reserve is refunded if the station cannot take it.
pub async fn approve_station(
    state: &AppState,
    admin: &Identity,
    station_id: Uuid,
    supply: FuelAmounts,
) -> Result<Station, AppError> {
    admin.require(Role::Admin)?;
    let limit = state.dispatch.store_timeout;

    let station = deadline(limit, "station lookup", state.stations.get(station_id)).await?;
    if station.status == StationStatus::Approved {
        return Err(AppError::Conflict(format!(
            "station {station_id} is already approved"
        )));
    }

    for litres in [supply.petrol, supply.diesel] {
        if !(litres.is_finite() && litres >= 0.0) {
            return Err(AppError::InvalidInput(format!("invalid opening supply: {litres}")));
        }
    }
    let has_supply = supply.petrol > 0.0 || supply.diesel > 0.0;
    if has_supply {
        deadline(limit, "platform draw", state.platform.draw(supply)).await?;
    }

    match stock_and_approve(state, &station, supply).await {
        Ok(station) => {
            take_station_request(state, station_id).await;
            for fuel in [FuelType::Petrol, FuelType::Diesel] {
                state
                    .metrics
                    .record_stock(&station.id.to_string(), fuel, station.stock(fuel).litres);
            }
            info!(station_id = %station.id, petrol = supply.petrol, diesel = supply.diesel, "station approved");
            Ok(station)
        }
        Err(err) => {
            if has_supply {
                let refund =
                    deadline(limit, "platform refund", state.platform.give_back(supply)).await;
                if let Err(refund) = refund {
                    error!(station_id = %station_id, error = %refund, "opening supply not returned to platform");
                }
            }
            Err(err)
        }
    }
}

async fn stock_and_approve(
    state: &AppState,
    station: &Station,
    supply: FuelAmounts,
) -> Result<Station, AppError> {
    let limit = state.dispatch.store_timeout;

    // Rates are checked before any stock moves.
    deadline(
        limit,
        "station approval",
        state.stations.set_status(station.id, StationStatus::Approved),
    )
    .await?;

    let mut topped_up: Vec<(FuelType, f64)> = Vec::new();
    for (fuel, litres) in [(FuelType::Petrol, supply.petrol), (FuelType::Diesel, supply.diesel)] {
        if litres <= 0.0 {
            continue;
        }
        let restocked = deadline(
            limit,
            "station restock",
            state.stations.restock(station.id, fuel, litres),
        )
        .await;
        if let Err(err) = restocked {
            for (fuel, litres) in topped_up {
                if let Err(undo) = state.stations.reserve(station.id, fuel, litres).await {
                    error!(station_id = %station.id, error = %undo, "opening supply not taken back");
                }
            }
            if let Err(undo) = state.stations.set_status(station.id, station.status).await {
                error!(station_id = %station.id, error = %undo, "station status not restored");
            }
            return Err(err);
        }
        topped_up.push((fuel, litres));
    }

    deadline(limit, "station lookup", state.stations.get(station.id)).await
}

pub async fn reject_station(
    state: &AppState,
    admin: &Identity,
    station_id: Uuid,
) -> Result<Station, AppError> {
    admin.require(Role::Admin)?;
    let station = deadline(
        state.dispatch.store_timeout,
        "station rejection",
        state.stations.set_status(station_id, StationStatus::Rejected),
    )
    .await?;
    take_station_request(state, station_id).await;
    info!(station_id = %station_id, "station rejected");
    Ok(station)
}

/// Approval verifies the person; rejection clears verification so the
/// person drops out of dispatch.
pub async fn review_delivery_person(
    state: &AppState,
    admin: &Identity,
    person_id: Uuid,
    approve: bool,
) -> Result<DeliveryPerson, AppError> {
    admin.require(Role::Admin)?;
    let limit = state.dispatch.store_timeout;

    let person = deadline(
        limit,
        "delivery person verification",
        state.couriers.set_verified(person_id, approve),
    )
    .await?;
    if let Err(err) = deadline(
        limit,
        "approval queue",
        state.platform.take_delivery_request(person_id),
    )
    .await
    {
        info!(delivery_person_id = %person_id, error = %err, "no queued verification request");
    }

    info!(delivery_person_id = %person_id, approved = approve, "delivery person reviewed");
    Ok(person)
}

async fn take_station_request(state: &AppState, station_id: Uuid) {
    if let Err(err) = deadline(
        state.dispatch.store_timeout,
        "approval queue",
        state.platform.take_station_request(station_id),
    )
    .await
    {
        info!(station_id = %station_id, error = %err, "no queued approval request");
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{approve_station, reject_station, review_delivery_person};
    use crate::config::DispatchConfig;
    use crate::error::AppError;
    use crate::geo::GeoPoint;
    use crate::models::delivery_person::DeliveryProfile;
    use crate::models::role::{Identity, Role};
    use crate::models::station::{FuelStock, FuelType, StationProfile, StationStatus};
    use crate::state::AppState;
    use crate::store::delivery::NewDeliveryPerson;
    use crate::store::platform::FuelAmounts;
    use crate::store::stations::NewStation;

    fn admin() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            role: Role::Admin,
            name: "ops".to_string(),
        }
    }

    async fn pending_station(state: &AppState, petrol_rate: f64) -> Uuid {
        state
            .stations
            .register(NewStation {
                owner_id: Uuid::new_v4(),
                profile: StationProfile {
                    name: "Indiranagar Fuels".to_string(),
                    contact: "919800000030".to_string(),
                    address: "100 Feet Road".to_string(),
                    area: Some("Indiranagar".to_string()),
                    city: "Bengaluru".to_string(),
                    pincode: Some("560038".to_string()),
                    open_time: "06:00".to_string(),
                    close_time: "22:00".to_string(),
                },
                location: GeoPoint {
                    lat: 12.97,
                    lng: 77.64,
                },
                petrol: FuelStock {
                    litres: 0.0,
                    rate: petrol_rate,
                },
                diesel: FuelStock {
                    litres: 0.0,
                    rate: 92.0,
                },
            })
            .await
            .unwrap()
            .id
    }

    async fn initialised(state: &AppState, admin: &Identity) {
        state
            .platform
            .initialize(
                admin.id,
                FuelAmounts {
                    petrol: 1_000.0,
                    diesel: 500.0,
                },
                FuelAmounts {
                    petrol: 96.0,
                    diesel: 88.0,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn approval_moves_opening_supply_from_platform() {
        let (state, _rx) = AppState::new(DispatchConfig::default(), 8, 8);
        let admin = admin();
        initialised(&state, &admin).await;
        let station_id = pending_station(&state, 100.0).await;
        state.platform.request_station_approval(station_id).await.unwrap();

        let station = approve_station(
            &state,
            &admin,
            station_id,
            FuelAmounts {
                petrol: 200.0,
                diesel: 0.0,
            },
        )
        .await
        .unwrap();

        assert_eq!(station.status, StationStatus::Approved);
        assert_eq!(station.stock(FuelType::Petrol).litres, 200.0);
        let platform = state.platform.snapshot().await.unwrap();
        assert_eq!(platform.petrol.litres, 800.0);
        assert_eq!(platform.diesel.litres, 500.0);
        assert!(platform.station_requests.is_empty());
    }

    #[tokio::test]
    async fn failed_approval_refunds_the_platform() {
        let (state, _rx) = AppState::new(DispatchConfig::default(), 8, 8);
        let admin = admin();
        initialised(&state, &admin).await;
        let station_id = pending_station(&state, 0.0).await;

        let err = approve_station(
            &state,
            &admin,
            station_id,
            FuelAmounts {
                petrol: 200.0,
                diesel: 50.0,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidInput(_)));
        let platform = state.platform.snapshot().await.unwrap();
        assert_eq!(platform.petrol.litres, 1_000.0);
        assert_eq!(platform.diesel.litres, 500.0);
        let station = state.stations.get(station_id).await.unwrap();
        assert_eq!(station.status, StationStatus::Pending);
        assert_eq!(station.stock(FuelType::Petrol).litres, 0.0);
    }

    #[tokio::test]
    async fn only_admins_review() {
        let (state, _rx) = AppState::new(DispatchConfig::default(), 8, 8);
        let station_id = pending_station(&state, 100.0).await;
        let owner = Identity {
            id: Uuid::new_v4(),
            role: Role::FuelStation,
            name: "owner".to_string(),
        };

        let err = reject_station(&state, &owner, station_id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let rejected = reject_station(&state, &admin(), station_id).await.unwrap();
        assert_eq!(rejected.status, StationStatus::Rejected);
    }

    #[tokio::test]
    async fn verification_toggles_dispatch_eligibility() {
        let (state, _rx) = AppState::new(DispatchConfig::default(), 8, 8);
        let person = state
            .couriers
            .register(NewDeliveryPerson {
                owner_id: Uuid::new_v4(),
                profile: DeliveryProfile {
                    name: "Arjun".to_string(),
                    contact: "919800000040".to_string(),
                    city: "Bengaluru".to_string(),
                    address: "HSR Layout".to_string(),
                    pincode: None,
                },
                location: GeoPoint {
                    lat: 12.91,
                    lng: 77.64,
                },
            })
            .await
            .unwrap();
        let admin = admin();

        let approved = review_delivery_person(&state, &admin, person.id, true)
            .await
            .unwrap();
        assert!(approved.is_dispatchable());

        let rejected = review_delivery_person(&state, &admin, person.id, false)
            .await
            .unwrap();
        assert!(!rejected.is_dispatchable());
    }
}
