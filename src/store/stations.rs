use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{self, GeoError, GeoPoint, Nearby, NearestQuery};
use crate::models::order::OrderKind;
use crate::models::station::{FuelStock, FuelType, Station, StationProfile, StationStatus};

#[derive(Debug, Error, PartialEq)]
pub enum InventoryError {
    #[error("station {0} not found")]
    NotFound(Uuid),

    #[error("station {0} is not approved")]
    NotApproved(Uuid),

    #[error("station {station_id} holds {available} L of {fuel}, {requested} L requested")]
    InsufficientStock {
        station_id: Uuid,
        fuel: FuelType,
        available: f64,
        requested: f64,
    },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(f64),

    #[error("invalid {fuel} rate {rate} for station {station_id}")]
    InvalidRate {
        station_id: Uuid,
        fuel: FuelType,
        rate: f64,
    },
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound(_) => AppError::NotFound(err.to_string()),
            InventoryError::NotApproved(_) => AppError::Conflict(err.to_string()),
            InventoryError::InsufficientStock { .. } => AppError::InsufficientStock(err.to_string()),
            InventoryError::InvalidQuantity(_) | InventoryError::InvalidRate { .. } => {
                AppError::InvalidInput(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reservation {
    pub new_stock: f64,
    pub rate: f64,
}

#[derive(Debug, Clone)]
pub struct NewStation {
    pub owner_id: Uuid,
    pub profile: StationProfile,
    pub location: GeoPoint,
    pub petrol: FuelStock,
    pub diesel: FuelStock,
}

#[derive(Debug, Clone, Default)]
pub struct StationUpdate {
    pub profile: Option<StationProfile>,
    pub location: Option<GeoPoint>,
    pub petrol_rate: Option<f64>,
    pub diesel_rate: Option<f64>,
}

/// Sole owner of station stock. Every conditional mutation runs while the
/// station's map entry is write-locked, so check and update are one step.
#[derive(Default)]
pub struct StationInventory {
    stations: DashMap<Uuid, Station>,
}

impl StationInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub async fn register(&self, new: NewStation) -> Result<Station, InventoryError> {
        let id = Uuid::new_v4();
        for (fuel, stock) in [(FuelType::Petrol, &new.petrol), (FuelType::Diesel, &new.diesel)] {
            check_quantity(stock.litres, true)?;
            check_rate(id, fuel, stock.rate, false)?;
        }

        let now = Utc::now();
        let station = Station {
            id,
            owner_id: new.owner_id,
            profile: new.profile,
            location: new.location,
            status: StationStatus::Pending,
            petrol: new.petrol,
            diesel: new.diesel,
            pending_orders: 0,
            pending_speed_orders: 0,
            created_at: now,
            updated_at: now,
        };

        self.stations.insert(station.id, station.clone());
        Ok(station)
    }

    pub async fn get(&self, id: Uuid) -> Result<Station, InventoryError> {
        self.stations
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(InventoryError::NotFound(id))
    }

    pub async fn update(&self, id: Uuid, update: StationUpdate) -> Result<Station, InventoryError> {
        let mut station = self
            .stations
            .get_mut(&id)
            .ok_or(InventoryError::NotFound(id))?;

        let approved = station.is_approved();
        if let Some(rate) = update.petrol_rate {
            check_rate(id, FuelType::Petrol, rate, approved)?;
        }
        if let Some(rate) = update.diesel_rate {
            check_rate(id, FuelType::Diesel, rate, approved)?;
        }

        if let Some(profile) = update.profile {
            station.profile = profile;
        }
        if let Some(location) = update.location {
            station.location = location;
        }
        if let Some(rate) = update.petrol_rate {
            station.petrol.rate = rate;
        }
        if let Some(rate) = update.diesel_rate {
            station.diesel.rate = rate;
        }
        station.updated_at = Utc::now();

        Ok(station.clone())
    }

    pub async fn remove(&self, id: Uuid) -> Result<Station, InventoryError> {
        self.stations
            .remove(&id)
            .map(|(_, station)| station)
            .ok_or(InventoryError::NotFound(id))
    }

    pub async fn set_status(
        &self,
        id: Uuid,
        status: StationStatus,
    ) -> Result<Station, InventoryError> {
        let mut station = self
            .stations
            .get_mut(&id)
            .ok_or(InventoryError::NotFound(id))?;

        if status == StationStatus::Approved {
            check_rate(id, FuelType::Petrol, station.petrol.rate, true)?;
            check_rate(id, FuelType::Diesel, station.diesel.rate, true)?;
        }

        station.status = status;
        station.updated_at = Utc::now();
        Ok(station.clone())
    }

    /// Decrements stock only if the result stays non-negative.
    pub async fn reserve(
        &self,
        id: Uuid,
        fuel: FuelType,
        quantity: f64,
    ) -> Result<Reservation, InventoryError> {
        check_quantity(quantity, false)?;

        let mut station = self
            .stations
            .get_mut(&id)
            .ok_or(InventoryError::NotFound(id))?;

        if !station.is_approved() {
            return Err(InventoryError::NotApproved(id));
        }

        let stock = station.stock_mut(fuel);
        if stock.litres < quantity {
            return Err(InventoryError::InsufficientStock {
                station_id: id,
                fuel,
                available: stock.litres,
                requested: quantity,
            });
        }

        stock.litres -= quantity;
        let reservation = Reservation {
            new_stock: stock.litres,
            rate: stock.rate,
        };
        station.updated_at = Utc::now();

        Ok(reservation)
    }

    /// Returns previously reserved stock.
    pub async fn release(
        &self,
        id: Uuid,
        fuel: FuelType,
        quantity: f64,
    ) -> Result<f64, InventoryError> {
        self.add_stock(id, fuel, quantity).await
    }

    pub async fn restock(
        &self,
        id: Uuid,
        fuel: FuelType,
        quantity: f64,
    ) -> Result<f64, InventoryError> {
        self.add_stock(id, fuel, quantity).await
    }

    async fn add_stock(&self, id: Uuid, fuel: FuelType, quantity: f64) -> Result<f64, InventoryError> {
        check_quantity(quantity, false)?;

        let mut station = self
            .stations
            .get_mut(&id)
            .ok_or(InventoryError::NotFound(id))?;

        let stock = station.stock_mut(fuel);
        stock.litres += quantity;
        let new_stock = stock.litres;
        station.updated_at = Utc::now();

        Ok(new_stock)
    }

    pub async fn track_pending(
        &self,
        id: Uuid,
        kind: OrderKind,
        delta: i32,
    ) -> Result<(), InventoryError> {
        let mut station = self
            .stations
            .get_mut(&id)
            .ok_or(InventoryError::NotFound(id))?;

        let counter = match kind {
            OrderKind::Standard => &mut station.pending_orders,
            OrderKind::Speed => &mut station.pending_speed_orders,
        };
        *counter = counter.saturating_add_signed(delta);
        Ok(())
    }

    pub async fn owned_by(&self, owner_id: Uuid, name_filter: &str) -> Vec<Station> {
        let mut stations: Vec<Station> = self
            .stations
            .iter()
            .filter(|entry| entry.owner_id == owner_id && entry.matches_name(name_filter))
            .map(|entry| entry.value().clone())
            .collect();
        stations.sort_by(|a, b| a.profile.name.cmp(&b.profile.name));
        stations
    }

    /// GeoIndex query over a point-in-time snapshot of all stations.
    pub async fn nearest<F>(
        &self,
        origin: &GeoPoint,
        query: NearestQuery,
        filter: F,
    ) -> Result<Vec<Nearby<Station>>, GeoError>
    where
        F: Fn(&Station) -> bool,
    {
        let snapshot: Vec<Station> = self
            .stations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        geo::nearest(origin, snapshot, filter, query)
    }
}

fn check_quantity(quantity: f64, allow_zero: bool) -> Result<(), InventoryError> {
    let valid = quantity.is_finite() && (quantity > 0.0 || (allow_zero && quantity == 0.0));
    if valid {
        Ok(())
    } else {
        Err(InventoryError::InvalidQuantity(quantity))
    }
}

fn check_rate(
    station_id: Uuid,
    fuel: FuelType,
    rate: f64,
    must_be_positive: bool,
) -> Result<(), InventoryError> {
    let valid = rate.is_finite() && if must_be_positive { rate > 0.0 } else { rate >= 0.0 };
    if valid {
        Ok(())
    } else {
        Err(InventoryError::InvalidRate {
            station_id,
            fuel,
            rate,
        })
    }
}
