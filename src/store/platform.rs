use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::platform::{FuelReserve, PlatformSnapshot};
use crate::models::station::FuelType;

#[derive(Debug, Error, PartialEq)]
pub enum PlatformError {
    #[error("platform settings have not been initialised")]
    NotInitialized,

    #[error("platform settings already initialised by admin {0}")]
    AlreadyInitialized(Uuid),

    #[error("platform holds {available} L of {fuel}, {requested} L requested")]
    InsufficientReserve {
        fuel: FuelType,
        available: f64,
        requested: f64,
    },

    #[error("approval for {0} already requested")]
    DuplicateRequest(Uuid),

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
}

impl From<PlatformError> for AppError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotInitialized => AppError::NotFound(err.to_string()),
            PlatformError::AlreadyInitialized(_) | PlatformError::DuplicateRequest(_) => {
                AppError::Conflict(err.to_string())
            }
            PlatformError::InsufficientReserve { .. } => {
                AppError::InsufficientStock(err.to_string())
            }
            PlatformError::InvalidAmount(_) => AppError::InvalidInput(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FuelAmounts {
    pub petrol: f64,
    pub diesel: f64,
}

impl FuelAmounts {
    fn validate(&self) -> Result<(), PlatformError> {
        for amount in [self.petrol, self.diesel] {
            if !(amount.is_finite() && amount >= 0.0) {
                return Err(PlatformError::InvalidAmount(amount));
            }
        }
        Ok(())
    }

    fn get(&self, fuel: FuelType) -> f64 {
        match fuel {
            FuelType::Petrol => self.petrol,
            FuelType::Diesel => self.diesel,
        }
    }
}

const FUELS: [FuelType; 2] = [FuelType::Petrol, FuelType::Diesel];

/// The platform aggregate. Writers serialise on the lock, so each command
/// sees and replaces a consistent snapshot.
#[derive(Default)]
pub struct PlatformSettings {
    state: RwLock<Option<PlatformSnapshot>>,
}

impl PlatformSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn initialize(
        &self,
        admin_id: Uuid,
        stock: FuelAmounts,
        rates: FuelAmounts,
    ) -> Result<PlatformSnapshot, PlatformError> {
        stock.validate()?;
        rates.validate()?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.as_ref() {
            return Err(PlatformError::AlreadyInitialized(existing.admin_id));
        }

        let snapshot = PlatformSnapshot {
            admin_id,
            petrol: FuelReserve {
                litres: stock.petrol,
                rate: rates.petrol,
            },
            diesel: FuelReserve {
                litres: stock.diesel,
                rate: rates.diesel,
            },
            station_requests: Vec::new(),
            delivery_requests: Vec::new(),
            updated_at: Utc::now(),
        };
        *state = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn snapshot(&self) -> Result<PlatformSnapshot, PlatformError> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(PlatformError::NotInitialized)
    }

    /// Adds `added` to the reserves and replaces the rates.
    pub async fn restock(
        &self,
        added: FuelAmounts,
        rates: FuelAmounts,
    ) -> Result<PlatformSnapshot, PlatformError> {
        added.validate()?;
        rates.validate()?;

        self.write(|snapshot| {
            for fuel in FUELS {
                let reserve = snapshot.reserve_mut(fuel);
                reserve.litres += added.get(fuel);
                reserve.rate = rates.get(fuel);
            }
            Ok(())
        })
        .await
    }

    /// Takes both amounts from the reserves or neither.
    pub async fn draw(&self, amounts: FuelAmounts) -> Result<PlatformSnapshot, PlatformError> {
        amounts.validate()?;

        self.write(|snapshot| {
            for fuel in FUELS {
                let available = snapshot.reserve(fuel).litres;
                let requested = amounts.get(fuel);
                if available < requested {
                    return Err(PlatformError::InsufficientReserve {
                        fuel,
                        available,
                        requested,
                    });
                }
            }
            for fuel in FUELS {
                snapshot.reserve_mut(fuel).litres -= amounts.get(fuel);
            }
            Ok(())
        })
        .await
    }

    pub async fn give_back(&self, amounts: FuelAmounts) -> Result<PlatformSnapshot, PlatformError> {
        amounts.validate()?;

        self.write(|snapshot| {
            for fuel in FUELS {
                snapshot.reserve_mut(fuel).litres += amounts.get(fuel);
            }
            Ok(())
        })
        .await
    }

    pub async fn request_station_approval(&self, station_id: Uuid) -> Result<(), PlatformError> {
        self.write(|snapshot| push_unique(&mut snapshot.station_requests, station_id))
            .await
            .map(|_| ())
    }

    pub async fn request_delivery_approval(&self, person_id: Uuid) -> Result<(), PlatformError> {
        self.write(|snapshot| push_unique(&mut snapshot.delivery_requests, person_id))
            .await
            .map(|_| ())
    }

    /// Drops a station from the queue; `false` if it was not queued.
    pub async fn take_station_request(&self, station_id: Uuid) -> Result<bool, PlatformError> {
        let mut removed = false;
        self.write(|snapshot| {
            removed = remove_id(&mut snapshot.station_requests, station_id);
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    pub async fn take_delivery_request(&self, person_id: Uuid) -> Result<bool, PlatformError> {
        let mut removed = false;
        self.write(|snapshot| {
            removed = remove_id(&mut snapshot.delivery_requests, person_id);
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    async fn write<F>(&self, apply: F) -> Result<PlatformSnapshot, PlatformError>
    where
        F: FnOnce(&mut PlatformSnapshot) -> Result<(), PlatformError>,
    {
        let mut state = self.state.write().await;
        let snapshot = state.as_mut().ok_or(PlatformError::NotInitialized)?;
        apply(snapshot)?;
        snapshot.updated_at = Utc::now();
        Ok(snapshot.clone())
    }
}

fn push_unique(queue: &mut Vec<Uuid>, id: Uuid) -> Result<(), PlatformError> {
    if queue.contains(&id) {
        return Err(PlatformError::DuplicateRequest(id));
    }
    queue.push(id);
    Ok(())
}

fn remove_id(queue: &mut Vec<Uuid>, id: Uuid) -> bool {
    let before = queue.len();
    queue.retain(|queued| *queued != id);
    queue.len() != before
}
