use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{self, GeoError, GeoPoint, Nearby, NearestQuery};
use crate::models::delivery_person::{DeliveryPerson, DeliveryProfile, DeliveryStatus};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("delivery person {0} not found")]
    NotFound(Uuid),

    #[error("account {0} already has a delivery profile")]
    DuplicateProfile(Uuid),

    #[error("delivery person {person_id} is {status:?}, not available")]
    AlreadyClaimed {
        person_id: Uuid,
        status: DeliveryStatus,
    },

    #[error("delivery person {0} is not verified")]
    NotVerified(Uuid),

    #[error("delivery person {person_id} cannot move from {from:?} to {to:?}")]
    InvalidState {
        person_id: Uuid,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => AppError::NotFound(err.to_string()),
            RegistryError::DuplicateProfile(_) => AppError::Conflict(err.to_string()),
            RegistryError::AlreadyClaimed { .. } | RegistryError::NotVerified(_) => {
                AppError::AlreadyClaimed(err.to_string())
            }
            RegistryError::InvalidState { .. } => AppError::InvalidTransition(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewDeliveryPerson {
    pub owner_id: Uuid,
    pub profile: DeliveryProfile,
    pub location: GeoPoint,
}

#[derive(Default)]
pub struct DeliveryPersonRegistry {
    persons: DashMap<Uuid, DeliveryPerson>,
    by_owner: DashMap<Uuid, Uuid>,
}

impl DeliveryPersonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub async fn register(&self, new: NewDeliveryPerson) -> Result<DeliveryPerson, RegistryError> {
        let slot = match self.by_owner.entry(new.owner_id) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateProfile(new.owner_id)),
            Entry::Vacant(slot) => slot,
        };

        let now = Utc::now();
        let person = DeliveryPerson {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            profile: new.profile,
            location: new.location,
            is_verified: false,
            status: DeliveryStatus::Available,
            current_order: None,
            created_at: now,
            updated_at: now,
        };

        self.persons.insert(person.id, person.clone());
        slot.insert(person.id);
        Ok(person)
    }

    pub async fn get(&self, id: Uuid) -> Result<DeliveryPerson, RegistryError> {
        self.persons
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RegistryError::NotFound(id))
    }

    pub async fn by_owner(&self, owner_id: Uuid) -> Result<DeliveryPerson, RegistryError> {
        let id = self
            .by_owner
            .get(&owner_id)
            .map(|entry| *entry.value())
            .ok_or(RegistryError::NotFound(owner_id))?;
        self.get(id).await
    }

    pub async fn update_profile(
        &self,
        id: Uuid,
        profile: DeliveryProfile,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            person.profile = profile;
            Ok(())
        })
    }

    pub async fn update_location(
        &self,
        id: Uuid,
        location: GeoPoint,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            person.location = location;
            Ok(())
        })
    }

    pub async fn set_verified(
        &self,
        id: Uuid,
        verified: bool,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            person.is_verified = verified;
            Ok(())
        })
    }

    /// Self-service availability. Persons bound to an order stay bound
    /// until the order releases them.
    pub async fn set_availability(
        &self,
        id: Uuid,
        status: DeliveryStatus,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            if person.status.is_engaged() || status.is_engaged() {
                return Err(RegistryError::InvalidState {
                    person_id: person.id,
                    from: person.status,
                    to: status,
                });
            }
            person.status = status;
            Ok(())
        })
    }

    /// `available -> assigned`, exclusive under concurrent attempts.
    pub async fn try_claim(
        &self,
        id: Uuid,
        order_id: Uuid,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            if !person.is_verified {
                return Err(RegistryError::NotVerified(person.id));
            }
            if person.status != DeliveryStatus::Available {
                return Err(RegistryError::AlreadyClaimed {
                    person_id: person.id,
                    status: person.status,
                });
            }
            person.status = DeliveryStatus::Assigned;
            person.current_order = Some(order_id);
            Ok(())
        })
    }

    /// `assigned -> out_for_delivery` for the order holding the claim.
    pub async fn mark_out_for_delivery(
        &self,
        id: Uuid,
        order_id: Uuid,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            if person.status != DeliveryStatus::Assigned || person.current_order != Some(order_id)
            {
                return Err(RegistryError::InvalidState {
                    person_id: person.id,
                    from: person.status,
                    to: DeliveryStatus::OutForDelivery,
                });
            }
            person.status = DeliveryStatus::OutForDelivery;
            Ok(())
        })
    }

    /// Back to `available` if `order_id` still holds the claim; otherwise
    /// a no-op, so compensations can be retried safely.
    pub async fn release(
        &self,
        id: Uuid,
        order_id: Uuid,
    ) -> Result<DeliveryPerson, RegistryError> {
        self.modify(id, |person| {
            if person.current_order == Some(order_id) {
                person.status = DeliveryStatus::Available;
                person.current_order = None;
            }
            Ok(())
        })
    }

    pub async fn verified(&self) -> Vec<DeliveryPerson> {
        let mut persons: Vec<DeliveryPerson> = self
            .persons
            .iter()
            .filter(|entry| entry.is_verified)
            .map(|entry| entry.value().clone())
            .collect();
        persons.sort_by(|a, b| a.profile.name.cmp(&b.profile.name).then(a.id.cmp(&b.id)));
        persons
    }

    /// GeoIndex query over a point-in-time snapshot of all persons.
    pub async fn nearest<F>(
        &self,
        origin: &GeoPoint,
        query: NearestQuery,
        filter: F,
    ) -> Result<Vec<Nearby<DeliveryPerson>>, GeoError>
    where
        F: Fn(&DeliveryPerson) -> bool,
    {
        let snapshot: Vec<DeliveryPerson> = self
            .persons
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        geo::nearest(origin, snapshot, filter, query)
    }

    fn modify<F>(&self, id: Uuid, apply: F) -> Result<DeliveryPerson, RegistryError>
    where
        F: FnOnce(&mut DeliveryPerson) -> Result<(), RegistryError>,
    {
        let mut person = self
            .persons
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        apply(person.value_mut())?;
        person.updated_at = Utc::now();
        Ok(person.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{DeliveryPersonRegistry, NewDeliveryPerson, RegistryError};
    use crate::geo::GeoPoint;
    use crate::models::delivery_person::{DeliveryProfile, DeliveryStatus};

    fn new_person(owner_id: Uuid) -> NewDeliveryPerson {
        NewDeliveryPerson {
            owner_id,
            profile: DeliveryProfile {
                name: "Ravi".to_string(),
                contact: "919800000002".to_string(),
                city: "Bengaluru".to_string(),
                address: "HSR Layout".to_string(),
                pincode: Some("560102".to_string()),
            },
            location: GeoPoint {
                lat: 12.91,
                lng: 77.64,
            },
        }
    }

    async fn verified_person(registry: &DeliveryPersonRegistry) -> Uuid {
        let person = registry.register(new_person(Uuid::new_v4())).await.unwrap();
        registry.set_verified(person.id, true).await.unwrap();
        person.id
    }

    #[tokio::test]
    async fn one_profile_per_account() {
        let registry = DeliveryPersonRegistry::new();
        let owner = Uuid::new_v4();

        registry.register(new_person(owner)).await.unwrap();
        let err = registry.register(new_person(owner)).await.unwrap_err();

        assert_eq!(err, RegistryError::DuplicateProfile(owner));
    }

    #[tokio::test]
    async fn unverified_persons_cannot_be_claimed() {
        let registry = DeliveryPersonRegistry::new();
        let person = registry.register(new_person(Uuid::new_v4())).await.unwrap();

        let err = registry.try_claim(person.id, Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err, RegistryError::NotVerified(person.id));
    }

    #[tokio::test]
    async fn claim_then_release_round_trips_to_available() {
        let registry = DeliveryPersonRegistry::new();
        let id = verified_person(&registry).await;
        let order = Uuid::new_v4();

        let claimed = registry.try_claim(id, order).await.unwrap();
        assert_eq!(claimed.status, DeliveryStatus::Assigned);

        let err = registry.try_claim(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyClaimed { .. }));

        let released = registry.release(id, order).await.unwrap();
        assert_eq!(released.status, DeliveryStatus::Available);
        assert_eq!(released.current_order, None);
    }

    #[tokio::test]
    async fn release_by_another_order_is_a_no_op() {
        let registry = DeliveryPersonRegistry::new();
        let id = verified_person(&registry).await;
        let order = Uuid::new_v4();

        registry.try_claim(id, order).await.unwrap();
        let person = registry.release(id, Uuid::new_v4()).await.unwrap();

        assert_eq!(person.status, DeliveryStatus::Assigned);
        assert_eq!(person.current_order, Some(order));
    }

    #[tokio::test]
    async fn engaged_person_cannot_go_offline() {
        let registry = DeliveryPersonRegistry::new();
        let id = verified_person(&registry).await;
        let order = Uuid::new_v4();

        registry.try_claim(id, order).await.unwrap();
        registry.mark_out_for_delivery(id, order).await.unwrap();
        let err = registry
            .set_availability(id, DeliveryStatus::Offline)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::InvalidState { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_one_winner() {
        let registry = Arc::new(DeliveryPersonRegistry::new());
        let id = verified_person(&registry).await;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.try_claim(id, Uuid::new_v4()).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }
}
