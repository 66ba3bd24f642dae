use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    FuelStation,
    DeliveryPerson,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::FuelStation => "fuel_station",
            Role::DeliveryPerson => "delivery_person",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // The auth service historically emitted camelCase role names.
        match raw.trim() {
            "user" => Ok(Role::User),
            "fuel_station" | "fuelStation" => Ok(Role::FuelStation),
            "delivery_person" | "deliveryPerson" => Ok(Role::DeliveryPerson),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::Unauthorized(format!("unknown role: {other}"))),
        }
    }
}

/// An account already authenticated upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
}

impl Identity {
    pub fn require(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} cannot perform a {} action",
                self.role, role
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{Identity, Role};

    #[test]
    fn parses_snake_and_legacy_camel_case() {
        assert_eq!("fuel_station".parse::<Role>().unwrap(), Role::FuelStation);
        assert_eq!("fuelStation".parse::<Role>().unwrap(), Role::FuelStation);
        assert_eq!("deliveryPerson".parse::<Role>().unwrap(), Role::DeliveryPerson);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn require_rejects_other_roles() {
        let identity = Identity {
            id: Uuid::new_v4(),
            role: Role::User,
            name: "asha".to_string(),
        };

        assert!(identity.require(Role::User).is_ok());
        assert!(identity.require(Role::Admin).is_err());
    }
}
