use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::role::{Identity, Role};

pub const IDENTITY_ID_HEADER: &str = "x-identity-id";
pub const IDENTITY_ROLE_HEADER: &str = "x-identity-role";
pub const IDENTITY_NAME_HEADER: &str = "x-identity-name";

/// The auth gateway in front of this service has already verified the
/// caller and forwards who they are in these headers.
#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, IDENTITY_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|err| AppError::Unauthorized(format!("malformed {IDENTITY_ID_HEADER}: {err}")))?;
        let role = header(parts, IDENTITY_ROLE_HEADER)?.parse::<Role>()?;
        let name = header(parts, IDENTITY_NAME_HEADER)
            .map(str::to_string)
            .unwrap_or_default();

        Ok(Identity { id, role, name })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(format!("{name} is not valid text")))
}
