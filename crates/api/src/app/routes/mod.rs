use axum::Router;

use warden_auth::{Permission, ResourceScope};

use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::error::ServiceError;

pub mod idps;
pub mod settings;
pub mod system;
pub mod user_grants;

/// Router for every authenticated endpoint.
pub fn router() -> Router {
    Router::new()
        .nest("/settings", settings::router().merge(idps::router()))
        .nest("/user-grants", user_grants::router())
}

/// Unwrap parsed request input. A parse failure is reported only to a caller
/// holding `action` at `scope`; anyone else gets the permission error.
pub(crate) fn permitted_input<T, E>(
    services: &AppServices,
    ctx: &RequestContext,
    action: &Permission,
    scope: ResourceScope,
    input: Result<T, E>,
) -> Result<T, ServiceError>
where
    E: Into<ServiceError>,
{
    match input {
        Ok(value) => Ok(value),
        Err(err) => {
            services.authorize(ctx, action, scope)?;
            Err(err.into())
        }
    }
}
