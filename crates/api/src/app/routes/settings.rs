use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    routing::get,
};

use warden_auth::{Permission, ResourceScope};
use warden_core::ChangeDetails;
use warden_infra::projections::SecuritySettingsView;

use crate::app::dto::DetailsResponse;
use crate::app::routes::permitted_input;
use crate::app::services::{AppServices, SecuritySettingsUpdate};
use crate::context::RequestContext;
use crate::error::ServiceError;

pub fn router() -> Router {
    Router::new().route("/security", get(get_security_settings).put(set_security_settings))
}

pub async fn get_security_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<SecuritySettingsView>, ServiceError> {
    services.get_security_settings(&ctx).map(Json)
}

pub async fn set_security_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<SecuritySettingsUpdate>, JsonRejection>,
) -> Result<Json<DetailsResponse>, ServiceError> {
    let Json(body) =
        permitted_input(&services, &ctx, &Permission::IAM_POLICY_WRITE, ResourceScope::Instance, body)?;
    let details: ChangeDetails = services.set_security_settings(&ctx, body)?;
    Ok(Json(DetailsResponse { details }))
}
