use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query, rejection::QueryRejection},
    routing::get,
};

use warden_auth::Permission;
use warden_idp::IdpActivationPredicates;

use crate::app::routes::permitted_input;
use crate::app::services::{AppServices, IdpList};
use crate::context::RequestContext;
use crate::error::ServiceError;

pub fn router() -> Router {
    Router::new().route("/login/idps", get(active_identity_providers))
}

/// `?linking_allowed=true&auto_creation=true` narrows the result.
pub async fn active_identity_providers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    predicates: Result<Query<IdpActivationPredicates>, QueryRejection>,
) -> Result<Json<IdpList>, ServiceError> {
    let scope = AppServices::org_scope(&ctx);
    let Query(predicates) = permitted_input(&services, &ctx, &Permission::POLICY_READ, scope, predicates)?;
    services.get_active_identity_providers(&ctx, predicates).map(Json)
}
