use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post},
};

use warden_auth::Permission;
use warden_grants::UserGrantId;
use warden_infra::projections::{UserGrantList, UserGrantQuery, UserGrantReadModel};

use crate::app::dto::{
    AddUserGrantBody, AddUserGrantResponse, BulkRemoveBody, DetailsResponse, GetUserGrantParams,
    UpdateUserGrantBody,
};
use crate::app::routes::permitted_input;
use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::error::ServiceError;

pub fn router() -> Router {
    Router::new()
        .route("/", post(add_user_grant))
        .route("/_search", post(list_user_grants))
        .route("/_bulk_delete", post(bulk_remove_user_grants))
        .route(
            "/:id",
            get(get_user_grant).put(update_user_grant).delete(remove_user_grant),
        )
        .route("/:id/_deactivate", post(deactivate_user_grant))
        .route("/:id/_reactivate", post(reactivate_user_grant))
}

fn parse_id(raw: &str) -> Result<UserGrantId, ServiceError> {
    Ok(raw.parse::<UserGrantId>()?)
}

/// Permission checked before any path or body error reaches the caller.
fn checked<T, E: Into<ServiceError>>(
    services: &AppServices,
    ctx: &RequestContext,
    action: &Permission,
    input: Result<T, E>,
) -> Result<T, ServiceError> {
    permitted_input(services, ctx, action, AppServices::org_scope(ctx), input)
}

pub async fn add_user_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<AddUserGrantBody>, JsonRejection>,
) -> Result<(StatusCode, Json<AddUserGrantResponse>), ServiceError> {
    let Json(body) = checked(&services, &ctx, &Permission::USER_GRANT_WRITE, body)?;
    let scope = body.fallback_scope(ctx.org_id());
    let request = permitted_input(&services, &ctx, &Permission::USER_GRANT_WRITE, scope, body.into_request())?;
    let (grant_id, details) = services.add_user_grant(&ctx, request)?;
    Ok((StatusCode::CREATED, Json(AddUserGrantResponse { grant_id, details })))
}

pub async fn list_user_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    query: Result<Json<UserGrantQuery>, JsonRejection>,
) -> Result<Json<UserGrantList>, ServiceError> {
    let Json(query) = checked(&services, &ctx, &Permission::USER_GRANT_READ, query)?;
    services.list_user_grants(&ctx, query).map(Json)
}

/// With `?min_sequence=N` the call waits (off the async runtime) until the
/// read view has caught up with a previous write.
pub async fn get_user_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    params: Result<Query<GetUserGrantParams>, QueryRejection>,
) -> Result<Json<UserGrantReadModel>, ServiceError> {
    let grant_id = checked(&services, &ctx, &Permission::USER_GRANT_READ, parse_id(&id))?;
    let Query(params) = checked(&services, &ctx, &Permission::USER_GRANT_READ, params)?;
    match params.min_sequence {
        None => services.get_user_grant_by_id(&ctx, grant_id).map(Json),
        Some(min_sequence) => {
            tokio::task::spawn_blocking(move || services.wait_for_user_grant(&ctx, grant_id, min_sequence))
                .await
                .map_err(|e| ServiceError::internal(format!("wait task failed: {e}")))?
                .map(Json)
        }
    }
}

pub async fn update_user_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Result<Json<UpdateUserGrantBody>, JsonRejection>,
) -> Result<Json<DetailsResponse>, ServiceError> {
    let grant_id = checked(&services, &ctx, &Permission::USER_GRANT_WRITE, parse_id(&id))?;
    let Json(body) = checked(&services, &ctx, &Permission::USER_GRANT_WRITE, body)?;
    let details = services.update_user_grant(&ctx, grant_id, body.role_keys, body.expected_sequence)?;
    Ok(Json(DetailsResponse { details }))
}

pub async fn deactivate_user_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<DetailsResponse>, ServiceError> {
    let grant_id = checked(&services, &ctx, &Permission::USER_GRANT_WRITE, parse_id(&id))?;
    let details = services.deactivate_user_grant(&ctx, grant_id)?;
    Ok(Json(DetailsResponse { details }))
}

pub async fn reactivate_user_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<DetailsResponse>, ServiceError> {
    let grant_id = checked(&services, &ctx, &Permission::USER_GRANT_WRITE, parse_id(&id))?;
    let details = services.reactivate_user_grant(&ctx, grant_id)?;
    Ok(Json(DetailsResponse { details }))
}

pub async fn remove_user_grant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<DetailsResponse>, ServiceError> {
    let grant_id = checked(&services, &ctx, &Permission::USER_GRANT_DELETE, parse_id(&id))?;
    let details = services.remove_user_grant(&ctx, grant_id)?;
    Ok(Json(DetailsResponse { details }))
}

pub async fn bulk_remove_user_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<BulkRemoveBody>, JsonRejection>,
) -> Result<StatusCode, ServiceError> {
    let Json(body) = checked(&services, &ctx, &Permission::USER_GRANT_DELETE, body)?;
    tokio::task::spawn_blocking(move || services.bulk_remove_user_grant(&ctx, body.grant_ids))
        .await
        .map_err(|e| ServiceError::internal(format!("bulk remove task failed: {e}")))??;
    Ok(StatusCode::NO_CONTENT)
}
