//! Bearer-token authentication.
//!
//! Verifies an HS256 JWT, checks its time window and installs the
//! [`RequestContext`] (caller + deadline) for the handlers.

use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use tracing::debug;

use warden_auth::{AccessClaims, validate_claims};

use crate::context::RequestContext;

#[derive(Clone)]
pub struct AuthState {
    key: DecodingKey,
    validation: Validation,
    request_timeout: Duration,
}

impl AuthState {
    pub fn hs256(secret: &[u8], request_timeout: Duration) -> Self {
        // Timestamps live in `issued_at` / `expires_at` and are checked by
        // `validate_claims`, not by the registered `exp` claim.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            request_timeout,
        }
    }

    pub fn authenticate(&self, token: &str) -> Result<AccessClaims, StatusCode> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "rejected bearer token");
            StatusCode::UNAUTHORIZED
        })?;
        validate_claims(&data.claims, Utc::now()).map_err(|e| {
            debug!(error = %e, "bearer token outside its validity window");
            StatusCode::UNAUTHORIZED
        })?;
        Ok(data.claims)
    }
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;
    let claims = state.authenticate(token)?;

    let ctx = RequestContext::new(claims.into_caller()).with_timeout(state.request_timeout);
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
