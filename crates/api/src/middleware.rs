//! Bearer-token middleware.
//!
//! Claims map onto the request's [`ActorContext`]. When no signing key is
//! configured the platform runs with auth disabled (development mode) and
//! every request acts as the development actor.

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use keystone_auth::{Hs256TokenValidator, TokenValidator};
use keystone_core::{Actor, MdmError};

use crate::context::ActorContext;
use crate::errors;

#[derive(Clone)]
pub enum AuthMode {
    /// No signing key configured; every request acts as this actor.
    Disabled { actor: Actor },
    Hs256(Arc<Hs256TokenValidator>),
}

#[derive(Clone)]
pub struct AuthState {
    pub mode: AuthMode,
}

impl AuthState {
    /// Build from an optional `JWT_SECRET`.
    pub fn from_secret(secret: Option<String>, dev_capabilities: Vec<String>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Self {
                mode: AuthMode::Hs256(Arc::new(Hs256TokenValidator::new(secret.into_bytes()))),
            },
            _ => {
                tracing::warn!("JWT_SECRET not set; authentication disabled (development mode)");
                Self {
                    mode: AuthMode::Disabled {
                        actor: keystone_auth::dev_actor(dev_capabilities),
                    },
                }
            }
        }
    }
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let actor = match &state.mode {
        AuthMode::Disabled { actor } => actor.clone(),
        AuthMode::Hs256(validator) => {
            let token = extract_bearer(req.headers())
                .ok_or_else(|| errors::error_response(MdmError::Authentication))?;
            let claims = validator
                .validate(token, Utc::now())
                .map_err(|_| errors::error_response(MdmError::Authentication))?;
            claims.to_actor()
        }
    };

    req.extensions_mut().insert(ActorContext::new(actor));
    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
