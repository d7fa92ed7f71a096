//! Token claims model and deterministic validation.
//!
//! Claims map 1:1 onto [`Actor`]. Signature verification is HS256 behind the
//! [`TokenValidator`] trait; when no signing key is configured the API layer
//! skips validation entirely and substitutes the development actor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keystone_core::{Actor, ActorType, LegalEntity};

/// Claims the platform expects once a bearer token has been decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub actor_type: ActorType,
    #[serde(default)]
    pub legal_entity: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn to_actor(&self) -> Actor {
        Actor {
            sub: self.sub.clone(),
            name: self.name.clone(),
            actor_type: self.actor_type,
            legal_entity: self.legal_entity.clone().map(LegalEntity::new),
            capabilities: self.capabilities.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing token")]
    Missing,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the claims' time window. Signature checks are
/// the validator's job; this runs after decoding.
pub fn validate_claims(claims: &Claims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenError::Expired);
    }
    Ok(())
}

/// Token validation seam; keeps the API layer decoupled from the token
/// library.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError>;
}

/// HS256 validator: signature verification plus deterministic claims checks.
#[derive(Debug, Clone)]
pub struct Hs256TokenValidator {
    secret: Vec<u8>,
}

impl Hs256TokenValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenValidator for Hs256TokenValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // exp/iat are validated deterministically below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let decoded = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "token rejected during decode");
            TokenError::Invalid(e.to_string())
        })?;

        if let Err(e) = validate_claims(&decoded.claims, now) {
            tracing::debug!(sub = %decoded.claims.sub, error = %e, "token claims rejected");
            return Err(e);
        }
        Ok(decoded.claims)
    }
}

/// The ambient actor used when auth is disabled (no signing key configured).
pub fn dev_actor(capabilities: Vec<String>) -> Actor {
    Actor {
        sub: "dev".to_string(),
        name: "Development".to_string(),
        actor_type: ActorType::Human,
        legal_entity: Some(LegalEntity::fallback()),
        capabilities,
    }
}
