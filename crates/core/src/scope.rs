//! Tenancy boundary: tenant + legal entity.

use serde::{Deserialize, Serialize};

/// Identifier of a tenant (outer multi-tenant boundary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Legal entity within a tenant; every entity row and event is scoped to one.
///
/// Scoping is isolation, not authorization: a lookup under the wrong legal
/// entity reads as not-found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LegalEntity(String);

impl LegalEntity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fallback scope for tenant-less system intents only.
    pub fn fallback() -> Self {
        Self("default".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LegalEntity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Required tenancy boundary carried on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: TenantId,
    pub legal_entity: LegalEntity,
}

impl Scope {
    pub fn new(tenant_id: TenantId, legal_entity: LegalEntity) -> Self {
        Self {
            tenant_id,
            legal_entity,
        }
    }
}
