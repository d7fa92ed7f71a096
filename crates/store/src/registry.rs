//! Event-type registry: `(type_name, schema_version)` → JSON schema.
//!
//! Schemas are cached per instance; invalidation is process-lifetime only
//! (the registry table is authoritative on the next cold start). Payloads of
//! unregistered types are accepted as-is (permissive fallback).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::Value as JsonValue;

use keystone_core::{MdmError, MdmResult};

use crate::driver::Storage;
use crate::schema;
use crate::types::RegisteredEventType;

/// Cache entry: `None` records a confirmed miss so unregistered types stay
/// one lookup, not one query per append.
type CacheEntry = Option<Arc<RegisteredEventType>>;

pub struct EventTypeRegistry<S: Storage> {
    storage: Arc<S>,
    cache: RwLock<HashMap<(String, i32), CacheEntry>>,
}

impl<S: Storage> EventTypeRegistry<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert a schema for `(type_name, schema_version)`.
    ///
    /// The schema must itself be well-formed; otherwise this fails with a
    /// validation error carrying per-path details.
    pub async fn register(
        &self,
        type_name: &str,
        schema_version: i32,
        json_schema: JsonValue,
        description: Option<String>,
    ) -> MdmResult<RegisteredEventType> {
        if type_name.trim().is_empty() {
            return Err(MdmError::validation_field("type_name", "must not be empty"));
        }
        if schema_version < 1 {
            return Err(MdmError::validation_field("schema_version", "must be >= 1"));
        }
        if let Err(details) = schema::check_schema(&json_schema) {
            return Err(MdmError::schema("schema does not compile", details));
        }

        let registered = RegisteredEventType {
            type_name: type_name.to_string(),
            schema_version,
            json_schema,
            description,
            registered_at: Utc::now(),
        };

        let mut uow = self.storage.begin().await?;
        self.storage.upsert_event_type(&mut uow, &registered).await?;
        self.storage.commit(uow).await?;

        self.cache_put(registered.clone());
        tracing::info!(type_name, schema_version, "registered event type");
        Ok(registered)
    }

    pub async fn get_schema(
        &self,
        type_name: &str,
        schema_version: i32,
    ) -> MdmResult<Option<Arc<RegisteredEventType>>> {
        let key = (type_name.to_string(), schema_version);
        if let Ok(cache) = self.cache.read() {
            if let Some(entry) = cache.get(&key) {
                return Ok(entry.clone());
            }
        }

        let loaded = self
            .storage
            .event_type(type_name, schema_version)
            .await?
            .map(Arc::new);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, loaded.clone());
        }
        Ok(loaded)
    }

    /// Distinct registered type names, sorted.
    pub async fn list_types(&self) -> MdmResult<Vec<String>> {
        let mut names: Vec<String> = self
            .storage
            .event_types()
            .await?
            .into_iter()
            .map(|t| t.type_name)
            .collect();
        names.dedup();
        Ok(names)
    }

    /// All registered versions of one type, ascending.
    pub async fn list_versions(&self, type_name: &str) -> MdmResult<Vec<RegisteredEventType>> {
        Ok(self
            .storage
            .event_types()
            .await?
            .into_iter()
            .filter(|t| t.type_name == type_name)
            .collect())
    }

    /// Validate a payload. Returns `true` when no schema is registered for
    /// the pair (permissive); fails with per-path errors on mismatch.
    pub async fn validate(
        &self,
        type_name: &str,
        schema_version: i32,
        data: &JsonValue,
    ) -> MdmResult<bool> {
        let Some(registered) = self.get_schema(type_name, schema_version).await? else {
            return Ok(true);
        };

        let errors = schema::validate(&registered.json_schema, data);
        if errors.is_empty() {
            Ok(true)
        } else {
            Err(MdmError::schema(
                format!("payload does not match schema for {type_name} v{schema_version}"),
                errors,
            ))
        }
    }

    fn cache_put(&self, registered: RegisteredEventType) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                (registered.type_name.clone(), registered.schema_version),
                Some(Arc::new(registered)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStorage;
    use serde_json::json;

    fn registry() -> EventTypeRegistry<MemStorage> {
        EventTypeRegistry::new(Arc::new(MemStorage::new()))
    }

    #[tokio::test]
    async fn register_then_validate_round_trip() {
        let registry = registry();
        registry
            .register(
                "mdm.vendor.created",
                1,
                json!({ "type": "object", "required": ["name"] }),
                Some("vendor master record created".to_string()),
            )
            .await
            .unwrap();

        assert!(registry
            .validate("mdm.vendor.created", 1, &json!({ "name": "Acme" }))
            .await
            .unwrap());

        let err = registry
            .validate("mdm.vendor.created", 1, &json!({}))
            .await
            .unwrap_err();
        match err {
            MdmError::Validation { details, .. } => {
                assert!(details.iter().any(|d| d.contains("$.name")));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_type_is_permissive() {
        let registry = registry();
        assert!(registry
            .validate("mdm.unknown", 1, &json!({ "anything": true }))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn malformed_schema_is_rejected() {
        let registry = registry();
        let err = registry
            .register("mdm.vendor.created", 1, json!({ "type": "struct" }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MdmError::Validation { .. }));
    }

    #[tokio::test]
    async fn versions_are_listed_per_type() {
        let registry = registry();
        for version in [1, 2] {
            registry
                .register("mdm.item.created", version, json!({ "type": "object" }), None)
                .await
                .unwrap();
        }
        registry
            .register("mdm.vendor.created", 1, json!({ "type": "object" }), None)
            .await
            .unwrap();

        let types = registry.list_types().await.unwrap();
        assert_eq!(types, vec!["mdm.item.created", "mdm.vendor.created"]);

        let versions = registry.list_versions("mdm.item.created").await.unwrap();
        let versions: Vec<i32> = versions.iter().map(|v| v.schema_version).collect();
        assert_eq!(versions, vec![1, 2]);
    }
}
