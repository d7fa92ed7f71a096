//! Cursor store for external consumers.
//!
//! The platform does not deliver events. Consumers poll the audit stream and
//! persist their resume position here.

use std::sync::Arc;

use chrono::Utc;

use keystone_core::{MdmError, MdmResult};

use crate::driver::Storage;
use crate::types::Subscription;

pub struct SubscriptionService<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> SubscriptionService<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Create or replace a subscriber's cursor registration.
    pub async fn register(
        &self,
        subscriber_id: &str,
        event_types: Vec<String>,
    ) -> MdmResult<Subscription> {
        if subscriber_id.trim().is_empty() {
            return Err(MdmError::validation_field("subscriber_id", "must not be empty"));
        }

        let existing = self.storage.subscription(subscriber_id).await?;
        let subscription = Subscription {
            subscriber_id: subscriber_id.to_string(),
            event_types,
            last_processed_seq: existing.map(|s| s.last_processed_seq).unwrap_or(0),
            updated_at: Utc::now(),
        };

        let mut uow = self.storage.begin().await?;
        self.storage.upsert_subscription(&mut uow, &subscription).await?;
        self.storage.commit(uow).await?;
        Ok(subscription)
    }

    /// Advance the cursor. Never moves backwards.
    pub async fn advance(&self, subscriber_id: &str, sequence: i64) -> MdmResult<Subscription> {
        let mut subscription = self
            .storage
            .subscription(subscriber_id)
            .await?
            .ok_or_else(|| MdmError::not_found("subscription", subscriber_id))?;

        if sequence > subscription.last_processed_seq {
            subscription.last_processed_seq = sequence;
            subscription.updated_at = Utc::now();
            let mut uow = self.storage.begin().await?;
            self.storage.upsert_subscription(&mut uow, &subscription).await?;
            self.storage.commit(uow).await?;
        }
        Ok(subscription)
    }

    pub async fn get(&self, subscriber_id: &str) -> MdmResult<Option<Subscription>> {
        self.storage.subscription(subscriber_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemStorage;

    #[tokio::test]
    async fn cursor_advances_monotonically() {
        let storage = Arc::new(MemStorage::new());
        let subscriptions = SubscriptionService::new(storage);

        subscriptions
            .register("warehouse-sync", vec!["mdm.item.created".to_string()])
            .await
            .unwrap();

        let sub = subscriptions.advance("warehouse-sync", 7).await.unwrap();
        assert_eq!(sub.last_processed_seq, 7);

        // A stale acknowledgement does not move the cursor back.
        let sub = subscriptions.advance("warehouse-sync", 3).await.unwrap();
        assert_eq!(sub.last_processed_seq, 7);
    }

    #[tokio::test]
    async fn re_registration_keeps_the_cursor() {
        let storage = Arc::new(MemStorage::new());
        let subscriptions = SubscriptionService::new(storage);

        subscriptions
            .register("warehouse-sync", vec!["mdm.item.created".to_string()])
            .await
            .unwrap();
        subscriptions.advance("warehouse-sync", 5).await.unwrap();

        let sub = subscriptions
            .register(
                "warehouse-sync",
                vec!["mdm.item.created".to_string(), "mdm.item.updated".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(sub.last_processed_seq, 5);
        assert_eq!(sub.event_types.len(), 2);
    }
}
