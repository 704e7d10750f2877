//! Process-local store. Contents are lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deepsearch_core::error::StoreError;
use deepsearch_core::identity::{UserDirectory, UserIdentity};
use deepsearch_core::quota::{QuotaStore, RequestRecord};
use tokio::sync::RwLock;

/// In-memory users and request log, guarded by async locks.
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, UserIdentity>>,
    requests: RwLock<Vec<RequestRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with a fixed set of users.
    pub fn with_users(users: impl IntoIterator<Item = UserIdentity>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: RwLock::new(users),
            requests: RwLock::default(),
        }
    }

    /// Append a record with an explicit timestamp.
    pub async fn record_request_at(&self, user_id: &str, timestamp: DateTime<Utc>) -> RequestRecord {
        let record = RequestRecord {
            user_id: user_id.to_string(),
            timestamp,
        };
        self.requests.write().await.push(record.clone());
        record
    }

    /// Total records across all users.
    pub async fn request_count(&self) -> usize {
        self.requests.read().await.len()
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for InMemoryStore {
    async fn count_requests_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests
            .iter()
            .filter(|r| r.user_id == user_id && r.timestamp >= since)
            .count() as u64)
    }

    async fn record_request(&self, user_id: &str) -> Result<RequestRecord, StoreError> {
        Ok(self.record_request_at(user_id, Utc::now()).await)
    }
}
