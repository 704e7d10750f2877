//! Quota persistence contract.
//!
//! The store only counts and appends. Whether a count is over the limit is
//! the access gate's decision, and records are never updated or deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One admitted chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-user request accounting.
///
/// Each call is atomic on its own; callers do not lock across
/// `count_requests_since` and `record_request`.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Number of records for `user_id` with `timestamp >= since`.
    async fn count_requests_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Append a record for `user_id` stamped with the current time.
    async fn record_request(&self, user_id: &str) -> Result<RequestRecord, StoreError>;
}
