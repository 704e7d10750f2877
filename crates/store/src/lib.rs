//! Persistence for user records and quota accounting.
//!
//! Both backends implement [`UserDirectory`] and [`QuotaStore`] from
//! `deepsearch-core`; the gateway picks one from `[store]` configuration.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;

use deepsearch_config::{StoreBackend, StoreConfig, UserConfig};
use deepsearch_core::error::StoreError;
use deepsearch_core::identity::{UserDirectory, UserIdentity};
use deepsearch_core::quota::QuotaStore;
use tracing::info;

/// A backend that serves both user lookups and quota accounting.
pub trait Store: UserDirectory + QuotaStore {}

impl<T: UserDirectory + QuotaStore> Store for T {}

/// Open the configured backend and seed it with the configured users.
pub async fn open(config: &StoreConfig, users: &[UserConfig]) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite => Arc::new(SqliteStore::new(&config.path).await?),
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite => {
            return Err(StoreError::Storage(
                "sqlite backend requested but the `sqlite` feature is disabled".into(),
            ));
        }
    };

    for user in users {
        let identity = UserIdentity {
            id: user.id.clone(),
            is_admin: user.is_admin,
        };
        store.upsert_user(&identity).await?;
    }
    info!(backend = ?config.backend, users = users.len(), "Store ready");
    Ok(store)
}
