//! Caller identity: who is making a chat request.
//!
//! Resolution is two-step: the [`IdentityProvider`] turns request headers
//! into a [`Session`], then the [`UserDirectory`] looks up the user record
//! behind it. A valid session without a user record is a distinct failure
//! (the account was removed after the session was issued).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// An authenticated user as seen by the access gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,

    /// Admins bypass the daily quota.
    #[serde(default)]
    pub is_admin: bool,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: true,
        }
    }
}

/// A resolved session: the user id the request claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
}

/// Authenticates inbound requests.
pub trait IdentityProvider: Send + Sync {
    /// Resolve the session carried by the request, if any.
    fn authenticate(&self, headers: &http::HeaderMap) -> Option<Session>;
}

/// Looks up user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserIdentity>, StoreError>;

    /// Insert `user`, or overwrite the admin flag of an existing record.
    async fn upsert_user(&self, user: &UserIdentity) -> Result<(), StoreError>;
}
