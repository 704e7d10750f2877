//! Admission control for chat requests.
//!
//! Every request is first authenticated with [`AccessGate::authenticate`].
//! Once its body is known to be usable, [`AccessGate::admit`] looks up the
//! user, enforces the per-day quota for non-admins, then appends exactly one
//! request record. Rejected requests record nothing. Admitted requests are
//! never refunded.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Local, NaiveTime, TimeDelta, TimeZone, Utc};
use deepsearch_config::SessionConfig;
use deepsearch_core::error::StoreError;
use deepsearch_core::identity::{IdentityProvider, Session, UserDirectory, UserIdentity};
use deepsearch_core::quota::QuotaStore;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no valid session")]
    Unauthenticated,

    #[error("session user has no record")]
    UserNotFound,

    #[error("daily limit of {limit} requests reached")]
    RateLimited { limit: u64 },

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl AccessError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated => "Unauthorized".into(),
            Self::UserNotFound => "User not found".into(),
            Self::RateLimited { limit } => {
                format!("Rate limit exceeded. You can make up to {limit} requests per day.")
            }
            Self::Store(_) => "Internal server error".into(),
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.public_message() })),
        )
            .into_response()
    }
}

/// Resolves `Authorization: Bearer <token>` against configured sessions.
#[derive(Default)]
pub struct BearerTokenIdentity {
    sessions: HashMap<String, String>,
}

impl BearerTokenIdentity {
    pub fn new(sessions: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            sessions: sessions.into_iter().collect(),
        }
    }

    pub fn from_config(sessions: &[SessionConfig]) -> Self {
        Self::new(
            sessions
                .iter()
                .map(|s| (s.token.clone(), s.user_id.clone())),
        )
    }
}

impl IdentityProvider for BearerTokenIdentity {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Session> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())?;

        self.sessions.get(token).map(|user_id| Session {
            user_id: user_id.clone(),
        })
    }
}

/// Local midnight of the day containing `now`, as a UTC instant.
///
/// When midnight does not exist locally (a DST jump at midnight) the first
/// valid instant of the day is used.
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let tz = now.timezone();
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + TimeDelta::hours(1)))
                .earliest()
        })
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}

pub struct AccessGate {
    identity: Arc<dyn IdentityProvider>,
    users: Arc<dyn UserDirectory>,
    quota: Arc<dyn QuotaStore>,
    daily_limit: u64,
}

impl AccessGate {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        users: Arc<dyn UserDirectory>,
        quota: Arc<dyn QuotaStore>,
        daily_limit: u64,
    ) -> Self {
        Self {
            identity,
            users,
            quota,
            daily_limit,
        }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    /// Resolve the caller's session. Touches neither users nor quota.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Session, AccessError> {
        self.identity.authenticate(headers).ok_or_else(|| {
            debug!("Rejected request without a valid session");
            AccessError::Unauthenticated
        })
    }

    pub async fn admit(&self, session: &Session) -> Result<UserIdentity, AccessError> {
        self.admit_at(session, Local::now()).await
    }

    /// Admit against the quota window containing `now`.
    pub async fn admit_at(
        &self,
        session: &Session,
        now: DateTime<Local>,
    ) -> Result<UserIdentity, AccessError> {
        let user = self
            .users
            .find_user(&session.user_id)
            .await
            .map_err(|e| store_failure(&session.user_id, e))?
            .ok_or_else(|| {
                warn!(user_id = %session.user_id, "Session refers to unknown user");
                AccessError::UserNotFound
            })?;

        if !user.is_admin {
            let since = start_of_day(&now);
            let used = self
                .quota
                .count_requests_since(&user.id, since)
                .await
                .map_err(|e| store_failure(&user.id, e))?;
            if used >= self.daily_limit {
                warn!(user_id = %user.id, used, limit = self.daily_limit, "Daily quota exhausted");
                return Err(AccessError::RateLimited {
                    limit: self.daily_limit,
                });
            }
        }

        self.quota
            .record_request(&user.id)
            .await
            .map_err(|e| store_failure(&user.id, e))?;
        info!(user_id = %user.id, admin = user.is_admin, "Request admitted");
        Ok(user)
    }
}

fn store_failure(user_id: &str, e: StoreError) -> AccessError {
    error!(user_id, error = %e, "Store failure during admission");
    AccessError::Store(e)
}
