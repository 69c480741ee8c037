use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Upper bound on any token lifetime (100 years).
pub const MAX_TTL_SECS: u64 = 100 * 365 * 86_400;

/// `ttl_secs` as a duration, or `None` when it is outside `1..=MAX_TTL_SECS`.
pub fn token_lifetime(ttl_secs: u64) -> Option<Duration> {
    if (1..=MAX_TTL_SECS).contains(&ttl_secs) {
        Some(Duration::seconds(ttl_secs as i64))
    } else {
        None
    }
}

/// Client/device metadata attached to an issued refresh token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub device: String,
    pub os: String,
    pub client_name: String,
}

/// One issued refresh token. The id doubles as the token's `jti`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshCredentialRecord {
    pub id: String,
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
    pub device: String,
    pub os: String,
    pub client_name: String,
    pub created_at: DateTime<Utc>,
}

impl RefreshCredentialRecord {
    /// Build a record valid for `ttl` from `now`. Obtain `ttl` from
    /// [`token_lifetime`] so `expires_at` stays strictly after `created_at`.
    pub fn new(
        account_id: impl Into<String>,
        ttl: Duration,
        device: &DeviceDescriptor,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            expires_at: now + ttl,
            device: device.device.clone(),
            os: device.os.clone(),
            client_name: device.client_name.clone(),
            created_at: now,
        }
    }
}
