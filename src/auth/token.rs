//! Token record types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The stored credential. Times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub issued_at: i64,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Body returned by the refresh endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Present only when the server rotates the refresh credential
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenRecord {
    /// A record issued at `now_ms` and valid for `lifetime`
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        lifetime: Duration,
        scope: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: now_ms + lifetime_ms(lifetime),
            issued_at: now_ms,
            scope: scope.into(),
            token_type: default_token_type(),
            id_token: None,
        }
    }

    /// The record replacing `self` after a refresh. Keeps the current
    /// refresh token when the response does not rotate it.
    pub fn refreshed(&self, response: RefreshResponse, now_ms: i64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at: now_ms + lifetime_ms(Duration::from_secs(response.expires_in)),
            issued_at: now_ms,
            scope: response.scope,
            token_type: response.token_type,
            id_token: response.id_token,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.expires_at > self.issued_at && !self.access_token.is_empty()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    /// Still valid but expiring within `window`
    pub fn expires_within(&self, now_ms: i64, window: Duration) -> bool {
        !self.is_expired(now_ms) && self.expires_at <= now_ms + lifetime_ms(window)
    }
}

// at least 1ms so a record always expires after it was issued
fn lifetime_ms(lifetime: Duration) -> i64 {
    i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX / 2).max(1)
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
