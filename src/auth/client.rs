//! Refresh endpoint client

use super::token::RefreshResponse;
use crate::config::AuthConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Refresh request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Refresh endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Refresh rejected: {0}")]
    Rejected(String),
}

/// Exchanges a refresh token for a new access token
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// JSON POST to the configured refresh endpoint
pub struct HttpRefreshClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRefreshClient {
    pub fn new(config: &AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: config.refresh_endpoint.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(RefreshError::Status { status, body });
        }

        let response: RefreshResponse = res.json().await?;
        if response.access_token.is_empty() {
            return Err(RefreshError::Rejected("empty access token".to_string()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(RefreshRequest { refresh_token: "rt" }).unwrap();
        assert_eq!(body, serde_json::json!({ "refreshToken": "rt" }));
    }

    #[test]
    fn test_client_uses_configured_endpoint() {
        let config = AuthConfig {
            refresh_endpoint: "https://auth.example.test/refresh".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(HttpRefreshClient::new(&config).endpoint(), "https://auth.example.test/refresh");
    }
}
