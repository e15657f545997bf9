//! Token coordinator
//!
//! Serves a valid bearer token to any number of concurrent callers. At most
//! one refresh runs at a time: the first caller spawns it and stores a shared
//! handle; everyone arriving while it runs awaits that same handle. The
//! handle is cleared when the refresh settles, whatever the outcome.

use super::client::RefreshClient;
use super::token::{now_ms, TokenRecord};
use crate::config::AuthConfig;
use crate::storage::KeyValueStore;
use crate::utils::{AppError, AppResult};
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What listeners hear when a refresh settles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Carries the new access token
    Refreshed(String),
    /// Credentials were cleared
    Failed,
}

impl RefreshOutcome {
    pub fn success(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed(_))
    }
}

type Listener = Arc<dyn Fn(&RefreshOutcome) + Send + Sync>;
type PendingRefresh = Shared<oneshot::Receiver<Result<TokenRecord, String>>>;

struct Inner {
    store: Arc<dyn KeyValueStore>,
    client: Arc<dyn RefreshClient>,
    config: AuthConfig,
    /// Serializes writes to the stored record
    writes: Mutex<()>,
    inflight: Mutex<Option<PendingRefresh>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
    disposed: AtomicBool,
}

impl Inner {
    fn load(&self) -> AppResult<Option<TokenRecord>> {
        let Some(raw) = self.store.get(&self.config.storage_key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<TokenRecord>(&raw) {
            Ok(record) if record.is_well_formed() => Ok(Some(record)),
            Ok(_) | Err(_) => {
                tracing::warn!("Discarding unreadable token record");
                self.store.remove(&self.config.storage_key)?;
                Ok(None)
            }
        }
    }

    fn save(&self, record: &TokenRecord) -> AppResult<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set(&self.config.storage_key, &raw)
    }

    fn clear(&self) {
        if let Err(e) = self.store.remove(&self.config.storage_key) {
            tracing::error!("Failed to clear stored credentials: {}", e);
        }
    }

    fn notify(&self, outcome: &RefreshOutcome) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            // a panicking listener must not take the refresh driver down with it
            if panic::catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
                tracing::error!("Refresh listener panicked");
            }
        }
    }

    /// Refresh the stored record. A failure has already cleared the
    /// credentials it was about, and only those.
    async fn exchange(&self) -> Result<Exchanged, String> {
        let previous = self
            .load()
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "no stored credentials".to_string())?;
        let Some(refresh_token) = previous.refresh_token.clone() else {
            return self.fail(&previous, "no refresh token".to_string());
        };

        tracing::info!("Refreshing access token");
        let timeout = std::time::Duration::from_secs(self.config.request_timeout_secs.max(1));
        let response = tokio::time::timeout(timeout, self.client.refresh(&refresh_token))
            .await
            .map_err(|_| "refresh request timed out".to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        // a disconnect or a new sign-in while the request was out wins over its result
        let _writes = self.writes.lock();
        match self.load().map_err(|e| e.to_string())? {
            None => Err("credentials cleared during refresh".to_string()),
            Some(current) if current != previous => Ok(Exchanged::Superseded(current)),
            Some(_) => match response {
                Ok(response) => {
                    let record = previous.refreshed(response, now_ms());
                    self.save(&record).map_err(|e| e.to_string())?;
                    Ok(Exchanged::Refreshed(record))
                }
                Err(reason) => {
                    self.clear();
                    Err(reason)
                }
            },
        }
    }

    fn fail(&self, previous: &TokenRecord, reason: String) -> Result<Exchanged, String> {
        let _writes = self.writes.lock();
        match self.load().map_err(|e| e.to_string())? {
            Some(current) if current != *previous => Ok(Exchanged::Superseded(current)),
            _ => {
                self.clear();
                Err(reason)
            }
        }
    }
}

enum Exchanged {
    Refreshed(TokenRecord),
    /// The stored record was replaced while the request was out; the
    /// response belongs to the old credentials and is dropped.
    Superseded(TokenRecord),
}

async fn drive_refresh(inner: Arc<Inner>, tx: oneshot::Sender<Result<TokenRecord, String>>) {
    let result = match inner.exchange().await {
        Ok(Exchanged::Refreshed(record)) => {
            tracing::info!("Access token refreshed; expires at {}", record.expires_at);
            inner.notify(&RefreshOutcome::Refreshed(record.access_token.clone()));
            Ok(record)
        }
        Ok(Exchanged::Superseded(current)) => {
            tracing::info!("Credentials replaced during refresh; discarding the response");
            Ok(current)
        }
        Err(reason) => {
            tracing::warn!("Token refresh failed, signing out: {}", reason);
            inner.notify(&RefreshOutcome::Failed);
            Err(reason)
        }
    };
    *inner.inflight.lock() = None;
    let _ = tx.send(result);
}

/// Owner of the process-wide credential record
#[derive(Clone)]
pub struct TokenCoordinator {
    inner: Arc<Inner>,
}

impl TokenCoordinator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn RefreshClient>,
        config: AuthConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                config,
                writes: Mutex::new(()),
                inflight: Mutex::new(None),
                driver: Mutex::new(None),
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_live(&self) -> AppResult<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(AppError::Disposed);
        }
        Ok(())
    }

    /// The stored record, valid or not
    pub fn current(&self) -> AppResult<Option<TokenRecord>> {
        self.ensure_live()?;
        self.inner.load()
    }

    /// Hand-off point for a completed credential exchange
    pub fn store_credentials(&self, record: TokenRecord) -> AppResult<()> {
        self.ensure_live()?;
        if !record.is_well_formed() {
            return Err(AppError::Storage(
                "token record must expire after it was issued".to_string(),
            ));
        }
        let _writes = self.inner.writes.lock();
        self.inner.save(&record)?;
        tracing::info!("Stored credentials; expires at {}", record.expires_at);
        Ok(())
    }

    /// Forget the stored credentials
    pub fn disconnect(&self) -> AppResult<()> {
        self.ensure_live()?;
        let _writes = self.inner.writes.lock();
        self.inner.store.remove(&self.inner.config.storage_key)?;
        tracing::info!("Credentials cleared");
        Ok(())
    }

    /// A currently valid access token, or `None` when signed out.
    ///
    /// An expired token waits for the refresh. A token expiring within the
    /// proactive threshold is returned as is while a refresh starts in the
    /// background.
    pub async fn get_valid_token(&self) -> AppResult<Option<String>> {
        self.ensure_live()?;
        let Some(record) = self.inner.load()? else {
            return Ok(None);
        };

        let now = now_ms();
        if record.is_expired(now) {
            tracing::debug!("Access token expired; waiting for refresh");
            return match self.refresh().await {
                Ok(record) => Ok(Some(record.access_token)),
                Err(AppError::RefreshFailed(_)) => Ok(None),
                Err(e) => Err(e),
            };
        }

        if record.expires_within(now, self.inner.config.proactive_threshold()) {
            tracing::debug!("Access token near expiry; refreshing in the background");
            drop(self.begin_refresh());
        }
        Ok(Some(record.access_token))
    }

    /// Refresh now, or join the refresh already in flight
    pub async fn refresh(&self) -> AppResult<TokenRecord> {
        self.ensure_live()?;
        match self.begin_refresh().await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(reason)) => Err(AppError::RefreshFailed(reason)),
            Err(_) => Err(AppError::RefreshFailed("refresh was abandoned".to_string())),
        }
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.inflight.lock().is_some()
    }

    fn begin_refresh(&self) -> PendingRefresh {
        let mut slot = self.inner.inflight.lock();
        if let Some(pending) = slot.as_ref() {
            return pending.clone();
        }
        let (tx, rx) = oneshot::channel();
        let pending = rx.shared();
        *slot = Some(pending.clone());
        let driver = tokio::spawn(drive_refresh(self.inner.clone(), tx));
        *self.inner.driver.lock() = Some(driver);
        pending
    }

    /// Register a listener for refresh outcomes. It stays registered until
    /// the returned subscription is unsubscribed or dropped.
    pub fn on_refresh<F>(&self, listener: F) -> RefreshSubscription
    where
        F: Fn(&RefreshOutcome) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        RefreshSubscription {
            id,
            owner: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// End of life: drops listeners, aborts a running refresh and rejects
    /// every later call with [`AppError::Disposed`]. Stored credentials stay.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(driver) = self.inner.driver.lock().take() {
            driver.abort();
        }
        *self.inner.inflight.lock() = None;
        self.inner.listeners.lock().clear();
        tracing::debug!("Token coordinator disposed");
    }
}

/// Keeps a refresh listener registered; removing it is the owner's job
#[must_use = "dropping the subscription unregisters the listener"]
pub struct RefreshSubscription {
    id: u64,
    owner: Weak<Inner>,
}

impl RefreshSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for RefreshSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::client::RefreshError;
    use crate::auth::token::RefreshResponse;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Rotating {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshClient for Rotating {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RefreshResponse {
                access_token: format!("access-{}", n),
                expires_in: 3600,
                token_type: "Bearer".to_string(),
                scope: "read".to_string(),
                id_token: None,
                refresh_token: Some(format!("refresh-{}", n)),
            })
        }
    }

    fn coordinator() -> (TokenCoordinator, Arc<Rotating>) {
        let client = Arc::new(Rotating {
            calls: AtomicUsize::new(0),
        });
        let coordinator = TokenCoordinator::new(
            Arc::new(MemoryStore::new()),
            client.clone(),
            AuthConfig::default(),
        );
        (coordinator, client)
    }

    #[tokio::test]
    async fn test_no_record_means_no_token() {
        let (coordinator, client) = coordinator();
        assert_eq!(coordinator.get_valid_token().await.unwrap(), None);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fresh_token_is_served_without_refresh() {
        let (coordinator, client) = coordinator();
        let record = TokenRecord::issued("a", Some("r".into()), Duration::from_secs(3600), "", now_ms());
        coordinator.store_credentials(record).unwrap();

        assert_eq!(coordinator.get_valid_token().await.unwrap().as_deref(), Some("a"));
        assert!(!coordinator.is_refreshing());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted() {
        let (coordinator, _) = coordinator();
        let record = TokenRecord::issued("a", Some("r".into()), Duration::from_secs(1), "", now_ms() - 5_000);
        coordinator.store_credentials(record).unwrap();

        let refreshed = coordinator.refresh().await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(coordinator.current().unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_dispose_rejects_later_calls() {
        let (coordinator, _) = coordinator();
        let _sub = coordinator.on_refresh(|_| {});
        coordinator.dispose();
        assert_eq!(coordinator.listener_count(), 0);
        assert!(matches!(coordinator.get_valid_token().await, Err(AppError::Disposed)));
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        let (coordinator, _) = coordinator();
        let mut record = TokenRecord::issued("a", None, Duration::from_secs(60), "", 1_000);
        record.expires_at = record.issued_at;
        assert!(coordinator.store_credentials(record).is_err());
    }
}
