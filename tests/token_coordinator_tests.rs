// Integration tests for the token coordinator
//
// The refresh client is a scripted double; the store is either in memory or
// a JSON file in a temp directory.

mod common;

use anyhow::Result;
use common::FakeRefreshClient;
use parking_lot::Mutex;
use screenclip_lib::auth::{RefreshOutcome, TokenCoordinator, TokenRecord};
use screenclip_lib::config::AuthConfig;
use screenclip_lib::storage::{FileStore, KeyValueStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A record that expired `ago` and carries a refresh token
fn expired(ago: Duration) -> TokenRecord {
    let issued = now_ms() - 3_600_000;
    TokenRecord {
        access_token: "stale".to_string(),
        refresh_token: Some("refresh-0".to_string()),
        expires_at: now_ms() - ago.as_millis() as i64,
        issued_at: issued,
        scope: "upload".to_string(),
        token_type: "Bearer".to_string(),
        id_token: None,
    }
}

fn expiring_in(lifetime: Duration) -> TokenRecord {
    TokenRecord::issued("current", Some("refresh-0".to_string()), lifetime, "upload", now_ms())
}

fn coordinator(client: Arc<FakeRefreshClient>) -> (TokenCoordinator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = TokenCoordinator::new(store.clone(), client, AuthConfig::default());
    (coordinator, store)
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::from_millis(50)));
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(10)))?;

    let calls = (0..10).map(|_| {
        let coordinator = coordinator.clone();
        async move { coordinator.get_valid_token().await }
    });
    let tokens = futures::future::join_all(calls).await;

    assert_eq!(client.call_count(), 1, "exactly one network refresh");
    for token in tokens {
        assert_eq!(token?.as_deref(), Some("new-1"));
    }
    assert!(!coordinator.is_refreshing());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::from_millis(50)).failing());
    let (coordinator, store) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(10)))?;

    let calls = (0..5).map(|_| {
        let coordinator = coordinator.clone();
        async move { coordinator.get_valid_token().await }
    });
    for token in futures::future::join_all(calls).await {
        assert_eq!(token?, None);
    }
    assert_eq!(client.call_count(), 1);
    assert_eq!(store.get(&AuthConfig::default().storage_key)?, None);
    Ok(())
}

#[tokio::test]
async fn test_near_expiry_refreshes_in_background_once() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::from_millis(100)));
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expiring_in(Duration::from_secs(120)))?;

    // served immediately, refresh scheduled
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("current"));
    assert!(coordinator.is_refreshing());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("current"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.call_count(), 1, "no duplicate background refresh");
    assert!(!coordinator.is_refreshing());

    // the refreshed token is an hour long, so no further refresh
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("new-1"));
    assert_eq!(client.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_refresh_failure_signs_out() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::ZERO).failing());
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;

    let heard = Arc::new(Mutex::new(Vec::new()));
    let subscription = coordinator.on_refresh({
        let heard = heard.clone();
        move |outcome: &RefreshOutcome| heard.lock().push(outcome.clone())
    });

    let err = coordinator.refresh().await.unwrap_err();
    assert_eq!(err.code(), "REFRESH_FAILED");
    assert_eq!(coordinator.current()?, None);
    assert_eq!(coordinator.get_valid_token().await?, None);
    assert_eq!(client.call_count(), 1, "a failed refresh is never retried");
    assert_eq!(heard.lock().as_slice(), &[RefreshOutcome::Failed]);

    // new credentials bring it back
    coordinator.store_credentials(expiring_in(Duration::from_secs(3600)))?;
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("current"));

    subscription.unsubscribe();
    Ok(())
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_unless_rotated() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::ZERO));
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;

    let record = coordinator.refresh().await?;
    assert_eq!(record.access_token, "new-1");
    assert_eq!(record.refresh_token.as_deref(), Some("refresh-0"));
    assert!(record.expires_at > record.issued_at);
    assert_eq!(client.seen(), vec!["refresh-0".to_string()]);

    let rotating = Arc::new(FakeRefreshClient::new(Duration::ZERO).rotating());
    let (coordinator, _) = self::coordinator(rotating.clone());
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;
    coordinator.refresh().await?;
    coordinator.refresh().await?;
    assert_eq!(rotating.seen(), vec!["refresh-0".to_string(), "refresh-1".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_listeners_are_removed_by_their_owner() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::ZERO));
    let (coordinator, _) = coordinator(client);
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;

    let heard = Arc::new(Mutex::new(Vec::new()));
    let first = coordinator.on_refresh({
        let heard = heard.clone();
        move |outcome: &RefreshOutcome| heard.lock().push(("first", outcome.success()))
    });
    let second = coordinator.on_refresh({
        let heard = heard.clone();
        move |outcome: &RefreshOutcome| heard.lock().push(("second", outcome.success()))
    });
    assert_eq!(coordinator.listener_count(), 2);

    first.unsubscribe();
    assert_eq!(coordinator.listener_count(), 1);

    coordinator.refresh().await?;
    assert_eq!(heard.lock().as_slice(), &[("second", true)]);

    drop(second);
    assert_eq!(coordinator.listener_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_clears_credentials() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::ZERO));
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expiring_in(Duration::from_secs(3600)))?;

    coordinator.disconnect()?;
    assert_eq!(coordinator.get_valid_token().await?, None);
    assert_eq!(client.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_credentials_survive_restart_with_file_store() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("store.json");
    let client = Arc::new(FakeRefreshClient::new(Duration::ZERO));

    {
        let store = Arc::new(FileStore::open(&path)?);
        let coordinator = TokenCoordinator::new(store, client.clone(), AuthConfig::default());
        coordinator.store_credentials(expiring_in(Duration::from_secs(3600)))?;
        coordinator.dispose();
    }

    let store = Arc::new(FileStore::open(&path)?);
    let coordinator = TokenCoordinator::new(store, client, AuthConfig::default());
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("current"));
    Ok(())
}

fn other_account() -> TokenRecord {
    TokenRecord::issued(
        "other-account",
        Some("other-refresh".to_string()),
        Duration::from_secs(3600),
        "upload",
        now_ms(),
    )
}

#[tokio::test]
async fn test_sign_in_during_refresh_keeps_new_credentials() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::from_millis(100)));
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;

    let heard = Arc::new(Mutex::new(Vec::new()));
    let _subscription = coordinator.on_refresh({
        let heard = heard.clone();
        move |outcome: &RefreshOutcome| heard.lock().push(outcome.clone())
    });

    let pending = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.get_valid_token().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.is_refreshing());

    // the user switches accounts while the old refresh is out
    coordinator.disconnect()?;
    coordinator.store_credentials(other_account())?;

    assert_eq!(pending.await??.as_deref(), Some("other-account"));
    let stored = coordinator.current()?.expect("new credentials kept");
    assert_eq!(stored.access_token, "other-account");
    assert_eq!(stored.refresh_token.as_deref(), Some("other-refresh"));
    assert_eq!(client.call_count(), 1);
    assert!(heard.lock().is_empty(), "a discarded response is not an outcome");
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_does_not_sign_out_a_new_account() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::from_millis(100)).failing());
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;

    let pending = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.get_valid_token().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.store_credentials(other_account())?;

    assert_eq!(pending.await??.as_deref(), Some("other-account"));
    assert_eq!(
        coordinator.current()?.map(|r| r.access_token).as_deref(),
        Some("other-account")
    );
    Ok(())
}

#[tokio::test]
async fn test_panicking_listener_does_not_wedge_refresh() -> Result<()> {
    let client = Arc::new(FakeRefreshClient::new(Duration::ZERO));
    let (coordinator, _) = coordinator(client.clone());
    coordinator.store_credentials(expired(Duration::from_secs(1)))?;

    let subscription = coordinator.on_refresh(|_: &RefreshOutcome| panic!("listener bug"));
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("new-1"));
    assert!(!coordinator.is_refreshing());
    drop(subscription);

    coordinator.store_credentials(expired(Duration::from_secs(1)))?;
    assert_eq!(coordinator.get_valid_token().await?.as_deref(), Some("new-2"));
    assert_eq!(client.call_count(), 2, "a second refresh reached the network");
    Ok(())
}
