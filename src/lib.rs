//! ScreenClip - recording orchestration core.
//!
//! Coordinates capture sessions, frame-accurate trimming of finished clips
//! and the shared credential used for uploads. Platform capture backends and
//! the UI plug in from outside through [`capture::CaptureProvider`] and the
//! [`recorder::SessionController`] API.

pub mod auth;
pub mod capture;
pub mod config;
pub mod media;
pub mod recorder;
pub mod storage;
pub mod trim;
pub mod utils;

use auth::{HttpRefreshClient, RefreshClient, TokenCoordinator};
use capture::CaptureProviders;
use config::AppConfig;
use recorder::SessionController;
use std::sync::Arc;
use storage::KeyValueStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trim::TrimEngine;

pub use utils::{AppError, AppResult, ErrorResponse};

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screenclip=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// The three services the UI holds for the lifetime of the app
pub struct Services {
    pub sessions: SessionController,
    pub trim: TrimEngine,
    pub tokens: TokenCoordinator,
}

impl Services {
    /// Wire every service from one config, refreshing tokens over HTTP
    pub fn new(
        config: AppConfig,
        providers: CaptureProviders,
        store: Arc<dyn KeyValueStore>,
    ) -> AppResult<Self> {
        let client = Arc::new(HttpRefreshClient::new(&config.auth));
        Self::with_refresh_client(config, providers, store, client)
    }

    pub fn with_refresh_client(
        config: AppConfig,
        providers: CaptureProviders,
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn RefreshClient>,
    ) -> AppResult<Self> {
        config.validate()?;
        tracing::info!("Starting ScreenClip v{}", env!("CARGO_PKG_VERSION"));
        Ok(Self {
            sessions: SessionController::with_store(providers, config.recorder, store.clone()),
            trim: TrimEngine::new(config.trim),
            tokens: TokenCoordinator::new(store, client, config.auth),
        })
    }

    /// Release what the services hold: the token coordinator is disposed and
    /// a finished or failed session is discarded.
    pub fn shutdown(&self) {
        self.tokens.dispose();
        if let Err(e) = self.sessions.discard() {
            tracing::debug!("Session left as is on shutdown: {}", e);
        }
    }
}
