pub mod clock;
pub mod identity;
pub mod notify;
pub mod presence;
pub mod readiness;
pub mod reconcile;
pub mod round;
pub mod session;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{client::RecordStoreClient, record_store::RecordStore},
    error::ServiceError,
    state::clock::{Clock, SystemClock},
};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

/// Endpoints advertised to browser clients through `/api/config`.
#[derive(Debug, Clone, Default)]
pub struct PublicEndpoints {
    pub store_url: Option<String>,
    pub anon_key: Option<String>,
}

/// Shared state of the relay: the record store handle, the change hub and the degraded flag.
pub struct AppState {
    record_store: RwLock<Option<Arc<dyn RecordStore>>>,
    changes: SseHub,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    endpoints: PublicEndpoints,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The relay starts in degraded mode until a record store is installed.
    pub fn new(config: AppConfig, endpoints: PublicEndpoints) -> SharedState {
        Self::with_clock(config, endpoints, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: AppConfig,
        endpoints: PublicEndpoints,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            record_store: RwLock::new(None),
            changes: SseHub::new(64),
            degraded: degraded_tx,
            config,
            clock,
            endpoints,
        })
    }

    /// Obtain a handle to the current record store, if one is installed.
    pub async fn record_store(&self) -> Option<Arc<dyn RecordStore>> {
        let guard = self.record_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current record store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_record_store(&self) -> Result<Arc<dyn RecordStore>, ServiceError> {
        self.record_store().await.ok_or(ServiceError::Degraded)
    }

    /// Typed client over the current record store.
    pub async fn client(&self) -> Result<RecordStoreClient, ServiceError> {
        Ok(RecordStoreClient::new(self.require_record_store().await?))
    }

    /// Install a record store implementation and leave degraded mode.
    pub async fn install_record_store(&self, store: Arc<dyn RecordStore>) {
        {
            let mut guard = self.record_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current record store and enter degraded mode.
    pub async fn clear_record_store(&self) {
        {
            let mut guard = self.record_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, notifying watchers only when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Broadcast hub behind `/sse/changes`.
    pub fn changes(&self) -> &SseHub {
        &self.changes
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn endpoints(&self) -> &PublicEndpoints {
        &self.endpoints
    }
}
