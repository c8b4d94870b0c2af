use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{record_store::RecordStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_HEALTH_RETRIES: u32 = 3;

/// Keep a record store installed on the relay, entering degraded mode while it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RecordStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_record_store(store.clone()).await;
                info!("record store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                watch_health(&state, store.as_ref()).await;

                warn!("record store unreachable; reconnecting");
                state.clear_record_store().await;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "record store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Probe `store` until it fails [`MAX_HEALTH_RETRIES`] consecutive checks.
async fn watch_health(state: &SharedState, store: &dyn RecordStore) {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded() {
                info!("record store healthy again; leaving degraded mode");
                state.update_degraded(false);
            }
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        let mut retry_delay = INITIAL_DELAY;
        let mut recovered = false;
        for attempt in 0..MAX_HEALTH_RETRIES {
            match store.health_check().await {
                Ok(()) => {
                    info!(attempt, "record store recovered after failed health check");
                    recovered = true;
                    break;
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(attempt, error = %err, "record store health retry failed; entering degraded mode");
                        state.update_degraded(true);
                    } else {
                        warn!(attempt, error = %err, "record store health retry failed");
                    }
                    sleep(retry_delay).await;
                    retry_delay = (retry_delay * 2).min(MAX_DELAY);
                }
            }
        }

        if !recovered {
            warn!("exhausted record store health retries");
            return;
        }
        state.update_degraded(false);
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::memory::MemoryRecordStore,
        state::{AppState, PublicEndpoints},
    };

    #[tokio::test(start_paused = true)]
    async fn installs_the_store_and_degrades_when_it_goes_away() {
        let state = AppState::new(AppConfig::default(), PublicEndpoints::default());
        let store = MemoryRecordStore::new();
        let handle = {
            let store = store.clone();
            tokio::spawn(run(state.clone(), move || {
                let store = store.clone();
                async move { Ok::<_, StorageError>(Arc::new(store) as Arc<dyn RecordStore>) }
            }))
        };

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());
        assert!(state.record_store().await.is_some());

        store.set_offline(true);
        sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(10)).await;
        assert!(state.is_degraded());

        store.set_offline(false);
        sleep(Duration::from_secs(60)).await;
        assert!(!state.is_degraded());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_keep_the_relay_degraded() {
        let state = AppState::new(AppConfig::default(), PublicEndpoints::default());
        let handle = tokio::spawn(run(state.clone(), || async {
            Err::<Arc<dyn RecordStore>, _>(StorageError::unavailable(
                "refused".into(),
                std::io::Error::other("connection refused"),
            ))
        }));

        sleep(Duration::from_secs(30)).await;
        assert!(state.is_degraded());
        assert!(state.record_store().await.is_none());
        handle.abort();
    }
}
