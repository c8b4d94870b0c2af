use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report relay health, probing the record store and logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_record_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "record store health check failed");
            }
        }
        Err(_) => warn!("record store unavailable (degraded mode)"),
    }

    let subscribers = state.changes().subscriber_count();
    if state.is_degraded() {
        HealthResponse::degraded(subscribers)
    } else {
        HealthResponse::ok(subscribers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::memory::MemoryRecordStore,
        state::{AppState, PublicEndpoints},
    };

    #[tokio::test]
    async fn reports_degraded_without_a_store() {
        let state = AppState::new(AppConfig::default(), PublicEndpoints::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .install_record_store(Arc::new(MemoryRecordStore::new()))
            .await;
        let _listener = state.changes().subscribe();
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.push_subscribers, 1);
    }
}
