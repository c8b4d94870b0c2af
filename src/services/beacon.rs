//! Fire-and-forget delivery of the final "remove me" messages at session teardown.

use tokio::runtime::Handle;
use tracing::debug;

use crate::dao::client::RecordStoreClient;

/// Last message a session sends about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Farewell {
    RemovePresence { session_id: String },
    RetractReadiness { session_id: String },
}

impl Farewell {
    pub fn session_id(&self) -> &str {
        match self {
            Farewell::RemovePresence { session_id } | Farewell::RetractReadiness { session_id } => {
                session_id
            }
        }
    }
}

/// Delivery that may outlive its caller and is never awaited.
///
/// Returns whether the message was handed off; delivery itself is not guaranteed.
pub trait BestEffortDelivery: Send + Sync {
    fn dispatch(&self, farewell: Farewell) -> bool;
}

/// Spawns the store delete on the current Tokio runtime and returns immediately.
#[derive(Clone)]
pub struct DetachedDelivery {
    client: RecordStoreClient,
}

impl DetachedDelivery {
    pub fn new(client: RecordStoreClient) -> Self {
        Self { client }
    }
}

impl BestEffortDelivery for DetachedDelivery {
    fn dispatch(&self, farewell: Farewell) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            debug!(session_id = farewell.session_id(), "no runtime available; farewell dropped");
            return false;
        };

        let client = self.client.clone();
        runtime.spawn(async move {
            let result = match &farewell {
                Farewell::RemovePresence { session_id } => client.delete_presence(session_id).await,
                Farewell::RetractReadiness { session_id } => {
                    client.delete_readiness(session_id).await
                }
            };
            if let Err(err) = result {
                debug!(?farewell, error = %err, "farewell delivery failed");
            }
        });
        true
    }
}
