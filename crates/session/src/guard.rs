use std::{sync::Arc, time::Duration};

use shared::domain::InstanceId;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    client::{ProtocolClient, SessionStarter},
    registry::ConnectionRegistry,
};

/// How long a restart is given to register a connected client before the
/// registry is checked again. There is a single re-check, no polling, so a
/// slower reconnect fails the current call.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session found")]
    StartFailed {
        instance: InstanceId,
        source: anyhow::Error,
    },
    #[error("no active session found after restart")]
    MissingAfterStart { instance: InstanceId },
    #[error("client not connected after restart")]
    NotConnectedAfterStart { instance: InstanceId },
    #[error("client disconnected")]
    Disconnected { instance: InstanceId },
}

impl SessionError {
    pub fn instance(&self) -> &InstanceId {
        match self {
            SessionError::StartFailed { instance, .. }
            | SessionError::MissingAfterStart { instance }
            | SessionError::NotConnectedAfterStart { instance }
            | SessionError::Disconnected { instance } => instance,
        }
    }
}

/// Hands out connected client handles, restarting an instance that has none.
#[derive(Clone)]
pub struct SessionGuard {
    registry: ConnectionRegistry,
    starter: Arc<dyn SessionStarter>,
    settle_interval: Duration,
}

impl SessionGuard {
    pub fn new(registry: ConnectionRegistry, starter: Arc<dyn SessionStarter>) -> Self {
        Self {
            registry,
            starter,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }

    pub fn with_settle_interval(mut self, settle_interval: Duration) -> Self {
        self.settle_interval = settle_interval;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle_interval
    }

    pub async fn ensure_connected(
        &self,
        instance: &InstanceId,
    ) -> Result<Arc<dyn ProtocolClient>, SessionError> {
        if let Some(client) = self.registry.get(instance).await {
            if client.is_connected() {
                return Ok(client);
            }
            warn!(%instance, registered = true, connected = false, "client is registered but disconnected");
            return Err(SessionError::Disconnected {
                instance: instance.clone(),
            });
        }

        info!(%instance, "no client registered, starting session");
        if let Err(source) = self.starter.start_instance(instance).await {
            error!(%instance, error = %source, "failed to start session");
            return Err(SessionError::StartFailed {
                instance: instance.clone(),
                source,
            });
        }

        tokio::time::sleep(self.settle_interval).await;

        let Some(client) = self.registry.get(instance).await else {
            warn!(
                %instance,
                settle_ms = self.settle_interval.as_millis() as u64,
                registered = false,
                "session did not register a client after restart"
            );
            return Err(SessionError::MissingAfterStart {
                instance: instance.clone(),
            });
        };
        if !client.is_connected() {
            warn!(
                %instance,
                settle_ms = self.settle_interval.as_millis() as u64,
                registered = true,
                connected = false,
                "client still disconnected after restart"
            );
            return Err(SessionError::NotConnectedAfterStart {
                instance: instance.clone(),
            });
        }

        let live_sessions = self.registry.len().await;
        info!(
            %instance,
            live_sessions,
            "session ready after restart"
        );
        Ok(client)
    }
}

#[cfg(test)]
#[path = "tests/guard_tests.rs"]
mod tests;
