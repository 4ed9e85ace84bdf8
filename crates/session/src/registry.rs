use std::{collections::HashMap, sync::Arc};

use shared::domain::InstanceId;
use tokio::sync::RwLock;

use crate::client::ProtocolClient;

/// Instance id to live client handle. Clones share the same map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<RwLock<HashMap<InstanceId, Arc<dyn ProtocolClient>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, instance: &InstanceId) -> Option<Arc<dyn ProtocolClient>> {
        self.clients.read().await.get(instance).cloned()
    }

    /// Last write wins; the replaced handle is returned to the caller.
    pub async fn set(
        &self,
        instance: InstanceId,
        client: Arc<dyn ProtocolClient>,
    ) -> Option<Arc<dyn ProtocolClient>> {
        self.clients.write().await.insert(instance, client)
    }

    pub async fn exists(&self, instance: &InstanceId) -> bool {
        self.clients.read().await.contains_key(instance)
    }

    pub async fn remove(&self, instance: &InstanceId) -> Option<Arc<dyn ProtocolClient>> {
        self.clients.write().await.remove(instance)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    pub async fn instances(&self) -> Vec<InstanceId> {
        let mut instances: Vec<_> = self.clients.read().await.keys().cloned().collect();
        instances.sort();
        instances
    }
}
