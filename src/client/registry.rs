use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use super::service_client::{ServiceClient, ServiceClientConfig};
use super::transport::HttpTransport;
use crate::breaker::CircuitState;
use crate::config::{ConfigError, Settings};

/// Named `ServiceClient`s for every downstream service a process talks to.
///
/// Registering a name again replaces its client, breaker state included.
pub struct ServiceRegistry {
    service_name: String,
    defaults: ServiceClientConfig,
    transport: Arc<dyn HttpTransport>,
    clients: RwLock<BTreeMap<String, Arc<ServiceClient>>>,
}

impl ServiceRegistry {
    /// `service_name` is this process's identity, stamped on every client.
    pub fn new(
        service_name: impl Into<String>,
        defaults: ServiceClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            defaults,
            transport,
            clients: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a registry with one client per entry in `settings.services`.
    pub fn from_settings(settings: &Settings, transport: Arc<dyn HttpTransport>) -> Self {
        let registry = Self::new(
            settings.service_name.clone(),
            settings.client.clone(),
            transport,
        );
        for (name, url) in &settings.services {
            registry.register(name.clone(), url.clone());
        }
        registry
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Register `name` with the registry's default client settings.
    pub fn register(&self, name: impl Into<String>, base_url: impl Into<String>) -> Arc<ServiceClient> {
        let config = self.defaults.clone();
        self.register_with(name, base_url, config)
    }

    pub fn register_with(
        &self,
        name: impl Into<String>,
        base_url: impl Into<String>,
        config: ServiceClientConfig,
    ) -> Arc<ServiceClient> {
        let name = name.into();
        let client = Arc::new(ServiceClient::new(
            name.clone(),
            base_url,
            self.service_name.clone(),
            config,
            self.transport.clone(),
        ));
        info!(target_service = %name, base_url = %client.base_url(), "service registered");
        self.write().insert(name, client.clone());
        client
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceClient>> {
        self.read().get(name).cloned()
    }

    /// Like `get`, but an unknown name is an error.
    pub fn require(&self, name: &str) -> Result<Arc<ServiceClient>, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownService(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ServiceClient>> {
        self.write().remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Breaker state of every registered client.
    pub fn circuit_states(&self) -> BTreeMap<String, CircuitState> {
        self.read()
            .iter()
            .map(|(name, client)| (name.clone(), client.circuit_state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<ServiceClient>>> {
        self.clients.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<ServiceClient>>> {
        self.clients.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("service_name", &self.service_name)
            .field("services", &self.names())
            .finish()
    }
}
