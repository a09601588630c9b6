//! Provider and model lookup, built once from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::ModelSpec;
use crate::client::ProviderClient;
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::health::HealthTracker;
use crate::replicate::ReplicateClient;
use crate::siliconflow::SiliconFlowClient;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{0}' is registered twice")]
    DuplicateProvider(String),

    #[error("Model '{model}' is offered by both '{first}' and '{second}'")]
    DuplicateModel {
        model: String,
        first: String,
        second: String,
    },

    #[error("Provider '{0}' has no models")]
    NoModels(String),

    #[error(transparent)]
    Client(#[from] ProviderError),
}

/// One provider's model list, for catalog listings.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCatalog {
    pub provider: String,
    pub supports_webhooks: bool,
    pub models: Vec<ModelSpec>,
}

#[derive(Debug)]
pub struct ProviderRegistry {
    clients: Vec<Arc<dyn ProviderClient>>,
    by_name: HashMap<String, usize>,
    model_owner: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// Build a registry, rejecting duplicate provider names and model ids.
    pub fn new(clients: Vec<Arc<dyn ProviderClient>>) -> Result<Self, RegistryError> {
        let mut by_name = HashMap::new();
        let mut model_owner: HashMap<String, usize> = HashMap::new();

        for (idx, client) in clients.iter().enumerate() {
            if by_name.insert(client.name().to_string(), idx).is_some() {
                return Err(RegistryError::DuplicateProvider(client.name().to_string()));
            }
            if client.models().is_empty() {
                return Err(RegistryError::NoModels(client.name().to_string()));
            }
            for model in client.models() {
                if let Some(&first) = model_owner.get(&model.id) {
                    return Err(RegistryError::DuplicateModel {
                        model: model.id.clone(),
                        first: clients[first].name().to_string(),
                        second: client.name().to_string(),
                    });
                }
                model_owner.insert(model.id.clone(), idx);
            }
        }

        Ok(Self {
            clients,
            by_name,
            model_owner,
        })
    }

    /// Build the SiliconFlow and Replicate clients from configuration and
    /// register them with `health`.
    pub fn from_config(config: &ProvidersConfig, health: &HealthTracker) -> Result<Self, RegistryError> {
        let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::new();
        for settings in [&config.replicate, &config.siliconflow] {
            health.register(&settings.name, settings.priority, settings.enabled);
            if settings.api_key.is_none() {
                tracing::warn!(provider = %settings.name, "Provider has no API credentials");
            }
        }
        clients.push(Arc::new(ReplicateClient::new(config.replicate.clone())?));
        clients.push(Arc::new(SiliconFlowClient::new(config.siliconflow.clone())?));
        Self::new(clients)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ProviderClient>> {
        self.by_name.get(name).map(|&idx| &self.clients[idx])
    }

    /// The provider that serves `model`.
    pub fn owner_of(&self, model: &str) -> Option<&Arc<dyn ProviderClient>> {
        self.model_owner.get(model).map(|&idx| &self.clients[idx])
    }

    pub fn clients(&self) -> &[Arc<dyn ProviderClient>] {
        &self.clients
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn catalog(&self) -> Vec<ProviderCatalog> {
        self.clients
            .iter()
            .map(|c| ProviderCatalog {
                provider: c.name().to_string(),
                supports_webhooks: c.supports_webhooks(),
                models: c.models().to_vec(),
            })
            .collect()
    }
}
