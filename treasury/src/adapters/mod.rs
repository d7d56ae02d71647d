//! Concrete provider adapters.
//!
//! The factory builds the `ProviderType -> adapter` map once at
//! initialization; the engine never mutates it at runtime. Hot-reloading
//! adapter credentials is a future feature.

use std::{collections::HashMap, sync::Arc};

use secrecy::Secret;

use crate::{adapter::ProviderAdapter, provider::ProviderType};

/// The Due conversion API.
pub mod due;
/// Scriptable in-memory adapter for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
/// The Zero Hash conversion API.
pub mod zero_hash;

pub use due::DueAdapter;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockAdapter;
pub use zero_hash::ZeroHashAdapter;

/// Connection settings for one HTTP provider.
#[derive(Clone)]
pub struct AdapterSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
}

/// Everything the factory needs; absent providers simply aren't registered.
#[derive(Clone, Default)]
pub struct AdapterConfig {
    pub due: Option<AdapterSettings>,
    pub zero_hash: Option<AdapterSettings>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: Secret::new(String::new()),
        }
    }
}

/// Builds the adapter registry. Called once at startup.
pub fn build_adapters(
    client: reqwest::Client,
    config: AdapterConfig,
) -> HashMap<ProviderType, Arc<dyn ProviderAdapter>> {
    let mut adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>> =
        HashMap::new();

    if let Some(settings) = config.due {
        adapters.insert(
            ProviderType::Due,
            Arc::new(DueAdapter::new(client.clone(), settings)),
        );
    }
    if let Some(settings) = config.zero_hash {
        adapters.insert(
            ProviderType::ZeroHash,
            Arc::new(ZeroHashAdapter::new(client, settings)),
        );
    }

    adapters
}
