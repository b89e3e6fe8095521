use serde::Deserialize;

use ballast_events::Source;

use super::errors::Result;
use super::repository::{Registry, RegistryOptions};

/// Deserialized registry configuration.
///
/// Parsing the configuration file itself is the embedding binary's concern;
/// this struct pins the shape.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub storage: ballast_driver::Config,
    #[serde(default)]
    pub notifications: ballast_events::Config,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub registry: Option<RegistryOptions>,
}

impl Config {
    /// Build a [`Registry`] from this configuration. Must run inside a
    /// tokio runtime: notification endpoints spawn their queue workers
    /// immediately.
    pub fn new_registry(&self) -> Result<Registry> {
        let driver = self.storage.new_driver();
        let bridge = self.notifications.new_bridge(self.source.clone())?;
        Ok(Registry::new(
            driver,
            bridge,
            self.registry.clone().unwrap_or_default(),
        ))
    }
}
