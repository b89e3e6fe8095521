use std::sync::Arc;

use serde::Deserialize;

use crate::filesystem::FilesystemConfig;
use crate::StorageDriver;

/// Storage backend selection.
///
/// Only the filesystem backend ships with the core; object-store backends
/// plug in by implementing [`StorageDriver`] and extending this enum in
/// their own builds.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Config {
    Filesystem(FilesystemConfig),
}

impl Config {
    pub fn new_driver(&self) -> Arc<dyn StorageDriver> {
        match self {
            Config::Filesystem(cfg) => Arc::new(cfg.new_driver()),
        }
    }
}
