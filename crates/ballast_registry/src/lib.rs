//! # Ballast Registry
//!
//! Driver-backed implementation of the registry core: the content-addressed
//! blob store, the resumable upload state machine, manifest storage with
//! reference verification, and the tag index, all laid out on a
//! [`ballast_driver::StorageDriver`] and reporting repository events through
//! [`ballast_events`].
//!
//! The entry point is [`Registry`]; everything else is reached through the
//! [`Repository`] façade it hands out.
pub mod errors;
pub use errors::{Error, Result};

pub mod paths;

mod link;

mod cache;
pub use cache::{BlobDescriptorCache, DescriptorCacheScope};

mod blobs;
pub use blobs::{BlobBody, BlobCreate, BlobStore, CreateOptions};

mod upload;
pub use upload::BlobUpload;

mod manifests;
pub use manifests::{IndexValidation, ManifestPutOptions, ManifestStore};

mod tags;
pub use tags::TagStore;

mod repository;
pub use repository::{Registry, RegistryOptions, Repository};

pub mod config;
pub use config::Config;
