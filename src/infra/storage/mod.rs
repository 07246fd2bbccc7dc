//! Physical derivative storage, selected at startup.

pub mod fs;
pub mod object;

use std::sync::Arc;

use crate::application::ports::StorageBackend;
use crate::config::StorageSettings;

use self::{
    fs::FsBackend,
    object::{ObjectStoreBackend, ObjectStoreConfig},
};

use super::error::InfraError;

/// The configured backend, keeping the concrete filesystem handle around for
/// the routes and the reaper that need it.
#[derive(Clone)]
pub enum ConfiguredStorage {
    Fs(Arc<FsBackend>),
    Object(Arc<ObjectStoreBackend>),
}

impl ConfiguredStorage {
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, InfraError> {
        match settings {
            StorageSettings::Fs(fs) => {
                let backend = FsBackend::new(&fs.root, fs.public_base_url.clone())?;
                Ok(Self::Fs(Arc::new(backend)))
            }
            StorageSettings::Object(object) => {
                let backend = ObjectStoreBackend::new(ObjectStoreConfig {
                    endpoint: object.endpoint.clone(),
                    public_base_url: object.public_base_url.clone(),
                    acl: object.acl.clone(),
                    authorization: object.authorization.clone(),
                })
                .map_err(|err| InfraError::configuration(err.to_string()))?;
                Ok(Self::Object(Arc::new(backend)))
            }
        }
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        match self {
            Self::Fs(backend) => backend.clone(),
            Self::Object(backend) => backend.clone(),
        }
    }

    pub fn files(&self) -> Option<Arc<FsBackend>> {
        match self {
            Self::Fs(backend) => Some(backend.clone()),
            Self::Object(_) => None,
        }
    }
}
