/// Identity store
///
/// Loads the persisted relay configuration, or generates a fresh identity
/// with default routing and persists it before anything else happens.

use crate::identity::{Identity, KeyPairError};
use anonrelay_common::{ConfigError, RelayConfig, RoutingConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration after the identity has been decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub identity: Identity,
    pub routing: RoutingConfig,
    pub listen_addr: SocketAddr,
}

impl LoadedConfig {
    fn from_persisted(config: RelayConfig) -> Result<Self, StoreError> {
        let identity = Identity::from_base64(&config.identity)?;
        Ok(Self {
            identity,
            routing: config.routing(),
            listen_addr: config.listen_addr,
        })
    }
}

/// Outcome of [`IdentityStore::load_or_generate`]
#[derive(Debug)]
pub struct StoreLoad {
    pub config: LoadedConfig,
    /// True when no file existed and a new identity was written
    pub generated: bool,
}

/// Owns the configuration file path
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted config, generating and persisting one if the file
    /// does not exist.
    ///
    /// Any failure other than absence is returned as is; a generated
    /// identity is only handed out once it has been durably written.
    pub fn load_or_generate(&self) -> Result<StoreLoad, StoreError> {
        match RelayConfig::from_file(&self.path) {
            Ok(persisted) => {
                debug!("Decoding identity from {}", self.path.display());
                Ok(StoreLoad {
                    config: LoadedConfig::from_persisted(persisted)?,
                    generated: false,
                })
            }
            Err(err) if err.is_not_found() => self.generate(),
            Err(err) => Err(err.into()),
        }
    }

    fn generate(&self) -> Result<StoreLoad, StoreError> {
        let identity = Identity::generate();
        let persisted = RelayConfig::with_identity(identity.to_base64());
        persisted.to_file(&self.path)?;

        Ok(StoreLoad {
            config: LoadedConfig {
                identity,
                routing: persisted.routing(),
                listen_addr: persisted.listen_addr,
            },
            generated: true,
        })
    }
}

/// Identity store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to decode identity: {0}")]
    Identity(#[from] KeyPairError),
}
