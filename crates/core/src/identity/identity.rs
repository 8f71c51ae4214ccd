use super::{KeyPair, KeyPairError, PublicKey};
use crate::service::ServiceAddress;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// Durable identity of the exposed service.
///
/// The service address is derived from the public key, so the same seed
/// must be reused for as long as the address is expected to stay stable.
#[derive(Clone)]
pub struct Identity {
    keypair: KeyPair,
    address: ServiceAddress,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self::from_keypair(KeyPair::generate())
    }

    /// Create an identity from an existing keypair
    pub fn from_keypair(keypair: KeyPair) -> Self {
        let address = ServiceAddress::derive(&keypair.public_key());
        Self { keypair, address }
    }

    /// Decode an identity from its persisted base64 form
    pub fn from_base64(encoded: &str) -> Result<Self, KeyPairError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        KeyPair::from_slice(&bytes).map(Self::from_keypair)
    }

    /// Encode the seed for persistence
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.keypair.seed())
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Address this identity is reachable at on the overlay
    pub fn service_address(&self) -> ServiceAddress {
        self.address
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.keypair.seed() == other.keypair.seed()
    }
}

impl Eq for Identity {}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("public_key", &self.public_key())
            .finish()
    }
}
