use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::{rngs::OsRng, RngCore};
use std::fmt;

/// Length of the expanded secret form: seed followed by public key
pub const EXPANDED_KEY_LENGTH: usize = SECRET_KEY_LENGTH + PUBLIC_KEY_LENGTH;

/// Ed25519 signing key behind a service identity
#[derive(Clone)]
pub struct KeyPair(SigningKey);

impl KeyPair {
    /// Fresh keypair seeded from the OS CSPRNG
    pub fn generate() -> Self {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// Keypair from the 64-byte `seed || public key` form.
    ///
    /// The trailing half must be the public key the seed derives.
    pub fn from_expanded(bytes: &[u8; EXPANDED_KEY_LENGTH]) -> Result<Self, KeyPairError> {
        let (seed_half, public_half) = bytes.split_at(SECRET_KEY_LENGTH);
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        seed.copy_from_slice(seed_half);

        let keypair = Self::from_seed(&seed);
        if keypair.public_bytes().as_slice() == public_half {
            Ok(keypair)
        } else {
            Err(KeyPairError::PublicKeyMismatch)
        }
    }

    /// Keypair from either the 32-byte seed or the expanded form
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyPairError> {
        if let Ok(seed) = <&[u8; SECRET_KEY_LENGTH]>::try_from(bytes) {
            return Ok(Self::from_seed(seed));
        }

        <&[u8; EXPANDED_KEY_LENGTH]>::try_from(bytes)
            .map_err(|_| KeyPairError::InvalidLength(bytes.len()))
            .and_then(Self::from_expanded)
    }

    pub fn seed(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.0.to_bytes()
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.0.verifying_key().to_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyPair").field(&self.public_key()).finish()
    }
}

/// Public half of a service identity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn as_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.0.to_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_bytes()))
    }
}

/// Failures decoding a persisted key
#[derive(Debug, thiserror::Error)]
pub enum KeyPairError {
    #[error("Invalid identity encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("Invalid key length: {0} (expected 32 or 64 bytes)")]
    InvalidLength(usize),

    #[error("Expanded key carries a public key that does not match its seed")]
    PublicKeyMismatch,
}
