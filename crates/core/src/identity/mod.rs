mod identity;
mod keypair;

pub use identity::Identity;
pub use keypair::{KeyPair, KeyPairError, PublicKey, EXPANDED_KEY_LENGTH};
