use crate::identity::PublicKey;
use data_encoding::BASE32_NOPAD;
use std::fmt;

const DERIVATION_CONTEXT: &[u8] = b"ANONRELAY-SERVICE-V1";
const TLD: &str = ".anon";

/// Overlay address of a service, derived from its public key.
///
/// Rendered as `<label>.anon`, where the label is the lowercase unpadded
/// base32 form of a domain-separated BLAKE3 digest of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceAddress([u8; 32]);

impl ServiceAddress {
    pub fn derive(public_key: &PublicKey) -> Self {
        let digest = blake3::Hasher::new()
            .update(DERIVATION_CONTEXT)
            .update(&public_key.as_bytes())
            .finalize();
        Self(digest.into())
    }

    /// Hostname form, also used as TLS server name on the overlay
    pub fn hostname(&self) -> String {
        let mut hostname = self.label();
        hostname.push_str(TLD);
        hostname
    }

    /// The 52 character base32 label
    fn label(&self) -> String {
        BASE32_NOPAD.encode(&self.0).to_ascii_lowercase()
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.label(), TLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyPair;

    fn random_address() -> (KeyPair, ServiceAddress) {
        let keypair = KeyPair::generate();
        let address = ServiceAddress::derive(&keypair.public_key());
        (keypair, address)
    }

    #[test]
    fn test_hostname_is_lowercase_label_plus_tld() {
        let (_, address) = random_address();

        assert_eq!(address.label().len(), 52);
        assert_eq!(address.hostname(), format!("{}.anon", address.label()));
        assert_eq!(address.to_string(), address.hostname());
        assert!(!address.hostname().chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let (keypair, address) = random_address();
        let reloaded = KeyPair::from_seed(&keypair.seed());

        assert_eq!(ServiceAddress::derive(&reloaded.public_key()), address);
    }

    #[test]
    fn test_distinct_keys_get_distinct_addresses() {
        let (_, first) = random_address();
        let (_, second) = random_address();

        assert_ne!(first, second);
    }
}
