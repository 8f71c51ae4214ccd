//! anonrelay core: service identity, identity store, overlay transport and
//! the connection relay engine.

pub mod identity;
pub mod relay;
pub mod service;
pub mod store;
pub mod transport;

pub use identity::{Identity, KeyPair, KeyPairError, PublicKey};
pub use relay::{Dialer, Direction, ForwardOutcome, RelayEngine, RelayError, TcpDialer};
pub use service::ServiceAddress;
pub use store::{IdentityStore, LoadedConfig, StoreError, StoreLoad};
pub use transport::{
    Overlay, OverlayConfig, OverlayListener, OverlayStream, QuicListener, QuicOverlay,
    TransportError,
};
