/// Overlay transport
///
/// The relay only sees the overlay through [`Overlay`] and
/// [`OverlayListener`]. [`QuicOverlay`] binds those traits to a QUIC
/// endpoint where every bidirectional stream opens with a 2-byte virtual
/// port header, answered by a single status byte.

mod endpoint;
mod listener;
mod stream;

pub use endpoint::{OverlayConfig, QuicOverlay};
pub use listener::QuicListener;
pub use stream::OverlayStream;

use crate::identity::Identity;
use crate::service::ServiceAddress;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A started overlay transport
#[async_trait]
pub trait Overlay: Send + Sync {
    type Listener: OverlayListener;

    /// Announce `identity` on the overlay for the given virtual ports
    async fn listen(
        &self,
        identity: &Identity,
        ports: &[u16],
    ) -> Result<Self::Listener, TransportError>;

    /// Tear the transport down
    fn close(&self);
}

/// Inbound side of an announced service
#[async_trait]
pub trait OverlayListener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Address remote peers reach this listener at
    fn service_address(&self) -> ServiceAddress;

    /// Wait for the next inbound stream and the virtual port it targeted.
    ///
    /// Must be cancel safe: dropping the future never loses a stream.
    async fn accept(&mut self) -> Result<(Self::Stream, u16), TransportError>;

    /// Stop accepting streams
    fn close(&mut self);
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to bind overlay endpoint: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    #[error("Failed to create config: {0}")]
    ConfigCreation(String),

    #[error("Transport already has a listener")]
    AlreadyListening,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Stream handshake failed: {0}")]
    Handshake(String),

    #[error("Port {0} is not exposed by the service")]
    PortRejected(u16),

    #[error("Listener is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
