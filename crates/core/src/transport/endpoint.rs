use super::{Overlay, OverlayStream, QuicListener, TransportError};
use crate::identity::Identity;
use crate::service::ServiceAddress;
use anonrelay_common::protocol;
use async_trait::async_trait;
use quinn::{Endpoint, VarInt};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// ALPN protocol spoken on overlay connections
const ALPN: &[u8] = b"anonrelay/1";

/// Overlay endpoint configuration
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// UDP address to bind
    pub listen_addr: SocketAddr,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, protocol::DEFAULT_LISTEN_PORT)),
        }
    }
}

impl OverlayConfig {
    /// Create configuration with specific bind address
    pub fn with_listen_addr(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }
}

/// QUIC backed overlay transport.
///
/// One endpoint serves both roles: it accepts streams for the single
/// announced identity and can dial other services.
pub struct QuicOverlay {
    endpoint: Endpoint,
    listening: OnceLock<ServiceAddress>,
}

impl QuicOverlay {
    /// Bind the overlay endpoint
    pub async fn start(config: OverlayConfig) -> Result<Self, TransportError> {
        let mut endpoint = Endpoint::client(config.listen_addr).map_err(TransportError::Bind)?;
        endpoint.set_default_client_config(client_config()?);

        info!("Overlay endpoint bound on {}", endpoint.local_addr()?);

        Ok(Self {
            endpoint,
            listening: OnceLock::new(),
        })
    }

    /// Get local address.
    /// If bound to an unspecified address, returns loopback instead
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        let mut addr = self.endpoint.local_addr()?;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        Ok(addr)
    }

    /// Open a stream to `port` of the service at `address`, reachable on
    /// `remote`
    pub async fn connect(
        &self,
        remote: SocketAddr,
        address: &ServiceAddress,
        port: u16,
    ) -> Result<OverlayStream, TransportError> {
        let connection = self
            .endpoint
            .connect(remote, &address.hostname())
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        send.write_all(&port.to_be_bytes())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let mut status = [0u8; 1];
        recv.read_exact(&mut status)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        if status[0] != protocol::STREAM_ACCEPTED {
            return Err(TransportError::PortRejected(port));
        }

        debug!("Opened stream to {} port {}", address, port);
        Ok(OverlayStream::new(send, recv))
    }
}

#[async_trait]
impl Overlay for QuicOverlay {
    type Listener = QuicListener;

    async fn listen(
        &self,
        identity: &Identity,
        ports: &[u16],
    ) -> Result<QuicListener, TransportError> {
        if self.listening.get().is_some() {
            return Err(TransportError::AlreadyListening);
        }

        let address = identity.service_address();
        let server_config = server_config(&address.hostname())?;

        self.listening
            .set(address)
            .map_err(|_| TransportError::AlreadyListening)?;
        self.endpoint.set_server_config(Some(server_config));

        debug!("Announcing {} on ports {:?}", address, ports);
        Ok(QuicListener::spawn(self.endpoint.clone(), address, ports))
    }

    fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

fn transport_config() -> Arc<quinn::TransportConfig> {
    let mut transport_config = quinn::TransportConfig::default();

    transport_config.max_idle_timeout(Some(VarInt::from_u32(protocol::IDLE_TIMEOUT_MS).into()));
    transport_config.keep_alive_interval(Some(Duration::from_secs(
        protocol::KEEPALIVE_INTERVAL_SECS,
    )));
    transport_config.max_concurrent_bidi_streams(VarInt::from_u32(
        protocol::MAX_STREAMS_PER_CONNECTION,
    ));
    transport_config.max_concurrent_uni_streams(VarInt::from_u32(0));

    Arc::new(transport_config)
}

/// Server configuration with a self-signed certificate for `hostname`
fn server_config(hostname: &str) -> Result<quinn::ServerConfig, TransportError> {
    let cert = rcgen::generate_simple_self_signed(vec![hostname.to_string()])
        .map_err(|e| TransportError::CertGeneration(e.to_string()))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
        .map_err(|e| TransportError::CertGeneration(e.to_string()))?;

    let mut server_crypto = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| TransportError::ConfigCreation(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(cert_chain, key)
    .map_err(|e| TransportError::ConfigCreation(e.to_string()))?;
    server_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
        .map_err(|e| TransportError::ConfigCreation(format!("{:?}", e)))?;

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
    server_config.transport_config(transport_config());

    Ok(server_config)
}

/// Client configuration.
///
/// Certificates are self-signed and not checked; the overlay hostname is
/// only carried as SNI.
fn client_config() -> Result<quinn::ClientConfig, TransportError> {
    let mut client_crypto = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| TransportError::ConfigCreation(e.to_string()))?
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
    .with_no_client_auth();
    client_crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
        .map_err(|e| TransportError::ConfigCreation(format!("{:?}", e)))?;

    let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(transport_config());

    Ok(client_config)
}

#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
