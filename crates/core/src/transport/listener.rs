use super::{OverlayListener, OverlayStream, TransportError};
use crate::service::ServiceAddress;
use anonrelay_common::protocol;
use async_trait::async_trait;
use quinn::{Endpoint, Incoming, RecvStream, SendStream};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// Streams waiting for `accept()` before the intake pauses
const ACCEPT_BACKLOG: usize = 64;

type Inbound = (OverlayStream, u16);

/// Inbound side of a [`QuicOverlay`](super::QuicOverlay).
///
/// A background intake task accepts QUIC connections, reads the virtual
/// port header of each stream and queues streams for exposed ports.
pub struct QuicListener {
    address: ServiceAddress,
    endpoint: Endpoint,
    streams: mpsc::Receiver<Inbound>,
    intake: JoinHandle<()>,
}

impl QuicListener {
    pub(super) fn spawn(endpoint: Endpoint, address: ServiceAddress, ports: &[u16]) -> Self {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let ports: Arc<HashSet<u16>> = Arc::new(ports.iter().copied().collect());
        let intake = tokio::spawn(run_intake(endpoint.clone(), ports, tx));

        Self {
            address,
            endpoint,
            streams: rx,
            intake,
        }
    }
}

impl fmt::Debug for QuicListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuicListener")
            .field("address", &self.address)
            .field("closed", &self.streams.is_closed())
            .finish()
    }
}

#[async_trait]
impl OverlayListener for QuicListener {
    type Stream = OverlayStream;

    fn service_address(&self) -> ServiceAddress {
        self.address
    }

    async fn accept(&mut self) -> Result<Inbound, TransportError> {
        self.streams.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&mut self) {
        self.endpoint.set_server_config(None);
        self.intake.abort();
        self.streams.close();
    }
}

impl Drop for QuicListener {
    fn drop(&mut self) {
        self.intake.abort();
    }
}

/// Accept connections until the endpoint closes.
///
/// Connection tasks live in a set owned by this task, so aborting it drops
/// every pending handshake along with its queue sender.
async fn run_intake(endpoint: Endpoint, ports: Arc<HashSet<u16>>, tx: mpsc::Sender<Inbound>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => {
                    connections.spawn(serve_connection(incoming, ports.clone(), tx.clone()));
                }
                None => {
                    debug!("Overlay endpoint closed, stopping intake");
                    break;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!("Overlay connection task panicked: {}", e);
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    incoming: Incoming,
    ports: Arc<HashSet<u16>>,
    tx: mpsc::Sender<Inbound>,
) {
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(e) => {
            debug!("Overlay handshake failed: {}", e);
            return;
        }
    };
    let remote = connection.remote_address();
    debug!("Overlay connection from {}", remote);

    let mut handshakes = JoinSet::new();
    loop {
        tokio::select! {
            accepted = connection.accept_bi() => match accepted {
                Ok((send, recv)) => {
                    handshakes.spawn(open_stream(send, recv, ports.clone(), tx.clone()));
                }
                Err(e) => {
                    debug!("Overlay connection from {} ended: {}", remote, e);
                    break;
                }
            },
            Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
        }
    }
}

/// Read the port header and answer it
async fn open_stream(
    mut send: SendStream,
    mut recv: RecvStream,
    ports: Arc<HashSet<u16>>,
    tx: mpsc::Sender<Inbound>,
) {
    let mut header = [0u8; protocol::PORT_HEADER_LEN];
    if let Err(e) = recv.read_exact(&mut header).await {
        debug!("Stream closed before its port header: {}", e);
        return;
    }
    let port = u16::from_be_bytes(header);

    if !ports.contains(&port) {
        debug!("Rejecting stream for unexposed port {}", port);
        let _ = send.write_all(&[protocol::STREAM_REJECTED]).await;
        let _ = send.finish();
        return;
    }

    if let Err(e) = send.write_all(&[protocol::STREAM_ACCEPTED]).await {
        debug!("Stream for port {} closed during handshake: {}", port, e);
        return;
    }

    // The receiver is gone once the listener closes
    let _ = tx.send((OverlayStream::new(send, recv), port)).await;
}
