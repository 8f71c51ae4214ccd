/// Connection relay engine
///
/// Pairs every inbound overlay stream with a fresh connection to the local
/// backend and copies bytes both ways until each side is done.
///
/// Failure policy:
/// - an accept error or a failed local dial ends the whole relay;
/// - an error inside one direction only ends that direction.

use crate::transport::{OverlayListener, TransportError};
use anonrelay_common::LocalTarget;
use async_trait::async_trait;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Opens connections to the local backend
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, address: &str) -> io::Result<Self::Stream>;
}

/// Dials the backend over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, address: &str) -> io::Result<TcpStream> {
        TcpStream::connect(address).await
    }
}

/// Direction of one forwarding task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    RemoteToLocal,
    LocalToRemote,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteToLocal => f.write_str("remote to local"),
            Self::LocalToRemote => f.write_str("local to remote"),
        }
    }
}

/// How one direction of a pair ended
#[derive(Debug)]
pub struct ForwardOutcome {
    pub direction: Direction,
    pub result: io::Result<u64>,
}

/// Accept loop driving every connection pair
pub struct RelayEngine<D> {
    dialer: D,
    target: String,
}

impl<D: Dialer> RelayEngine<D> {
    pub fn new(dialer: D, target: &LocalTarget) -> Self {
        Self {
            dialer,
            target: target.dial_address(),
        }
    }

    /// Normalized address every pair dials
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Serve the listener until a serving-fatal error, which is returned.
    ///
    /// Pair tasks belong to the engine: they are reaped as they finish and
    /// torn down together with it.
    pub async fn run<L: OverlayListener>(&self, listener: &mut L) -> RelayError {
        let mut pairs = JoinSet::new();
        let mut next_pair: u64 = 0;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (remote, port) = match accepted {
                        Ok(inbound) => inbound,
                        Err(e) => return RelayError::Accept(e),
                    };
                    next_pair += 1;
                    let pair = next_pair;
                    info!(pair, port, "New connection from remote established");

                    let local = match self.dialer.dial(&self.target).await {
                        Ok(local) => local,
                        Err(source) => {
                            return RelayError::Dial {
                                target: self.target.clone(),
                                source,
                            }
                        }
                    };
                    info!(pair, target = %self.target, "New connection to local established");

                    pairs.spawn(relay_pair(pair, remote, local));
                }
                Some(joined) = pairs.join_next(), if !pairs.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Connection pair task failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Forward both directions of one pair and wait for both to end.
///
/// Each stream is split into halves owned by the two tasks; the streams
/// close once both tasks have dropped their halves.
pub async fn relay_pair<R, L>(pair: u64, remote: R, local: L) -> [ForwardOutcome; 2]
where
    R: AsyncRead + AsyncWrite + Send + 'static,
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    let (remote_read, remote_write) = tokio::io::split(remote);
    let (local_read, local_write) = tokio::io::split(local);

    let mut directions = JoinSet::new();
    directions.spawn(forward(
        pair,
        Direction::RemoteToLocal,
        remote_read,
        local_write,
    ));
    directions.spawn(forward(
        pair,
        Direction::LocalToRemote,
        local_read,
        remote_write,
    ));

    let mut remote_to_local = None;
    let mut local_to_remote = None;
    while let Some(joined) = directions.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(pair, "Forwarding task failed: {}", e);
                continue;
            }
        };
        match outcome.direction {
            Direction::RemoteToLocal => remote_to_local = Some(outcome),
            Direction::LocalToRemote => local_to_remote = Some(outcome),
        }
    }

    debug!(pair, "Connection pair closed");
    [
        remote_to_local.unwrap_or_else(|| aborted(Direction::RemoteToLocal)),
        local_to_remote.unwrap_or_else(|| aborted(Direction::LocalToRemote)),
    ]
}

fn aborted(direction: Direction) -> ForwardOutcome {
    ForwardOutcome {
        direction,
        result: Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "forwarding task did not complete",
        )),
    }
}

/// Copy one direction until end-of-stream or error.
///
/// On end-of-stream the writer is shut down so the peer sees the half-close;
/// the opposite direction is left alone.
async fn forward<R, W>(
    pair: u64,
    direction: Direction,
    mut reader: R,
    mut writer: W,
) -> ForwardOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(pair, %direction, "Proxying data");

    let result = match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => writer.shutdown().await.map(|()| bytes),
        Err(e) => Err(e),
    };

    match &result {
        Ok(bytes) => info!(pair, %direction, bytes, "Stopped proxying: end of stream"),
        Err(e) => warn!(pair, %direction, "Stopped proxying: {}", e),
    }

    ForwardOutcome { direction, result }
}

/// Serving-fatal relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] TransportError),

    #[error("Failed to create connection with the local address ({target}): {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::service::ServiceAddress;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Listener fed from a channel; a closed channel is an accept error
    struct ChannelListener {
        address: ServiceAddress,
        inbound: mpsc::Receiver<DuplexStream>,
    }

    #[async_trait]
    impl OverlayListener for ChannelListener {
        type Stream = DuplexStream;

        fn service_address(&self) -> ServiceAddress {
            self.address
        }

        async fn accept(&mut self) -> Result<(DuplexStream, u16), TransportError> {
            self.inbound
                .recv()
                .await
                .map(|stream| (stream, 80))
                .ok_or(TransportError::Closed)
        }

        fn close(&mut self) {
            self.inbound.close();
        }
    }

    fn channel_listener() -> (ChannelListener, mpsc::Sender<DuplexStream>) {
        let (tx, rx) = mpsc::channel(16);
        let listener = ChannelListener {
            address: Identity::generate().service_address(),
            inbound: rx,
        };
        (listener, tx)
    }

    async fn echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut read, mut write) = socket.split();
                    let _ = tokio::io::copy(&mut read, &mut write).await;
                });
            }
        });
        (addr, handle)
    }

    /// Floods the first connection with 1 MiB and echoes every later one
    async fn flood_then_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let _ = first.write_all(&vec![7u8; 1 << 20]).await;
            });
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut read, mut write) = socket.split();
                    let _ = tokio::io::copy(&mut read, &mut write).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_pair_forwards_both_ways_and_reports() {
        let (remote_peer, remote) = duplex(64);
        let (local_peer, local) = duplex(64);
        let pair = tokio::spawn(relay_pair(1, remote, local));

        let (mut remote_peer_read, mut remote_peer_write) = tokio::io::split(remote_peer);
        let (mut local_peer_read, mut local_peer_write) = tokio::io::split(local_peer);

        remote_peer_write.write_all(b"request").await.unwrap();
        remote_peer_write.shutdown().await.unwrap();
        let mut request = Vec::new();
        local_peer_read.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        local_peer_write.write_all(b"response!").await.unwrap();
        local_peer_write.shutdown().await.unwrap();
        let mut response = Vec::new();
        remote_peer_read.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"response!");

        let [up, down] = pair.await.unwrap();
        assert_eq!(up.direction, Direction::RemoteToLocal);
        assert_eq!(up.result.unwrap(), 7);
        assert_eq!(down.direction, Direction::LocalToRemote);
        assert_eq!(down.result.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_one_direction_ending_leaves_the_other_open() {
        let (remote_peer, remote) = duplex(64);
        let (local_peer, local) = duplex(64);
        let pair = tokio::spawn(relay_pair(1, remote, local));

        let (_remote_peer_read, mut remote_peer_write) = tokio::io::split(remote_peer);
        let (mut local_peer_read, mut local_peer_write) = tokio::io::split(local_peer);

        remote_peer_write.shutdown().await.unwrap();
        let mut nothing = Vec::new();
        local_peer_read.read_to_end(&mut nothing).await.unwrap();
        assert!(nothing.is_empty());

        // Local to remote still carries data after the half-close
        local_peer_write.write_all(b"still here").await.unwrap();
        assert!(!pair.is_finished());
    }

    #[tokio::test]
    async fn test_copy_error_ends_only_its_direction() {
        let (mut remote_peer, remote) = duplex(64);
        let (local_peer, local) = duplex(64);
        let pair = tokio::spawn(relay_pair(1, remote, local));

        let (_local_peer_read, mut local_peer_write) = tokio::io::split(local_peer);
        tokio::spawn(async move {
            let _ = local_peer_write.write_all(&vec![7u8; 1 << 20]).await;
        });

        // Hang up while the backend is still writing
        let mut first = [0u8; 1];
        remote_peer.read_exact(&mut first).await.unwrap();
        drop(remote_peer);

        let [up, down] = tokio::time::timeout(Duration::from_secs(5), pair)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(up.direction, Direction::RemoteToLocal);
        assert_eq!(up.result.unwrap(), 0);
        assert_eq!(down.direction, Direction::LocalToRemote);
        assert!(down.result.is_err());
    }

    #[tokio::test]
    async fn test_forwarding_error_keeps_relay_serving() {
        let backend = flood_then_echo_server().await;
        let engine = RelayEngine::new(TcpDialer, &LocalTarget::Address(backend));
        let (mut listener, inbound) = channel_listener();
        let relay = tokio::spawn(async move { engine.run(&mut listener).await });

        let (mut doomed, remote) = duplex(64);
        inbound.send(remote).await.unwrap();
        let mut first = [0u8; 1];
        doomed.read_exact(&mut first).await.unwrap();
        drop(doomed);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (mut client, remote) = duplex(1024);
        inbound.send(remote).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(&reply, b"ping");
        assert!(!relay.is_finished());
        relay.abort();
    }

    #[tokio::test]
    async fn test_echo_through_engine() {
        let (echo_addr, _echo) = echo_server().await;
        let engine = RelayEngine::new(TcpDialer, &LocalTarget::Address(echo_addr));
        let (mut listener, inbound) = channel_listener();
        let relay = tokio::spawn(async move { engine.run(&mut listener).await });

        let (mut client, remote) = duplex(1024);
        inbound.send(remote).await.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        relay.abort();
    }

    #[tokio::test]
    async fn test_accept_error_ends_the_relay() {
        let engine = RelayEngine::new(TcpDialer, &LocalTarget::Port(9));
        let (mut listener, inbound) = channel_listener();
        drop(inbound);

        let err = engine.run(&mut listener).await;
        assert!(matches!(err, RelayError::Accept(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_dial_failure_ends_the_relay() {
        // Bind then drop to get a port nothing listens on
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let engine = RelayEngine::new(TcpDialer, &LocalTarget::Port(port));
        let (mut listener, inbound) = channel_listener();

        let (_first_client, first) = duplex(64);
        inbound.send(first).await.unwrap();
        let (_second_client, second) = duplex(64);
        inbound.send(second).await.unwrap();

        let err = engine.run(&mut listener).await;
        match err {
            RelayError::Dial { target, .. } => assert_eq!(target, format!("127.0.0.1:{port}")),
            other => panic!("unexpected error: {other}"),
        }

        // The second inbound stream was never picked up
        assert!(listener.inbound.try_recv().is_ok());
    }

    #[test]
    fn test_engine_normalizes_target() {
        let engine = RelayEngine::new(TcpDialer, &LocalTarget::Port(9090));
        assert_eq!(engine.target(), "127.0.0.1:9090");
    }
}
