use quinn::{RecvStream, SendStream};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// One bidirectional overlay stream, past its port handshake.
///
/// Shutting down the write half finishes the QUIC send stream, which the
/// peer observes as end-of-stream.
pub struct OverlayStream {
    send: SendStream,
    recv: RecvStream,
}

impl OverlayStream {
    pub(crate) fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }
}

impl fmt::Debug for OverlayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayStream")
            .field("stream_id", &self.recv.id())
            .finish()
    }
}

impl AsyncRead for OverlayStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.get_mut().recv), cx, buf)
    }
}

impl AsyncWrite for OverlayStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.get_mut().send), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.get_mut().send), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.get_mut().send), cx)
    }
}

#[cfg(test)]
mod tests {
    use crate::identity::Identity;
    use crate::transport::{Overlay, OverlayConfig, OverlayListener, QuicOverlay};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_shutdown_is_seen_as_end_of_stream() {
        let identity = Identity::generate();
        let loopback = OverlayConfig::with_listen_addr("127.0.0.1:0".parse().unwrap());
        let server = QuicOverlay::start(loopback.clone()).await.unwrap();
        let mut listener = server.listen(&identity, &[80]).await.unwrap();
        let client = QuicOverlay::start(loopback).await.unwrap();

        let mut outbound = client
            .connect(server.local_addr().unwrap(), &identity.service_address(), 80)
            .await
            .unwrap();
        outbound.write_all(b"last words").await.unwrap();
        outbound.shutdown().await.unwrap();

        let (mut inbound, _) = listener.accept().await.unwrap();
        assert!(format!("{:?}", inbound).starts_with("OverlayStream"));
        let mut received = Vec::new();
        inbound.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"last words");

        // The reverse direction is still open
        inbound.write_all(b"ack").await.unwrap();
        inbound.shutdown().await.unwrap();

        let mut reply = Vec::new();
        outbound.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ack");
    }
}
