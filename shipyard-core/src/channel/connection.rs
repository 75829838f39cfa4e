//! Connection handling
//!
//! A [`FramedChannel`] wraps a raw byte stream for the handshake phase. Once
//! the peer is identified it is turned into a [`Connection`]: a cloneable
//! handle whose sends are queued to a single writer task (FIFO per
//! connection), plus a reader task that feeds every inbound packet to a
//! [`Router`].

use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::codec::PacketCodec;
use crate::channel::error::ChannelError;
use crate::channel::packet::Packet;
use crate::channel::router::Router;

/// Outbound packets buffered per connection before `send` waits
const OUTBOUND_QUEUE: usize = 256;

/// A framed byte stream that has not been attached to a router yet
pub struct FramedChannel<S> {
    framed: Framed<S, PacketCodec>,
    peer: String,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            framed: Framed::new(stream, PacketCodec::new()),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one packet directly (handshake phase only)
    pub async fn send(&mut self, packet: Packet) -> Result<(), ChannelError> {
        self.framed.send(packet).await
    }

    /// Read the next packet; end of stream is reported as `ConnectionClosed`
    pub async fn recv(&mut self) -> Result<Packet, ChannelError> {
        match self.framed.next().await {
            Some(result) => result,
            None => Err(ChannelError::ConnectionClosed),
        }
    }

    /// Start the reader and writer tasks.
    ///
    /// The returned handle resolves once the connection is closed, from
    /// either side.
    pub fn into_connection(
        self,
        id: impl Into<String>,
        router: Arc<Router>,
    ) -> (Connection, JoinHandle<()>) {
        let (sink, mut stream) = self.framed.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let closed = CancellationToken::new();

        let connection = Connection {
            inner: Arc::new(ConnectionInner {
                id: id.into(),
                peer: self.peer,
                tx,
                closed: closed.clone(),
            }),
        };

        tokio::spawn(write_loop(sink, rx, closed.clone(), connection.id().to_string()));

        let reader = connection.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    frame = stream.next() => match frame {
                        Some(Ok(packet)) => {
                            router.dispatch(&reader, packet);
                        }
                        Some(Err(e)) => {
                            warn!("Connection {} read error: {}", reader.id(), e);
                            break;
                        }
                        None => {
                            debug!("Connection {} closed by peer", reader.id());
                            break;
                        }
                    }
                }
            }
            closed.cancel();
        });

        (connection, handle)
    }
}

async fn write_loop<K>(
    mut sink: K,
    mut rx: mpsc::Receiver<Packet>,
    closed: CancellationToken,
    id: String,
) where
    K: Sink<Packet, Error = ChannelError> + Unpin,
{
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            next = rx.recv() => match next {
                Some(packet) => {
                    if let Err(e) = sink.send(packet).await {
                        warn!("Connection {} write error: {}", id, e);
                        break;
                    }
                }
                None => break,
            }
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}

#[derive(Debug)]
struct ConnectionInner {
    id: String,
    peer: String,
    tx: mpsc::Sender<Packet>,
    closed: CancellationToken,
}

/// Cloneable send handle for one live connection
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connection backed by an in-process queue instead of a socket.
    ///
    /// Everything sent on the handle shows up on the returned receiver;
    /// dropping the receiver makes further sends fail with `ConnectionClosed`.
    pub fn in_memory(id: impl Into<String>) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: id.into(),
                peer: "in-memory".to_string(),
                tx,
                closed: CancellationToken::new(),
            }),
        };
        (connection, rx)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Queue a packet behind every packet sent before it on this connection.
    ///
    /// Success means queued, not delivered.
    pub async fn send(&self, packet: Packet) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ConnectionClosed);
        }
        self.inner
            .tx
            .send(packet)
            .await
            .map_err(|_| ChannelError::ConnectionClosed)
    }

    pub async fn send_text(&self, channel: &str, text: impl Into<String>) -> Result<(), ChannelError> {
        self.send(Packet::text(channel, text)).await
    }

    pub async fn send_json<T: Serialize>(&self, channel: &str, value: &T) -> Result<(), ChannelError> {
        self.send(Packet::structured(channel, value)?).await
    }

    /// Whether both handles refer to the same underlying connection
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled() || self.inner.tx.is_closed()
    }

    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::packet::MessageKind;
    use std::time::Duration;

    fn collecting_router(channel: &str) -> (Arc<Router>, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Router::new().route(channel, move |_: &Connection, packet: Packet| {
            let _ = tx.send(packet);
        });
        (Arc::new(router), rx)
    }

    #[tokio::test]
    async fn test_packets_arrive_in_send_order() {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (left_router, _) = collecting_router("unused");
        let (right_router, mut received) = collecting_router("build-runner");

        let (sender, _) = FramedChannel::new(left, "right").into_connection("left", left_router);
        let (_receiver, _) =
            FramedChannel::new(right, "left").into_connection("right", right_router);

        for i in 0..20 {
            sender.send_text("build-runner", format!("{}", i)).await.unwrap();
        }

        for i in 0..20 {
            let packet = tokio::time::timeout(Duration::from_secs(5), received.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(packet.kind(), MessageKind::Text);
            assert_eq!(packet.as_text().unwrap(), format!("{}", i));
        }
    }

    #[tokio::test]
    async fn test_handshake_phase_then_attach() {
        let (left, right) = tokio::io::duplex(4096);
        let mut client = FramedChannel::new(left, "server");
        let mut server = FramedChannel::new(right, "client");

        client.send(Packet::text("handshake", "hello")).await.unwrap();
        let first = server.recv().await.unwrap();
        assert_eq!(first.channel(), "handshake");

        let (router, mut received) = collecting_router("build-runner");
        let (_server_conn, _) = server.into_connection("client", router);
        client
            .send(Packet::binary("build-runner", vec![1u8, 2]))
            .await
            .unwrap();

        let packet = received.recv().await.unwrap();
        assert_eq!(&packet.payload()[..], &[1, 2]);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (left, _right) = tokio::io::duplex(4096);
        let (conn, _) = FramedChannel::new(left, "peer").into_connection("c", Arc::new(Router::new()));

        conn.close();
        assert!(matches!(
            conn.send_text("any", "x").await,
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_peer_disconnect_closes_connection() {
        let (left, right) = tokio::io::duplex(4096);
        let (conn, handle) =
            FramedChannel::new(left, "peer").into_connection("c", Arc::new(Router::new()));

        drop(right);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_text("any", "x").await,
            Err(ChannelError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_in_memory_connection() {
        let (conn, mut rx) = Connection::in_memory("fake");
        conn.send_text("build-runner", "ping").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_text().unwrap(), "ping");

        drop(rx);
        assert!(matches!(
            conn.send_text("build-runner", "ping").await,
            Err(ChannelError::ConnectionClosed)
        ));
    }
}
